use strum::{Display, EnumIter, EnumString};
use tracing::{debug, trace};

use crate::{
    ir::{Instruction, Operation, Position},
    synthesize::{
        buffer::Encoding,
        error::{Error, ErrorKind},
        symbol::{SymbolKind, SymbolTable},
    },
};

pub mod mcs51;
pub mod x64;

#[derive(Debug, Display, EnumString, EnumIter, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(ascii_case_insensitive)]
pub enum Arch {
    /// 8-bit Intel MCS-51 microcontroller.
    #[strum(to_string = "8051", serialize = "mcs51", serialize = "mcs-51")]
    Mcs51,
    #[strum(to_string = "x86_64", serialize = "x64", serialize = "x86-64", serialize = "amd64")]
    X86_64,
}

/// The result of a successful generation run.
#[derive(Debug)]
pub struct Assembly {
    pub arch: Arch,
    /// Machine code. On x86-64 the data region for variables follows the code.
    pub code: Vec<u8>,
    /// Number of bytes of `code` that are instructions.
    pub code_size: usize,
    pub symbols: SymbolTable,
    /// Initial image of the 8051 internal RAM (empty on x86-64).
    pub ram: Vec<u8>,
}

impl Assembly {
    pub fn instructions(&self) -> &[u8] {
        &self.code[..self.code_size]
    }

    pub fn data(&self) -> &[u8] {
        &self.code[self.code_size..]
    }

    /// Reads the value stored at a scalar variable's address in its initial memory image.
    ///
    /// 8051 variables are a single byte of internal RAM and read back unsigned, so `var x, -1`
    /// reads as 255 there. x86-64 variables are signed 64-bit words.
    pub fn read_variable(&self, name: &str) -> Option<i64> {
        let symbol = self.symbols.get(name)?;
        if symbol.kind != SymbolKind::Variable {
            return None;
        }

        let address = symbol.address as usize;
        match self.arch {
            Arch::Mcs51 => self.ram.get(address).map(|b| *b as i64),
            Arch::X86_64 => {
                let bytes = self.code.get(address..(address + 8))?;
                Some(i64::from_le_bytes(bytes.try_into().ok()?))
            }
        }
    }
}

/// A native instruction of one architecture.
pub trait Encode: std::fmt::Debug {
    fn encode(&self) -> Encoding;
}

/// Computes the encoded length of an instruction without emitting it.
pub trait Sizer {
    fn size_of(&self, op: &Operation) -> Result<usize, ErrorKind>;

    /// Size of the program address space, if code can't grow without bound.
    fn address_space(&self) -> Option<u64> {
        None
    }
}

/// Appends the native encoding of an instruction to the code buffer.
pub trait Emitter {
    fn emit(&mut self, op: &Operation, pos: Position) -> Result<(), ErrorKind>;

    /// Bytes emitted so far, which is also the current program counter.
    fn current_offset(&self) -> usize;

    /// Pads with no-ops up to an `org` address.
    fn pad(&mut self, count: usize) -> Result<(), ErrorKind>;
}

/// Reserves storage for variables and buffers, returning their address.
pub trait Allocate {
    fn variable(&mut self, init: Option<i64>) -> Result<u64, ErrorKind>;

    fn buffer(&mut self, len: i64) -> Result<u64, ErrorKind>;
}

/// Generator entry point for one architecture.
pub trait Assemble {
    const ARCH: Arch;

    fn assemble(ir: &[Instruction]) -> Result<Assembly, Error>;
}

/// Generates machine code for the given architecture.
pub fn generate(arch: Arch, ir: &[Instruction]) -> Result<Assembly, Error> {
    match arch {
        Arch::Mcs51 => mcs51::Mcs51Assembler::assemble(ir),
        Arch::X86_64 => x64::X64Assembler::assemble(ir),
    }
}

/// First pass: assigns addresses to labels, allocates variables and buffers and returns the total
/// code size.
pub fn layout(
    arch: Arch,
    ir: &[Instruction],
    sizer: &impl Sizer,
    allocator: &mut impl Allocate,
    symbols: &mut SymbolTable,
) -> Result<u64, Error> {
    let mut pc: u64 = 0;

    for instr in ir {
        let at = |kind| Error::new(arch, instr.pos, kind);

        match &instr.op {
            Operation::Label { name } => symbols.define(name, SymbolKind::Label, pc).map_err(at)?,
            Operation::Var { name, init } => {
                symbols.ensure_undefined(name).map_err(at)?;
                let address = allocator.variable(*init).map_err(at)?;
                symbols
                    .define(name, SymbolKind::Variable, address)
                    .map_err(at)?;
            }
            Operation::Buffer { name, len } => {
                symbols.ensure_undefined(name).map_err(at)?;
                let address = allocator.buffer(*len).map_err(at)?;
                symbols
                    .define(name, SymbolKind::Buffer, address)
                    .map_err(at)?;
            }
            Operation::Org { address } => {
                if *address < 0 || (*address as u64) < pc {
                    return Err(at(ErrorKind::AddressBackwards {
                        target: *address,
                        current: pc,
                    }));
                }

                pc = *address as u64;
            }
            op => {
                let size = sizer.size_of(op).map_err(at)?;
                trace!(pc, size, "{}", op);
                pc += size as u64;
            }
        }

        match sizer.address_space() {
            Some(available) if pc > available => {
                return Err(at(ErrorKind::StorageExhausted {
                    what: "program memory",
                    needed: pc,
                    available,
                }));
            }
            _ => (),
        }
    }

    debug!(%arch, code_size = pc, symbols = symbols.len(), "layout complete");
    Ok(pc)
}

/// Second pass: emits every instruction, checking that each one occupies exactly the number of
/// bytes the sizer promised.
pub fn emit_all<A: Sizer + Emitter>(
    arch: Arch,
    ir: &[Instruction],
    asm: &mut A,
) -> Result<(), Error> {
    for instr in ir {
        let at = |kind| Error::new(arch, instr.pos, kind);

        match &instr.op {
            Operation::Label { .. } | Operation::Var { .. } | Operation::Buffer { .. } => (),
            Operation::Org { address } => {
                let padding = (*address as usize).saturating_sub(asm.current_offset());
                asm.pad(padding).map_err(at)?;
            }
            op => {
                let expected = asm.size_of(op).map_err(at)?;
                let start = asm.current_offset();
                asm.emit(op, instr.pos).map_err(at)?;

                let actual = asm.current_offset() - start;
                if actual != expected {
                    return Err(at(ErrorKind::SizeMismatch {
                        mnemonic: op.mnemonic(),
                        expected,
                        actual,
                    }));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::ir::{Source, VirtualReg};

    #[test]
    fn arch_names() {
        assert_eq!(Arch::from_str("8051"), Ok(Arch::Mcs51));
        assert_eq!(Arch::from_str("MCS51"), Ok(Arch::Mcs51));
        assert_eq!(Arch::from_str("x64"), Ok(Arch::X86_64));
        assert_eq!(Arch::from_str("x86_64"), Ok(Arch::X86_64));
        assert!(Arch::from_str("z80").is_err());
        assert_eq!(Arch::Mcs51.to_string(), "8051");
        assert_eq!(Arch::X86_64.to_string(), "x86_64");
    }

    struct FixedSize;

    impl Sizer for FixedSize {
        fn size_of(&self, _op: &Operation) -> Result<usize, ErrorKind> {
            Ok(2)
        }
    }

    #[derive(Default)]
    struct Bump(u64);

    impl Allocate for Bump {
        fn variable(&mut self, _init: Option<i64>) -> Result<u64, ErrorKind> {
            self.0 += 1;
            Ok(self.0 - 1)
        }

        fn buffer(&mut self, len: i64) -> Result<u64, ErrorKind> {
            self.0 += len as u64;
            Ok(self.0 - len as u64)
        }
    }

    fn instr(op: Operation, line: u32) -> Instruction {
        Instruction::new(op, Position::new(line, 1))
    }

    #[test]
    fn layout_assigns_label_addresses() {
        let ir = vec![
            instr(Operation::Nop, 1),
            instr(Operation::Label { name: "a".into() }, 2),
            instr(
                Operation::Mov {
                    dest: VirtualReg(0),
                    src: Source::Imm(1),
                },
                3,
            ),
            instr(Operation::Org { address: 10 }, 4),
            instr(Operation::Label { name: "b".into() }, 5),
            instr(Operation::Ret, 6),
        ];

        let mut symbols = SymbolTable::new();
        let size = layout(Arch::Mcs51, &ir, &FixedSize, &mut Bump::default(), &mut symbols).unwrap();

        assert_eq!(size, 12);
        assert_eq!(symbols.get("a").unwrap().address, 2);
        assert_eq!(symbols.get("b").unwrap().address, 10);
    }

    #[test]
    fn layout_allocates_in_declaration_order() {
        let ir = vec![
            instr(
                Operation::Var {
                    name: "x".into(),
                    init: None,
                },
                1,
            ),
            instr(
                Operation::Buffer {
                    name: "buf".into(),
                    len: 4,
                },
                2,
            ),
            instr(
                Operation::Var {
                    name: "y".into(),
                    init: Some(3),
                },
                3,
            ),
        ];

        let mut symbols = SymbolTable::new();
        let size = layout(Arch::Mcs51, &ir, &FixedSize, &mut Bump::default(), &mut symbols).unwrap();

        assert_eq!(size, 0);
        assert_eq!(symbols.get("x").unwrap().address, 0);
        assert_eq!(symbols.get("buf").unwrap().kind, SymbolKind::Buffer);
        assert_eq!(symbols.get("buf").unwrap().address, 1);
        assert_eq!(symbols.get("y").unwrap().address, 5);
    }

    #[test]
    fn layout_rejects_backwards_org() {
        let ir = vec![
            instr(Operation::Nop, 1),
            instr(Operation::Nop, 2),
            instr(Operation::Org { address: 1 }, 3),
        ];

        let err = layout(
            Arch::Mcs51,
            &ir,
            &FixedSize,
            &mut Bump::default(),
            &mut SymbolTable::new(),
        )
        .unwrap_err();

        assert_eq!(err.pos.line, 3);
        assert_eq!(
            err.kind,
            ErrorKind::AddressBackwards {
                target: 1,
                current: 4
            }
        );
    }

    #[test]
    fn layout_rejects_duplicate_variable_after_label() {
        let ir = vec![
            instr(Operation::Label { name: "x".into() }, 1),
            instr(
                Operation::Var {
                    name: "x".into(),
                    init: None,
                },
                40,
            ),
        ];

        let err = layout(
            Arch::Mcs51,
            &ir,
            &FixedSize,
            &mut Bump::default(),
            &mut SymbolTable::new(),
        )
        .unwrap_err();

        assert_eq!(err.pos.line, 40);
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol { name: "x".into() });
    }

    struct Bounded;

    impl Sizer for Bounded {
        fn size_of(&self, _op: &Operation) -> Result<usize, ErrorKind> {
            Ok(4)
        }

        fn address_space(&self) -> Option<u64> {
            Some(10)
        }
    }

    #[test]
    fn layout_reports_overflow_at_first_instruction_past_the_end() {
        let ir = vec![
            instr(Operation::Nop, 1),
            instr(Operation::Nop, 2),
            instr(Operation::Nop, 3),
            instr(Operation::Nop, 4),
        ];

        let err = layout(
            Arch::Mcs51,
            &ir,
            &Bounded,
            &mut Bump::default(),
            &mut SymbolTable::new(),
        )
        .unwrap_err();

        assert_eq!(err.pos.line, 3);
        assert_eq!(
            err.kind,
            ErrorKind::StorageExhausted {
                what: "program memory",
                needed: 12,
                available: 10
            }
        );
    }
}
