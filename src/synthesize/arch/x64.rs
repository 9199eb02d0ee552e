use tracing::debug;
use ux::u6;

use crate::{
    ir::{Instruction, Operation, Position, Source, VirtualReg},
    synthesize::{
        arch::{
            self, Arch, Assemble, Assembly, Emitter, Encode, Sizer,
            x64::{
                data::DataSegment,
                instr::{AluOp, Group, Instr},
                reg::{Reg, Register},
            },
        },
        buffer::CodeBuffer,
        error::{Error, ErrorKind},
        reloc::{Reference, Relocation, Relocations},
        symbol::{SymbolKind, SymbolTable},
    },
};

pub mod data;
pub mod instr;
pub mod reg;

/// Instruction sizes for x86-64. Every lowering in [X64Assembler] must match this table.
#[derive(Debug, Default, Clone, Copy)]
pub struct X64Sizer;

impl Sizer for X64Sizer {
    fn size_of(&self, op: &Operation) -> Result<usize, ErrorKind> {
        if let Some((_, _, src)) = op.binary() {
            return Ok(alu_size(src));
        }

        if op.branch().is_some() {
            return Ok(6);
        }

        let size = match op {
            Operation::Label { .. }
            | Operation::Var { .. }
            | Operation::Buffer { .. }
            | Operation::Org { .. } => 0,
            Operation::Mov { src, .. } => match src {
                Source::Reg(_) => 3,
                Source::Imm(_) => 7,
            },
            Operation::Load { addr, .. } => 3 + reg(*addr)?.base_overhead(),
            Operation::Store { addr, src } => {
                let base = match src {
                    Source::Reg(_) => 3,
                    Source::Imm(_) => 7,
                };
                base + reg(*addr)?.base_overhead()
            }
            Operation::Not { .. }
            | Operation::Neg { .. }
            | Operation::Inc { .. }
            | Operation::Dec { .. } => 3,
            Operation::Shl { count, .. } | Operation::Shr { count, .. } => {
                shift_count(count)?;
                4
            }
            Operation::Cmp { b, .. } => alu_size(*b),
            Operation::Jmp { .. } | Operation::Call { .. } => 5,
            Operation::Ret
            | Operation::Halt
            | Operation::Nop
            | Operation::Push { .. }
            | Operation::Pop { .. } => 1,
            Operation::Mul { src, .. } => match src {
                Source::Reg(_) => 4,
                Source::Imm(_) => 7,
            },
            Operation::Div { dest, src } => Divide::new(*dest, src, false)?.size(src),
            Operation::Mod { dest, src } => Divide::new(*dest, src, true)?.size(src),
            Operation::Int { .. } => 2,
            Operation::Set { src, .. } => match src {
                Source::Reg(_) => 7,
                Source::Imm(_) => 11,
            },
            Operation::Get { .. } => 7,
            Operation::Setb { .. }
            | Operation::Clrb { .. }
            | Operation::Cplb { .. }
            | Operation::Jb { .. }
            | Operation::Jnb { .. }
            | Operation::Djnz { .. } => {
                return Err(ErrorKind::UnsupportedOpcode {
                    mnemonic: op.mnemonic(),
                });
            }
            _ => unreachable!("binary operations and branches are sized above"),
        };

        Ok(size)
    }
}

/// `op d, s` or `op d, imm32`.
fn alu_size(src: Source) -> usize {
    match src {
        Source::Reg(_) => 3,
        Source::Imm(_) => 7,
    }
}

fn shift_count(count: &Source) -> Result<u6, ErrorKind> {
    match count {
        Source::Imm(n) => Ok(u6::new(ErrorKind::check_range(*n, 0, 63)? as u8)),
        Source::Reg(_) => Err(ErrorKind::addressing(
            "shift count must be an immediate on x86-64",
        )),
    }
}

/// Immediates are sign-extended 32-bit values.
fn imm32(n: i64) -> Result<i32, ErrorKind> {
    Ok(ErrorKind::check_range(n, i32::MIN as i64, i32::MAX as i64)? as i32)
}

fn reg(vreg: VirtualReg) -> Result<Register, ErrorKind> {
    Register::from_vreg(vreg)
}

/// Register usage of a signed division. `idiv` divides rdx:rax, leaving the quotient in rax and
/// the remainder in rdx, so both are saved unless one of them is the destination. The divisor is
/// moved to a scratch register first so it can't be clobbered by the setup. The setup pushes, so
/// rsp can't take part as either operand.
#[derive(Debug, Clone, Copy)]
struct Divide {
    dest: Register,
    scratch: Register,
    remainder: bool,
}

impl Divide {
    fn new(dest: VirtualReg, src: &Source, remainder: bool) -> Result<Self, ErrorKind> {
        let dest = reg(dest)?;
        let divisor = match *src {
            Source::Reg(src) => Some(reg(src)?),
            Source::Imm(_) => None,
        };
        if dest == Register::Rsp || divisor == Some(Register::Rsp) {
            return Err(ErrorKind::addressing(
                "the stack pointer can't be used in a division",
            ));
        }

        Ok(Self {
            dest,
            scratch: Register::scratch(&[dest]),
            remainder,
        })
    }

    /// Registers pushed before the division, in push order.
    fn saved(&self) -> Vec<Register> {
        [Register::Rdx, Register::Rax]
            .into_iter()
            .filter(|r| *r != self.dest)
            .collect()
    }

    fn result(&self) -> Register {
        if self.remainder {
            Register::Rdx
        } else {
            Register::Rax
        }
    }

    fn size(&self, src: &Source) -> usize {
        let load_divisor = match src {
            Source::Reg(_) => 3,
            Source::Imm(_) => 7,
        };
        let load_dividend = if self.dest != Register::Rax { 3 } else { 0 };
        let store_result = if self.dest != self.result() { 3 } else { 0 };
        let saved = self.saved().len();

        // push s; mov s, src; push..; mov rax, d; cqo; idiv s; mov d, result; pop..; pop s
        1 + load_divisor + saved + load_dividend + 2 + 3 + store_result + saved + 1
    }
}

#[derive(Debug, Default)]
pub struct X64Assembler {
    code: CodeBuffer,
    symbols: SymbolTable,
    relocations: Relocations,
}

impl Assemble for X64Assembler {
    const ARCH: Arch = Arch::X86_64;

    fn assemble(ir: &[Instruction]) -> Result<Assembly, Error> {
        let mut data = DataSegment::new();
        let mut symbols = SymbolTable::new();
        let code_size = arch::layout(Self::ARCH, ir, &X64Sizer, &mut data, &mut symbols)?;
        symbols.rebase_data(code_size);

        let unpositioned = |kind| Error::new(Self::ARCH, Position::default(), kind);
        let code =
            CodeBuffer::with_capacity(code_size as usize + data.len()).map_err(unpositioned)?;
        let mut asm = X64Assembler {
            code,
            symbols,
            relocations: Relocations::new(),
        };
        arch::emit_all(Self::ARCH, ir, &mut asm)?;

        let X64Assembler {
            mut code,
            symbols,
            relocations,
        } = asm;
        let relocated = relocations.len();
        relocations
            .resolve(&symbols, &mut code)
            .map_err(|(pos, kind)| Error::new(Self::ARCH, pos, kind))?;
        code.extend(&data.into_bytes()).map_err(unpositioned)?;

        debug!(
            code_size,
            total = code.len(),
            relocated,
            symbols = symbols.len(),
            "x86-64 generation complete"
        );

        Ok(Assembly {
            arch: Self::ARCH,
            code_size: code_size as usize,
            code: code.finish(),
            symbols,
            ram: Vec::new(),
        })
    }
}

impl Sizer for X64Assembler {
    fn size_of(&self, op: &Operation) -> Result<usize, ErrorKind> {
        X64Sizer.size_of(op)
    }
}

impl Emitter for X64Assembler {
    fn emit(&mut self, op: &Operation, pos: Position) -> Result<(), ErrorKind> {
        if let Some((op, dest, src)) = op.binary() {
            return self.emit_alu(op.into(), dest, src);
        }

        if let Some((condition, target)) = op.branch() {
            return self.emit_reference(Instr::Jcc(condition), target, Reference::Code, pos);
        }

        match op {
            Operation::Mov { dest, src } => {
                let dest = reg(*dest)?;
                match *src {
                    Source::Reg(src) => self.put(Instr::MovReg {
                        dest,
                        src: reg(src)?,
                    }),
                    Source::Imm(n) => self.put(Instr::MovImm { dest, imm: imm32(n)? }),
                }
            }
            Operation::Load { dest, addr } => self.put(Instr::Load {
                dest: reg(*dest)?,
                base: reg(*addr)?,
            }),
            Operation::Store { addr, src } => {
                let base = reg(*addr)?;
                match *src {
                    Source::Reg(src) => self.put(Instr::Store {
                        base,
                        src: reg(src)?,
                    }),
                    Source::Imm(n) => self.put(Instr::StoreImm { base, imm: imm32(n)? }),
                }
            }
            Operation::Not { dest } => self.put_group(Group::Not, *dest),
            Operation::Neg { dest } => self.put_group(Group::Neg, *dest),
            Operation::Inc { dest } => self.put_group(Group::Inc, *dest),
            Operation::Dec { dest } => self.put_group(Group::Dec, *dest),
            Operation::Shl { dest, count } => self.put(Instr::Shift {
                op: Group::Shl,
                reg: reg(*dest)?,
                count: shift_count(count)?,
            }),
            Operation::Shr { dest, count } => self.put(Instr::Shift {
                op: Group::Shr,
                reg: reg(*dest)?,
                count: shift_count(count)?,
            }),
            Operation::Cmp { a, b } => self.emit_alu(AluOp::Cmp, *a, *b),
            Operation::Jmp { target } => {
                self.emit_reference(Instr::Jmp, target, Reference::Code, pos)
            }
            Operation::Call { target } => {
                self.emit_reference(Instr::Call, target, Reference::Code, pos)
            }
            // no operating system to return to, halting leaves the routine
            Operation::Ret | Operation::Halt => self.put(Instr::Ret),
            Operation::Nop => self.put(Instr::Nop),
            Operation::Push { src } => self.put(Instr::Push(reg(*src)?)),
            Operation::Pop { dest } => self.put(Instr::Pop(reg(*dest)?)),
            Operation::Mul { dest, src } => {
                let dest = reg(*dest)?;
                match *src {
                    Source::Reg(src) => self.put(Instr::Imul {
                        dest,
                        src: reg(src)?,
                    }),
                    Source::Imm(n) => self.put(Instr::ImulImm {
                        dest,
                        src: dest,
                        imm: imm32(n)?,
                    }),
                }
            }
            Operation::Div { dest, src } => self.emit_divide(Divide::new(*dest, src, false)?, *src),
            Operation::Mod { dest, src } => self.emit_divide(Divide::new(*dest, src, true)?, *src),
            Operation::Int { vector } => {
                let vector = ErrorKind::check_range(*vector, 0, u8::MAX as i64)?;
                self.put(Instr::Int(vector as u8))
            }
            Operation::Set { name, src } => self.emit_set(name, *src, pos),
            Operation::Get { dest, name } => self.emit_get(*dest, name, pos),
            Operation::Setb { .. }
            | Operation::Clrb { .. }
            | Operation::Cplb { .. }
            | Operation::Jb { .. }
            | Operation::Jnb { .. }
            | Operation::Djnz { .. } => Err(ErrorKind::UnsupportedOpcode {
                mnemonic: op.mnemonic(),
            }),
            Operation::Label { .. }
            | Operation::Var { .. }
            | Operation::Buffer { .. }
            | Operation::Org { .. } => Ok(()),
            _ => unreachable!("binary operations and branches are emitted above"),
        }
    }

    fn current_offset(&self) -> usize {
        self.code.len()
    }

    fn pad(&mut self, count: usize) -> Result<(), ErrorKind> {
        let nop = Instr::Nop.encode();
        self.code.fill(nop[0], count)
    }
}

impl X64Assembler {
    fn put(&mut self, instr: Instr) -> Result<(), ErrorKind> {
        self.code.extend(&instr.encode())
    }

    fn put_group(&mut self, op: Group, dest: VirtualReg) -> Result<(), ErrorKind> {
        self.put(Instr::Group { op, reg: reg(dest)? })
    }

    /// Emits an instruction with a zeroed displacement and records a relocation for it.
    fn emit_reference(
        &mut self,
        instr: Instr,
        name: &str,
        reference: Reference,
        pos: Position,
    ) -> Result<(), ErrorKind> {
        let Some(displacement) = instr.displacement_offset() else {
            return Err(ErrorKind::addressing(format!(
                "{:?} does not reference a symbol",
                instr
            )));
        };

        let start = self.current_offset();
        self.put(instr)?;
        self.relocations.push(Relocation {
            name: name.to_owned(),
            patch_offset: start + displacement,
            end_offset: self.current_offset(),
            pos,
            reference,
        });

        Ok(())
    }

    fn emit_alu(&mut self, op: AluOp, dest: VirtualReg, src: Source) -> Result<(), ErrorKind> {
        let dest = reg(dest)?;
        match src {
            Source::Reg(src) => self.put(Instr::Alu {
                op,
                dest,
                src: reg(src)?,
            }),
            Source::Imm(n) => self.put(Instr::AluImm {
                op,
                dest,
                imm: imm32(n)?,
            }),
        }
    }

    fn emit_divide(&mut self, plan: Divide, src: Source) -> Result<(), ErrorKind> {
        let Divide { dest, scratch, .. } = plan;
        let saved = plan.saved();

        self.put(Instr::Push(scratch))?;
        match src {
            Source::Reg(src) => self.put(Instr::MovReg {
                dest: scratch,
                src: reg(src)?,
            })?,
            Source::Imm(n) => self.put(Instr::MovImm {
                dest: scratch,
                imm: imm32(n)?,
            })?,
        }

        for r in &saved {
            self.put(Instr::Push(*r))?;
        }
        if dest != Register::Rax {
            self.put(Instr::MovReg {
                dest: Register::Rax,
                src: dest,
            })?;
        }

        self.put(Instr::Cqo)?;
        self.put(Instr::Group {
            op: Group::Idiv,
            reg: scratch,
        })?;

        let result: Reg = plan.result();
        if dest != result {
            self.put(Instr::MovReg { dest, src: result })?;
        }
        for r in saved.iter().rev() {
            self.put(Instr::Pop(*r))?;
        }
        self.put(Instr::Pop(scratch))
    }

    fn emit_set(&mut self, name: &str, src: Source, pos: Position) -> Result<(), ErrorKind> {
        if matches!(self.symbols.get(name), Some(symbol) if symbol.kind == SymbolKind::Buffer) {
            return Err(ErrorKind::addressing(format!(
                "`{}` is a buffer and cannot be assigned, store through its address instead",
                name
            )));
        }

        let instr = match src {
            Source::Reg(src) => Instr::StoreRip { src: reg(src)? },
            Source::Imm(n) => Instr::StoreRipImm { imm: imm32(n)? },
        };
        self.emit_reference(instr, name, Reference::Data, pos)
    }

    /// Loads a variable's value, or a buffer's address.
    fn emit_get(&mut self, dest: VirtualReg, name: &str, pos: Position) -> Result<(), ErrorKind> {
        let dest = reg(dest)?;
        let instr = match self.symbols.get(name) {
            Some(symbol) if symbol.kind == SymbolKind::Buffer => Instr::LeaRip { dest },
            _ => Instr::LoadRip { dest },
        };
        self.emit_reference(instr, name, Reference::Data, pos)
    }
}
