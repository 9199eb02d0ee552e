use tracing::debug;
use ux::u3;

use crate::{
    ir::{BinaryOp, Condition, Instruction, Operation, Position, Source, VirtualReg},
    synthesize::{
        arch::{
            self, Arch, Assemble, Assembly, Emitter, Encode, Sizer,
            mcs51::{
                instr::{AluOp, B, Instr},
                ram::InternalRam,
                reg::{IndirectRegister, Reg, Register},
            },
        },
        buffer::CodeBuffer,
        error::{Error, ErrorKind},
        symbol::{SymbolKind, SymbolTable},
    },
};

pub mod instr;
pub mod ram;
pub mod reg;

/// Size of the program address space.
pub const PROGRAM_MEMORY: u64 = 0x10000;

const SHORT_JUMP_MIN: i64 = i8::MIN as i64;
const SHORT_JUMP_MAX: i64 = i8::MAX as i64;

/// Instruction sizes for the 8051. Every lowering in [Mcs51Assembler] must match this table.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mcs51Sizer;

impl Sizer for Mcs51Sizer {
    fn size_of(&self, op: &Operation) -> Result<usize, ErrorKind> {
        if let Some((op, _, _)) = op.binary() {
            // mov a, rd; [clr c]; op a, src; mov rd, a
            return Ok(if op == BinaryOp::Sub { 5 } else { 4 });
        }

        if let Some((condition, _)) = op.branch() {
            return Ok(match condition {
                Condition::Greater => 6,
                Condition::LessEqual => 4,
                _ => 2,
            });
        }

        let size = match op {
            Operation::Label { .. }
            | Operation::Var { .. }
            | Operation::Buffer { .. }
            | Operation::Org { .. } => 0,
            Operation::Mov { .. } | Operation::Load { .. } | Operation::Store { .. } => 2,
            Operation::Not { .. } => 3,
            Operation::Neg { .. } => 4,
            Operation::Shl { count, .. } | Operation::Shr { count, .. } => {
                4 + u8::from(shift_count(count)?) as usize
            }
            Operation::Cmp { .. } => 4,
            Operation::Jmp { .. } | Operation::Call { .. } => 3,
            Operation::Ret | Operation::Nop | Operation::Inc { .. } | Operation::Dec { .. } => 1,
            Operation::Halt => 2,
            Operation::Push { .. } | Operation::Pop { .. } => 2,
            Operation::Mul { src, .. } | Operation::Div { src, .. } => match src {
                Source::Reg(_) => 5,
                Source::Imm(_) => 6,
            },
            Operation::Mod { src, .. } => match src {
                Source::Reg(_) => 7,
                Source::Imm(_) => 8,
            },
            Operation::Set { src, .. } => match src {
                Source::Reg(_) => 2,
                Source::Imm(_) => 3,
            },
            Operation::Get { .. } => 2,
            Operation::Setb { .. } | Operation::Clrb { .. } | Operation::Cplb { .. } => 2,
            Operation::Jb { .. } | Operation::Jnb { .. } => 3,
            Operation::Djnz { .. } => 2,
            Operation::Int { .. } => {
                return Err(ErrorKind::UnsupportedOpcode {
                    mnemonic: op.mnemonic(),
                });
            }
            _ => unreachable!("binary operations and branches are sized above"),
        };

        Ok(size)
    }

    fn address_space(&self) -> Option<u64> {
        Some(PROGRAM_MEMORY)
    }
}

/// Shifts are unrolled into one rotate per bit, so the count must be a small immediate.
fn shift_count(count: &Source) -> Result<u3, ErrorKind> {
    match count {
        Source::Imm(n) => Ok(u3::new(ErrorKind::check_range(*n, 0, 7)? as u8)),
        Source::Reg(_) => Err(ErrorKind::addressing(
            "shift count must be an immediate on the 8051",
        )),
    }
}

/// Immediate data byte; accepts both signed and unsigned 8-bit values.
fn imm8(n: i64) -> Result<u8, ErrorKind> {
    Ok(ErrorKind::check_range(n, i8::MIN as i64, u8::MAX as i64)? as u8)
}

fn bit_address(bit: i64) -> Result<u8, ErrorKind> {
    Ok(ErrorKind::check_range(bit, 0, u8::MAX as i64)? as u8)
}

fn reg(vreg: VirtualReg) -> Result<Register, ErrorKind> {
    Register::from_vreg(vreg)
}

#[derive(Debug, Default)]
pub struct Mcs51Assembler {
    code: CodeBuffer,
    symbols: SymbolTable,
}

impl Assemble for Mcs51Assembler {
    const ARCH: Arch = Arch::Mcs51;

    fn assemble(ir: &[Instruction]) -> Result<Assembly, Error> {
        let mut ram = InternalRam::new();
        let mut symbols = SymbolTable::new();
        let code_size = arch::layout(Self::ARCH, ir, &Mcs51Sizer, &mut ram, &mut symbols)?;

        let code = CodeBuffer::with_capacity(code_size as usize)
            .map_err(|e| Error::new(Self::ARCH, Position::default(), e))?;
        let mut asm = Mcs51Assembler { code, symbols };
        arch::emit_all(Self::ARCH, ir, &mut asm)?;

        debug!(code_size, symbols = asm.symbols.len(), "8051 generation complete");

        Ok(Assembly {
            arch: Self::ARCH,
            code_size: asm.code.len(),
            code: asm.code.finish(),
            symbols: asm.symbols,
            ram: ram.into_image(),
        })
    }
}

impl Sizer for Mcs51Assembler {
    fn size_of(&self, op: &Operation) -> Result<usize, ErrorKind> {
        Mcs51Sizer.size_of(op)
    }
}

impl Emitter for Mcs51Assembler {
    fn emit(&mut self, op: &Operation, _pos: Position) -> Result<(), ErrorKind> {
        if let Some((op, dest, src)) = op.binary() {
            return self.emit_binary(op, dest, src);
        }

        if let Some((condition, target)) = op.branch() {
            return self.emit_branch(condition, target);
        }

        match op {
            Operation::Mov { dest, src } => self.emit_mov(*dest, *src),
            Operation::Load { dest, addr } => {
                let dest = reg(*dest)?;
                let ptr = IndirectRegister::from_vreg(*addr)?;
                self.put(Instr::MovAIndirect(ptr))?;
                self.put(Instr::MovRegA(dest))
            }
            Operation::Store { addr, src } => {
                let ptr = IndirectRegister::from_vreg(*addr)?;
                match *src {
                    Source::Reg(src) => {
                        self.put(Instr::MovAReg(reg(src)?))?;
                        self.put(Instr::MovIndirectA(ptr))
                    }
                    Source::Imm(n) => self.put(Instr::MovIndirectImm(ptr, imm8(n)?)),
                }
            }
            Operation::Not { dest } => self.emit_through_a(*dest, &[Instr::CplA]),
            Operation::Neg { dest } => self.emit_through_a(*dest, &[Instr::CplA, Instr::IncA]),
            Operation::Shl { dest, count } => self.emit_shift(*dest, count, Instr::RlA),
            Operation::Shr { dest, count } => self.emit_shift(*dest, count, Instr::RrA),
            Operation::Cmp { a, b } => {
                self.put(Instr::MovAReg(reg(*a)?))?;
                self.put(Instr::ClrC)?;
                self.emit_alu(AluOp::Subb, *b)
            }
            Operation::Jmp { target } => {
                let addr = self.absolute(target)?;
                self.put(Instr::Ljmp(addr))
            }
            Operation::Call { target } => {
                let addr = self.absolute(target)?;
                self.put(Instr::Lcall(addr))
            }
            Operation::Ret => self.put(Instr::Ret),
            Operation::Halt => self.put(Instr::Sjmp(-2)),
            Operation::Nop => self.put(Instr::Nop),
            Operation::Push { src } => self.put(Instr::Push(reg(*src)?.direct())),
            Operation::Pop { dest } => self.put(Instr::Pop(reg(*dest)?.direct())),
            Operation::Mul { dest, src } => self.emit_mul_div(*dest, *src, Instr::MulAB, false),
            Operation::Div { dest, src } => self.emit_mul_div(*dest, *src, Instr::DivAB, false),
            Operation::Mod { dest, src } => self.emit_mul_div(*dest, *src, Instr::DivAB, true),
            Operation::Inc { dest } => self.put(Instr::IncReg(reg(*dest)?)),
            Operation::Dec { dest } => self.put(Instr::DecReg(reg(*dest)?)),
            Operation::Int { .. } => Err(ErrorKind::UnsupportedOpcode {
                mnemonic: op.mnemonic(),
            }),
            Operation::Set { name, src } => self.emit_set(name, *src),
            Operation::Get { dest, name } => self.emit_get(*dest, name),
            Operation::Setb { bit } => self.put(Instr::SetbBit(bit_address(*bit)?)),
            Operation::Clrb { bit } => self.put(Instr::ClrBit(bit_address(*bit)?)),
            Operation::Cplb { bit } => self.put(Instr::CplBit(bit_address(*bit)?)),
            Operation::Jb { bit, target } => {
                let bit = bit_address(*bit)?;
                let rel = self.relative(target, 3)?;
                self.put(Instr::Jb(bit, rel))
            }
            Operation::Jnb { bit, target } => {
                let bit = bit_address(*bit)?;
                let rel = self.relative(target, 3)?;
                self.put(Instr::Jnb(bit, rel))
            }
            Operation::Djnz { reg: counter, target } => {
                let counter = reg(*counter)?;
                let rel = self.relative(target, 2)?;
                self.put(Instr::Djnz(counter, rel))
            }
            // handled by the pass driver, no code
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

impl Mcs51Assembler {
    fn put(&mut self, instr: Instr) -> Result<(), ErrorKind> {
        self.code.extend(&instr.encode())
    }

    /// Resolves a jump target to a 16-bit program address.
    fn absolute(&self, target: &str) -> Result<u16, ErrorKind> {
        let address = self.symbols.resolve_label(target)?;
        u16::try_from(address).map_err(|_| ErrorKind::ImmediateOutOfRange {
            value: address as i64,
            min: 0,
            max: u16::MAX as i64,
        })
    }

    /// Displacement from the end of a relative jump, `end` bytes from the current offset, to
    /// `target`.
    fn relative(&self, target: &str, end: usize) -> Result<i8, ErrorKind> {
        let address = self.symbols.resolve_label(target)? as i64;
        let from = (self.current_offset() + end) as i64;
        let displacement = address - from;

        if !(SHORT_JUMP_MIN..=SHORT_JUMP_MAX).contains(&displacement) {
            return Err(ErrorKind::BranchOutOfRange {
                target: target.to_owned(),
                displacement,
                min: SHORT_JUMP_MIN,
                max: SHORT_JUMP_MAX,
            });
        }

        Ok(displacement as i8)
    }

    fn emit_mov(&mut self, dest: VirtualReg, src: Source) -> Result<(), ErrorKind> {
        let dest = reg(dest)?;
        match src {
            Source::Reg(src) => {
                self.put(Instr::MovAReg(reg(src)?))?;
                self.put(Instr::MovRegA(dest))
            }
            Source::Imm(n) => self.put(Instr::MovRegImm(dest, imm8(n)?)),
        }
    }

    /// `op a, src` where `src` is a register or an immediate.
    fn emit_alu(&mut self, op: AluOp, src: Source) -> Result<(), ErrorKind> {
        match src {
            Source::Reg(src) => self.put(Instr::AluReg(op, reg(src)?)),
            Source::Imm(n) => self.put(Instr::AluImm(op, imm8(n)?)),
        }
    }

    /// Loads `dest` into the accumulator, applies `ops` and stores the result back.
    fn emit_through_a(&mut self, dest: VirtualReg, ops: &[Instr]) -> Result<(), ErrorKind> {
        let dest = reg(dest)?;
        self.put(Instr::MovAReg(dest))?;
        for op in ops {
            self.put(*op)?;
        }
        self.put(Instr::MovRegA(dest))
    }

    fn emit_binary(&mut self, op: BinaryOp, dest: VirtualReg, src: Source) -> Result<(), ErrorKind> {
        let dest = reg(dest)?;
        self.put(Instr::MovAReg(dest))?;
        if op == BinaryOp::Sub {
            self.put(Instr::ClrC)?;
        }
        self.emit_alu(op.into(), src)?;
        self.put(Instr::MovRegA(dest))
    }

    fn emit_shift(&mut self, dest: VirtualReg, count: &Source, rotate: Instr) -> Result<(), ErrorKind> {
        let count = u8::from(shift_count(count)?);
        let mask = match rotate {
            Instr::RlA => 0xFFu8 << count,
            _ => 0xFFu8 >> count,
        };

        let dest = reg(dest)?;
        self.put(Instr::MovAReg(dest))?;
        for _ in 0..count {
            self.put(rotate)?;
        }
        // clear the bits rotated in from the other end
        self.put(Instr::AluImm(AluOp::Anl, mask))?;
        self.put(Instr::MovRegA(dest))
    }

    /// Consumes the flags of a preceding `cmp`: carry means less (unsigned), a zero accumulator
    /// means equal.
    fn emit_branch(&mut self, condition: Condition, target: &str) -> Result<(), ErrorKind> {
        match condition {
            Condition::Equal => {
                let rel = self.relative(target, 2)?;
                self.put(Instr::Jz(rel))
            }
            Condition::NotEqual => {
                let rel = self.relative(target, 2)?;
                self.put(Instr::Jnz(rel))
            }
            Condition::Less => {
                let rel = self.relative(target, 2)?;
                self.put(Instr::Jc(rel))
            }
            Condition::GreaterEqual => {
                let rel = self.relative(target, 2)?;
                self.put(Instr::Jnc(rel))
            }
            Condition::Greater => {
                // jc skip; jz skip; sjmp target; skip:
                let rel = self.relative(target, 6)?;
                self.put(Instr::Jc(4))?;
                self.put(Instr::Jz(2))?;
                self.put(Instr::Sjmp(rel))
            }
            Condition::LessEqual => {
                let rel = self.relative(target, 2)?;
                self.put(Instr::Jc(rel))?;
                let rel = self.relative(target, 2)?;
                self.put(Instr::Jz(rel))
            }
        }
    }

    fn emit_mul_div(
        &mut self,
        dest: VirtualReg,
        src: Source,
        op: Instr,
        remainder: bool,
    ) -> Result<(), ErrorKind> {
        let dest = reg(dest)?;
        self.put(Instr::MovAReg(dest))?;
        match src {
            Source::Reg(src) => self.put(Instr::MovDirectReg(B, reg(src)?))?,
            Source::Imm(n) => self.put(Instr::MovDirectImm(B, imm8(n)?))?,
        }
        self.put(op)?;
        if remainder {
            self.put(Instr::MovADirect(B))?;
        }
        self.put(Instr::MovRegA(dest))
    }

    fn emit_set(&mut self, name: &str, src: Source) -> Result<(), ErrorKind> {
        let symbol = self.symbols.resolve_data(name)?;
        if symbol.kind == SymbolKind::Buffer {
            return Err(ErrorKind::addressing(format!(
                "`{}` is a buffer and cannot be assigned, store through its address instead",
                name
            )));
        }

        let direct = symbol.address as u8;
        match src {
            Source::Reg(src) => self.put(Instr::MovDirectReg(direct, reg(src)?)),
            Source::Imm(n) => self.put(Instr::MovDirectImm(direct, imm8(n)?)),
        }
    }

    fn emit_get(&mut self, dest: VirtualReg, name: &str) -> Result<(), ErrorKind> {
        let dest: Reg = reg(dest)?;
        let symbol = self.symbols.resolve_data(name)?;
        let direct = symbol.address as u8;

        match symbol.kind {
            SymbolKind::Buffer => self.put(Instr::MovRegImm(dest, direct)),
            _ => self.put(Instr::MovRegDirect(dest, direct)),
        }
    }
}
