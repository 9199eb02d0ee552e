use crate::{
    ir::BinaryOp,
    synthesize::{
        arch::Encode,
        arch::mcs51::reg::{IndirectRegister, Reg},
        buffer::Encoding,
    },
};

/// Direct address of the B register.
pub const B: u8 = 0xF0;

/// Accumulator operations with a second operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    /// Subtract with borrow. Clear the carry first for a plain subtraction.
    Subb,
    Anl,
    Orl,
    Xrl,
}

impl AluOp {
    fn imm_opcode(self) -> u8 {
        match self {
            Self::Add => 0x24,
            Self::Subb => 0x94,
            Self::Anl => 0x54,
            Self::Orl => 0x44,
            Self::Xrl => 0x64,
        }
    }

    fn reg_opcode(self) -> u8 {
        match self {
            Self::Add => 0x28,
            Self::Subb => 0x98,
            Self::Anl => 0x58,
            Self::Orl => 0x48,
            Self::Xrl => 0x68,
        }
    }
}

impl From<BinaryOp> for AluOp {
    fn from(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => Self::Add,
            BinaryOp::Sub => Self::Subb,
            BinaryOp::And => Self::Anl,
            BinaryOp::Or => Self::Orl,
            BinaryOp::Xor => Self::Xrl,
        }
    }
}

/// Native MCS-51 instructions used by the generator.
///
/// Register forms put the register number in the low three bits of the opcode (`Rn`), indirect
/// forms in the lowest bit (`@Ri`). Relative jumps take a signed displacement from the address
/// following the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// `MOV A, Rn`: `1110 1rrr`
    MovAReg(Reg),
    /// `MOV Rn, A`: `1111 1rrr`
    MovRegA(Reg),
    /// `MOV Rn, #data`: `0111 1rrr`, data
    MovRegImm(Reg, u8),
    /// `MOV A, @Ri`: `1110 011i`
    MovAIndirect(IndirectRegister),
    /// `MOV @Ri, A`: `1111 011i`
    MovIndirectA(IndirectRegister),
    /// `MOV @Ri, #data`: `0111 011i`, data
    MovIndirectImm(IndirectRegister, u8),
    /// `MOV direct, Rn`: `1000 1rrr`, direct
    MovDirectReg(u8, Reg),
    /// `MOV direct, #data`: `0x75`, direct, data
    MovDirectImm(u8, u8),
    /// `MOV Rn, direct`: `1010 1rrr`, direct
    MovRegDirect(Reg, u8),
    /// `MOV A, direct`: `0xE5`, direct
    MovADirect(u8),

    /// Accumulator operation with an immediate, e.g. `ADD A, #data`.
    AluImm(AluOp, u8),
    /// Accumulator operation with a working register: register-form opcode followed by the
    /// register's bank-0 address.
    AluReg(AluOp, Reg),

    ClrC,
    CplA,
    IncA,
    /// Rotate accumulator left.
    RlA,
    /// Rotate accumulator right.
    RrA,
    IncReg(Reg),
    DecReg(Reg),
    MulAB,
    DivAB,

    /// `LJMP addr16`
    Ljmp(u16),
    /// `LCALL addr16`
    Lcall(u16),
    Sjmp(i8),
    /// Jump if carry set.
    Jc(i8),
    Jnc(i8),
    /// Jump if accumulator is zero.
    Jz(i8),
    Jnz(i8),
    Jb(u8, i8),
    Jnb(u8, i8),
    Djnz(Reg, i8),
    Ret,
    Nop,

    Push(u8),
    Pop(u8),

    SetbBit(u8),
    ClrBit(u8),
    CplBit(u8),
}

impl Encode for Instr {
    fn encode(&self) -> Encoding {
        let rel = |r: i8| r as u8;

        match *self {
            Instr::MovAReg(r) => [0xE8 | r.code()].into(),
            Instr::MovRegA(r) => [0xF8 | r.code()].into(),
            Instr::MovRegImm(r, data) => [0x78 | r.code(), data].into(),
            Instr::MovAIndirect(i) => [0xE6 | i.code()].into(),
            Instr::MovIndirectA(i) => [0xF6 | i.code()].into(),
            Instr::MovIndirectImm(i, data) => [0x76 | i.code(), data].into(),
            Instr::MovDirectReg(direct, r) => [0x88 | r.code(), direct].into(),
            Instr::MovDirectImm(direct, data) => [0x75, direct, data].into(),
            Instr::MovRegDirect(r, direct) => [0xA8 | r.code(), direct].into(),
            Instr::MovADirect(direct) => [0xE5, direct].into(),

            Instr::AluImm(op, data) => [op.imm_opcode(), data].into(),
            Instr::AluReg(op, r) => [op.reg_opcode(), r.direct()].into(),

            Instr::ClrC => [0xC3].into(),
            Instr::CplA => [0xF4].into(),
            Instr::IncA => [0x04].into(),
            Instr::RlA => [0x23].into(),
            Instr::RrA => [0x03].into(),
            Instr::IncReg(r) => [0x08 | r.code()].into(),
            Instr::DecReg(r) => [0x18 | r.code()].into(),
            Instr::MulAB => [0xA4].into(),
            Instr::DivAB => [0x84].into(),

            Instr::Ljmp(addr) => Encoding::new().byte(0x02).with(&addr.to_be_bytes()),
            Instr::Lcall(addr) => Encoding::new().byte(0x12).with(&addr.to_be_bytes()),
            Instr::Sjmp(r) => [0x80, rel(r)].into(),
            Instr::Jc(r) => [0x40, rel(r)].into(),
            Instr::Jnc(r) => [0x50, rel(r)].into(),
            Instr::Jz(r) => [0x60, rel(r)].into(),
            Instr::Jnz(r) => [0x70, rel(r)].into(),
            Instr::Jb(bit, r) => [0x20, bit, rel(r)].into(),
            Instr::Jnb(bit, r) => [0x30, bit, rel(r)].into(),
            Instr::Djnz(reg, r) => [0xD8 | reg.code(), rel(r)].into(),
            Instr::Ret => [0x22].into(),
            Instr::Nop => [0x00].into(),

            Instr::Push(direct) => [0xC0, direct].into(),
            Instr::Pop(direct) => [0xD0, direct].into(),

            Instr::SetbBit(bit) => [0xD2, bit].into(),
            Instr::ClrBit(bit) => [0xC2, bit].into(),
            Instr::CplBit(bit) => [0xB2, bit].into(),
        }
    }
}
