use ux::u6;

use crate::{
    ir::{BinaryOp, Condition},
    synthesize::{
        arch::Encode,
        arch::x64::reg::{Reg, Register, Rex},
        buffer::Encoding,
    },
};

/// Two-operand ALU instructions, `op r/m64, r64` or `op r/m64, imm32` (`81 /digit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Or,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    fn opcode(self) -> u8 {
        match self {
            Self::Add => 0x01,
            Self::Or => 0x09,
            Self::And => 0x21,
            Self::Sub => 0x29,
            Self::Xor => 0x31,
            Self::Cmp => 0x39,
        }
    }

    fn extension(self) -> u8 {
        match self {
            Self::Add => 0,
            Self::Or => 1,
            Self::And => 4,
            Self::Sub => 5,
            Self::Xor => 6,
            Self::Cmp => 7,
        }
    }
}

impl From<BinaryOp> for AluOp {
    fn from(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => Self::Add,
            BinaryOp::Sub => Self::Sub,
            BinaryOp::And => Self::And,
            BinaryOp::Or => Self::Or,
            BinaryOp::Xor => Self::Xor,
        }
    }
}

/// Single-operand instructions selected by the ModRM reg field (`/digit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Inc,
    Dec,
    Not,
    Neg,
    Idiv,
    Shl,
    Shr,
}

impl Group {
    fn opcode(self) -> u8 {
        match self {
            Self::Inc | Self::Dec => 0xFF,
            Self::Not | Self::Neg | Self::Idiv => 0xF7,
            Self::Shl | Self::Shr => 0xC1,
        }
    }

    fn extension(self) -> u8 {
        match self {
            Self::Inc => 0,
            Self::Dec => 1,
            Self::Not => 2,
            Self::Neg => 3,
            Self::Shl => 4,
            Self::Shr => 5,
            Self::Idiv => 7,
        }
    }
}

/// Condition code nibble of `Jcc rel32` (`0F 8x`).
pub fn condition_code(condition: Condition) -> u8 {
    match condition {
        Condition::Equal => 0x4,
        Condition::NotEqual => 0x5,
        Condition::Less => 0xC,
        Condition::GreaterEqual => 0xD,
        Condition::LessEqual => 0xE,
        Condition::Greater => 0xF,
    }
}

/// Native x86-64 instructions used by the generator. All operate on 64-bit registers (REX.W).
///
/// Instructions referencing a label or a variable carry a zeroed 32-bit displacement that is
/// patched by a relocation; [displacement_offset](Instr::displacement_offset) tells where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// `mov r/m64, r64`
    MovReg { dest: Reg, src: Reg },
    /// `mov r/m64, imm32` (sign-extended)
    MovImm { dest: Reg, imm: i32 },
    /// `mov r64, [base]`
    Load { dest: Reg, base: Reg },
    /// `mov [base], r64`
    Store { base: Reg, src: Reg },
    /// `mov qword [base], imm32`
    StoreImm { base: Reg, imm: i32 },
    Alu { op: AluOp, dest: Reg, src: Reg },
    /// `op r/m64, imm32` (sign-extended)
    AluImm { op: AluOp, dest: Reg, imm: i32 },
    Group { op: Group, reg: Reg },
    /// Shift by an immediate count (`C1 /4 ib`, `C1 /5 ib`).
    Shift { op: Group, reg: Reg, count: u6 },
    /// `imul r64, r/m64`
    Imul { dest: Reg, src: Reg },
    /// `imul r64, r/m64, imm32`
    ImulImm { dest: Reg, src: Reg, imm: i32 },
    /// Sign-extend rax into rdx:rax.
    Cqo,
    Push(Reg),
    Pop(Reg),
    Jmp,
    Jcc(Condition),
    Call,
    Ret,
    Nop,
    Int(u8),
    /// `mov [rip + disp32], r64`
    StoreRip { src: Reg },
    /// `mov qword [rip + disp32], imm32`
    StoreRipImm { imm: i32 },
    /// `mov r64, [rip + disp32]`
    LoadRip { dest: Reg },
    /// `lea r64, [rip + disp32]`
    LeaRip { dest: Reg },
}

/// ModRM byte.
fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 0b111) << 3) | (rm & 0b111)
}

/// ModRM (and SIB/displacement) for a `[base]` memory operand.
///
/// rm=100 selects a SIB byte, so `[rsp]` is written as base=rsp, no index. mod=00 rm=101 means
/// rip-relative, so `[rbp]` is written as `[rbp + 0]` with an 8-bit displacement.
fn memory(reg: u8, base: Register) -> Encoding {
    match base {
        Register::Rsp => [modrm(0b00, reg, 0b100), 0x24].into(),
        Register::Rbp => [modrm(0b01, reg, 0b101), 0x00].into(),
        _ => [modrm(0b00, reg, base.code())].into(),
    }
}

/// ModRM for `[rip + disp32]` followed by the zeroed displacement.
fn rip_relative(reg: u8) -> Encoding {
    Encoding::new().byte(modrm(0b00, reg, 0b101)).with(&[0; 4])
}

const DIRECT: u8 = 0b11;

impl Encode for Instr {
    fn encode(&self) -> Encoding {
        let rex = Rex::W.prefix();

        match *self {
            Instr::MovReg { dest, src } => {
                [rex, 0x89, modrm(DIRECT, src.code(), dest.code())].into()
            }
            Instr::MovImm { dest, imm } => Encoding::new()
                .with(&[rex, 0xC7, modrm(DIRECT, 0, dest.code())])
                .with(&imm.to_le_bytes()),
            Instr::Load { dest, base } => Encoding::new()
                .with(&[rex, 0x8B])
                .with(&memory(dest.code(), base)),
            Instr::Store { base, src } => Encoding::new()
                .with(&[rex, 0x89])
                .with(&memory(src.code(), base)),
            Instr::StoreImm { base, imm } => Encoding::new()
                .with(&[rex, 0xC7])
                .with(&memory(0, base))
                .with(&imm.to_le_bytes()),
            Instr::Alu { op, dest, src } => {
                [rex, op.opcode(), modrm(DIRECT, src.code(), dest.code())].into()
            }
            Instr::AluImm { op, dest, imm } => Encoding::new()
                .with(&[rex, 0x81, modrm(DIRECT, op.extension(), dest.code())])
                .with(&imm.to_le_bytes()),
            Instr::Group { op, reg } => {
                [rex, op.opcode(), modrm(DIRECT, op.extension(), reg.code())].into()
            }
            Instr::Shift { op, reg, count } => [
                rex,
                op.opcode(),
                modrm(DIRECT, op.extension(), reg.code()),
                u8::from(count),
            ]
            .into(),
            Instr::Imul { dest, src } => {
                [rex, 0x0F, 0xAF, modrm(DIRECT, dest.code(), src.code())].into()
            }
            Instr::ImulImm { dest, src, imm } => Encoding::new()
                .with(&[rex, 0x69, modrm(DIRECT, dest.code(), src.code())])
                .with(&imm.to_le_bytes()),
            Instr::Cqo => [rex, 0x99].into(),
            Instr::Push(reg) => [0x50 | reg.code()].into(),
            Instr::Pop(reg) => [0x58 | reg.code()].into(),
            Instr::Jmp => [0xE9, 0, 0, 0, 0].into(),
            Instr::Jcc(condition) => [0x0F, 0x80 | condition_code(condition), 0, 0, 0, 0].into(),
            Instr::Call => [0xE8, 0, 0, 0, 0].into(),
            Instr::Ret => [0xC3].into(),
            Instr::Nop => [0x90].into(),
            Instr::Int(vector) => [0xCD, vector].into(),
            Instr::StoreRip { src } => Encoding::new()
                .with(&[rex, 0x89])
                .with(&rip_relative(src.code())),
            Instr::StoreRipImm { imm } => Encoding::new()
                .with(&[rex, 0xC7])
                .with(&rip_relative(0))
                .with(&imm.to_le_bytes()),
            Instr::LoadRip { dest } => Encoding::new()
                .with(&[rex, 0x8B])
                .with(&rip_relative(dest.code())),
            Instr::LeaRip { dest } => Encoding::new()
                .with(&[rex, 0x8D])
                .with(&rip_relative(dest.code())),
        }
    }
}

impl Instr {
    /// Offset of the 32-bit displacement placeholder within the encoding, for instructions that
    /// reference a symbol.
    pub fn displacement_offset(&self) -> Option<usize> {
        match self {
            Instr::Jmp | Instr::Call => Some(1),
            Instr::Jcc(_) => Some(2),
            Instr::StoreRip { .. }
            | Instr::StoreRipImm { .. }
            | Instr::LoadRip { .. }
            | Instr::LeaRip { .. } => Some(3),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(instr: Instr) -> Vec<u8> {
        instr.encode().to_vec()
    }

    #[test]
    fn mov_immediate() {
        assert_eq!(
            bytes(Instr::MovImm {
                dest: Register::Rax,
                imm: 10
            }),
            vec![0x48, 0xC7, 0xC0, 0x0A, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            bytes(Instr::MovImm {
                dest: Register::Rdi,
                imm: -1
            }),
            vec![0x48, 0xC7, 0xC7, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn mov_register() {
        // mov rbx, rcx
        assert_eq!(
            bytes(Instr::MovReg {
                dest: Register::Rbx,
                src: Register::Rcx
            }),
            vec![0x48, 0x89, 0xCB]
        );
    }

    #[test]
    fn memory_operands() {
        // mov rax, [rsi]
        assert_eq!(
            bytes(Instr::Load {
                dest: Register::Rax,
                base: Register::Rsi
            }),
            vec![0x48, 0x8B, 0x06]
        );
        // mov rax, [rsp]
        assert_eq!(
            bytes(Instr::Load {
                dest: Register::Rax,
                base: Register::Rsp
            }),
            vec![0x48, 0x8B, 0x04, 0x24]
        );
        // mov [rbp], rcx
        assert_eq!(
            bytes(Instr::Store {
                base: Register::Rbp,
                src: Register::Rcx
            }),
            vec![0x48, 0x89, 0x4D, 0x00]
        );
        // mov qword [rbx], 5
        assert_eq!(
            bytes(Instr::StoreImm {
                base: Register::Rbx,
                imm: 5
            }),
            vec![0x48, 0xC7, 0x03, 0x05, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn alu_and_groups() {
        // add rax, rcx
        assert_eq!(
            bytes(Instr::Alu {
                op: AluOp::Add,
                dest: Register::Rax,
                src: Register::Rcx
            }),
            vec![0x48, 0x01, 0xC8]
        );
        // cmp rdx, rbx
        assert_eq!(
            bytes(Instr::Alu {
                op: AluOp::Cmp,
                dest: Register::Rdx,
                src: Register::Rbx
            }),
            vec![0x48, 0x39, 0xDA]
        );
        // neg rsi
        assert_eq!(
            bytes(Instr::Group {
                op: Group::Neg,
                reg: Register::Rsi
            }),
            vec![0x48, 0xF7, 0xDE]
        );
        // idiv rcx
        assert_eq!(
            bytes(Instr::Group {
                op: Group::Idiv,
                reg: Register::Rcx
            }),
            vec![0x48, 0xF7, 0xF9]
        );
        // shl rax, 3
        assert_eq!(
            bytes(Instr::Shift {
                op: Group::Shl,
                reg: Register::Rax,
                count: u6::new(3)
            }),
            vec![0x48, 0xC1, 0xE0, 0x03]
        );
    }

    #[test]
    fn alu_immediate_forms() {
        // sub rsp, 16
        assert_eq!(
            bytes(Instr::AluImm {
                op: AluOp::Sub,
                dest: Register::Rsp,
                imm: 16
            }),
            vec![0x48, 0x81, 0xEC, 0x10, 0x00, 0x00, 0x00]
        );
        // cmp rsp, 8
        assert_eq!(
            bytes(Instr::AluImm {
                op: AluOp::Cmp,
                dest: Register::Rsp,
                imm: 8
            }),
            vec![0x48, 0x81, 0xFC, 0x08, 0x00, 0x00, 0x00]
        );
        // and rax, -1
        assert_eq!(
            bytes(Instr::AluImm {
                op: AluOp::And,
                dest: Register::Rax,
                imm: -1
            }),
            vec![0x48, 0x81, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn imul_forms() {
        // imul rax, rcx
        assert_eq!(
            bytes(Instr::Imul {
                dest: Register::Rax,
                src: Register::Rcx
            }),
            vec![0x48, 0x0F, 0xAF, 0xC1]
        );
        // imul rdx, rdx, 7
        assert_eq!(
            bytes(Instr::ImulImm {
                dest: Register::Rdx,
                src: Register::Rdx,
                imm: 7
            }),
            vec![0x48, 0x69, 0xD2, 0x07, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn control_transfer_placeholders() {
        assert_eq!(bytes(Instr::Jmp), vec![0xE9, 0, 0, 0, 0]);
        assert_eq!(bytes(Instr::Jcc(Condition::Less)), vec![0x0F, 0x8C, 0, 0, 0, 0]);
        assert_eq!(bytes(Instr::Call), vec![0xE8, 0, 0, 0, 0]);
        assert_eq!(Instr::Jcc(Condition::Equal).displacement_offset(), Some(2));
    }

    #[test]
    fn rip_relative_forms() {
        assert_eq!(
            bytes(Instr::LoadRip {
                dest: Register::Rcx
            }),
            vec![0x48, 0x8B, 0x0D, 0, 0, 0, 0]
        );
        assert_eq!(
            bytes(Instr::LeaRip {
                dest: Register::Rax
            }),
            vec![0x48, 0x8D, 0x05, 0, 0, 0, 0]
        );
        assert_eq!(
            bytes(Instr::StoreRipImm { imm: 2 }),
            vec![0x48, 0xC7, 0x05, 0, 0, 0, 0, 0x02, 0, 0, 0]
        );
    }
}
