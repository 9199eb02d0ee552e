use std::fmt;

use derive_more::{Display, From};
use strum::IntoStaticStr;

/// 1-based source location of an instruction, used for diagnostics.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{line}:{column}")]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A register index as written in the IR. Each architecture decides which indices it accepts.
#[derive(Debug, Display, From, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("r{_0}")]
pub struct VirtualReg(pub u8);

/// Second operand of most operations, either a register or an immediate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Reg(VirtualReg),
    Imm(i64),
}

impl Source {
    /// Returns the virtual register if the source value is a register.
    pub fn reg(&self) -> Option<VirtualReg> {
        match self {
            Self::Reg(vreg) => Some(*vreg),
            _ => None,
        }
    }
}

impl From<VirtualReg> for Source {
    fn from(vreg: VirtualReg) -> Self {
        Self::Reg(vreg)
    }
}

impl From<i64> for Source {
    fn from(n: i64) -> Self {
        Self::Imm(n)
    }
}

/// Two-operand arithmetic/logical operations sharing one lowering per architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

/// Branch conditions, evaluated against the flags left by the preceding `cmp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

/// A virtual instruction. `Label` declares a label at the current address and carries nothing
/// else.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Label { name: String },

    Mov { dest: VirtualReg, src: Source },
    /// `dest = *addr`
    Load { dest: VirtualReg, addr: VirtualReg },
    /// `*addr = src`
    Store { addr: VirtualReg, src: Source },

    Add { dest: VirtualReg, src: Source },
    Sub { dest: VirtualReg, src: Source },
    And { dest: VirtualReg, src: Source },
    Or { dest: VirtualReg, src: Source },
    Xor { dest: VirtualReg, src: Source },
    Not { dest: VirtualReg },
    Neg { dest: VirtualReg },
    Shl { dest: VirtualReg, count: Source },
    Shr { dest: VirtualReg, count: Source },
    Cmp { a: VirtualReg, b: Source },

    Jmp { target: String },
    Je { target: String },
    Jne { target: String },
    Jl { target: String },
    Jg { target: String },
    Jle { target: String },
    Jge { target: String },
    Call { target: String },
    Ret,

    Push { src: VirtualReg },
    Pop { dest: VirtualReg },

    Mul { dest: VirtualReg, src: Source },
    Div { dest: VirtualReg, src: Source },
    Mod { dest: VirtualReg, src: Source },
    Inc { dest: VirtualReg },
    Dec { dest: VirtualReg },

    /// Software interrupt.
    Int { vector: i64 },

    Var { name: String, init: Option<i64> },
    Buffer { name: String, len: i64 },
    Set { name: String, src: Source },
    Get { dest: VirtualReg, name: String },

    /// Advances the program counter to `address`, padding with no-ops.
    Org { address: i64 },
    Halt,
    Nop,

    Setb { bit: i64 },
    Clrb { bit: i64 },
    Cplb { bit: i64 },
    Jb { bit: i64, target: String },
    Jnb { bit: i64, target: String },
    /// Decrement register and jump if the result is not zero.
    Djnz { reg: VirtualReg, target: String },
}

impl Operation {
    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }

    /// Splits two-operand arithmetic/logical operations into their common shape.
    pub fn binary(&self) -> Option<(BinaryOp, VirtualReg, Source)> {
        let op = match *self {
            Self::Add { dest, src } => (BinaryOp::Add, dest, src),
            Self::Sub { dest, src } => (BinaryOp::Sub, dest, src),
            Self::And { dest, src } => (BinaryOp::And, dest, src),
            Self::Or { dest, src } => (BinaryOp::Or, dest, src),
            Self::Xor { dest, src } => (BinaryOp::Xor, dest, src),
            _ => return None,
        };

        Some(op)
    }

    /// Splits conditional jumps into condition and target.
    pub fn branch(&self) -> Option<(Condition, &str)> {
        let branch = match self {
            Self::Je { target } => (Condition::Equal, target),
            Self::Jne { target } => (Condition::NotEqual, target),
            Self::Jl { target } => (Condition::Less, target),
            Self::Jg { target } => (Condition::Greater, target),
            Self::Jle { target } => (Condition::LessEqual, target),
            Self::Jge { target } => (Condition::GreaterEqual, target),
            _ => return None,
        };

        Some((branch.0, branch.1.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub op: Operation,
    pub pos: Position,
}

impl Instruction {
    pub fn new(op: Operation, pos: Position) -> Self {
        Self { op, pos }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Imm(n) => write!(f, "{}", n),
            Source::Reg(vreg) => write!(f, "{}", vreg),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.mnemonic();
        match self {
            Operation::Label { name } => write!(f, "{}:", name),
            Operation::Mov { dest, src }
            | Operation::Add { dest, src }
            | Operation::Sub { dest, src }
            | Operation::And { dest, src }
            | Operation::Or { dest, src }
            | Operation::Xor { dest, src }
            | Operation::Mul { dest, src }
            | Operation::Div { dest, src }
            | Operation::Mod { dest, src } => write!(f, "    {} {}, {}", mnemonic, dest, src),
            Operation::Shl { dest, count } | Operation::Shr { dest, count } => {
                write!(f, "    {} {}, {}", mnemonic, dest, count)
            }
            Operation::Cmp { a, b } => write!(f, "    {} {}, {}", mnemonic, a, b),
            Operation::Load { dest, addr } => write!(f, "    {} {}, [{}]", mnemonic, dest, addr),
            Operation::Store { addr, src } => write!(f, "    {} [{}], {}", mnemonic, addr, src),
            Operation::Not { dest }
            | Operation::Neg { dest }
            | Operation::Inc { dest }
            | Operation::Dec { dest }
            | Operation::Pop { dest } => write!(f, "    {} {}", mnemonic, dest),
            Operation::Push { src } => write!(f, "    {} {}", mnemonic, src),
            Operation::Jmp { target }
            | Operation::Je { target }
            | Operation::Jne { target }
            | Operation::Jl { target }
            | Operation::Jg { target }
            | Operation::Jle { target }
            | Operation::Jge { target }
            | Operation::Call { target } => write!(f, "    {} {}", mnemonic, target),
            Operation::Int { vector } => write!(f, "    {} {}", mnemonic, vector),
            Operation::Var { name, init } => match init {
                Some(init) => write!(f, "    {} {}, {}", mnemonic, name, init),
                None => write!(f, "    {} {}", mnemonic, name),
            },
            Operation::Buffer { name, len } => write!(f, "    {} {}, {}", mnemonic, name, len),
            Operation::Set { name, src } => write!(f, "    {} {}, {}", mnemonic, name, src),
            Operation::Get { dest, name } => write!(f, "    {} {}, {}", mnemonic, dest, name),
            Operation::Org { address } => write!(f, "    {} {:#x}", mnemonic, address),
            Operation::Setb { bit } | Operation::Clrb { bit } | Operation::Cplb { bit } => {
                write!(f, "    {} {}", mnemonic, bit)
            }
            Operation::Jb { bit, target } | Operation::Jnb { bit, target } => {
                write!(f, "    {} {}, {}", mnemonic, bit, target)
            }
            Operation::Djnz { reg, target } => write!(f, "    {} {}, {}", mnemonic, reg, target),
            Operation::Ret | Operation::Halt | Operation::Nop => write!(f, "    {}", mnemonic),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)
    }
}
