use strum::{Display, EnumString};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Number(i64),
    Punct(Punct),
    Newline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    Comma,
    Colon,
    LeftBracket,
    RightBracket,
}

impl Punct {
    pub fn parse(c: char) -> Option<Self> {
        let punct = match c {
            ',' => Self::Comma,
            ':' => Self::Colon,
            '[' => Self::LeftBracket,
            ']' => Self::RightBracket,
            _ => return None,
        };

        Some(punct)
    }
}

#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mnemonic {
    Mov,
    Load,
    Store,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Not,
    Neg,
    Shl,
    Shr,
    Cmp,
    Jmp,
    Je,
    Jne,
    Jl,
    Jg,
    Jle,
    Jge,
    Call,
    Ret,
    Push,
    Pop,
    Mul,
    Div,
    Mod,
    Inc,
    Dec,
    Int,
    Var,
    Buffer,
    Set,
    Get,
    Org,
    Halt,
    Nop,
    Setb,
    Clrb,
    Cplb,
    Jb,
    Jnb,
    Djnz,
}

/// Register operands are written `r0`, `r1`, ...
pub fn register(ident: &str) -> Option<u8> {
    let digits = ident.strip_prefix(['r', 'R'])?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}
