use thiserror::Error as ThisError;

use crate::{ir::Position, synthesize::arch::Arch};

/// A fatal generation error, located at the instruction that caused it.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{arch}: {pos}: {kind}")]
pub struct Error {
    pub arch: Arch,
    pub pos: Position,
    pub kind: ErrorKind,
}

impl Error {
    pub fn new(arch: Arch, pos: Position, kind: ErrorKind) -> Self {
        Self { arch, pos, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ErrorKind {
    #[error("symbol `{name}` is already defined")]
    DuplicateSymbol { name: String },

    #[error("unresolved symbol `{name}`")]
    UnresolvedSymbol { name: String },

    #[error("register r{reg} is out of range (r0-r{max})")]
    RegisterOutOfRange { reg: u8, max: u8 },

    #[error("register r{reg} is not supported, only r0-r7 are available")]
    UnsupportedRegister { reg: u8 },

    #[error("immediate {value} is out of range ({min}..={max})")]
    ImmediateOutOfRange { value: i64, min: i64, max: i64 },

    #[error("jump to `{target}` is out of range (displacement {displacement}, allowed {min}..={max})")]
    BranchOutOfRange {
        target: String,
        displacement: i64,
        min: i64,
        max: i64,
    },

    #[error("{0}")]
    AddressingMode(String),

    #[error("`{mnemonic}` is not supported on this architecture")]
    UnsupportedOpcode { mnemonic: &'static str },

    #[error("out of {what} storage (need {needed} bytes, {available} left)")]
    StorageExhausted {
        what: &'static str,
        needed: u64,
        available: u64,
    },

    #[error("out of memory while growing the code buffer")]
    OutOfMemory,

    #[error("org {target:#x} would move the program counter backwards from {current:#x}")]
    AddressBackwards { target: i64, current: u64 },

    #[error("internal error: `{mnemonic}` sized as {expected} bytes but emitted {actual}")]
    SizeMismatch {
        mnemonic: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl ErrorKind {
    pub fn addressing(msg: impl ToString) -> Self {
        Self::AddressingMode(msg.to_string())
    }

    /// Checks that `value` fits in `min..=max`.
    pub fn check_range(value: i64, min: i64, max: i64) -> Result<i64, ErrorKind> {
        if (min..=max).contains(&value) {
            Ok(value)
        } else {
            Err(Self::ImmediateOutOfRange { value, min, max })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_arch_and_position() {
        let error = Error::new(
            Arch::Mcs51,
            Position::new(4, 2),
            ErrorKind::UnsupportedOpcode { mnemonic: "int" },
        );
        assert_eq!(
            error.to_string(),
            "8051: 4:2: `int` is not supported on this architecture"
        );
    }

    #[test]
    fn check_range_bounds() {
        assert_eq!(ErrorKind::check_range(255, -128, 255), Ok(255));
        assert_eq!(ErrorKind::check_range(-128, -128, 255), Ok(-128));
        assert_eq!(
            ErrorKind::check_range(256, -128, 255),
            Err(ErrorKind::ImmediateOutOfRange {
                value: 256,
                min: -128,
                max: 255
            })
        );
    }
}
