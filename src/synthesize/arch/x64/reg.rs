use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use strum::{Display, EnumIter};

use crate::{ir::VirtualReg, synthesize::error::ErrorKind};

pub type Reg = Register;

/// The low eight general-purpose registers, numbered by their hardware encoding.
#[repr(u8)]
#[derive(EnumIter, FromPrimitive, ToPrimitive, Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Register {
    Rax = 0, // return value, dividend / quotient
    Rcx = 1,
    Rdx = 2, // high word of the dividend / remainder
    Rbx = 3,
    Rsp = 4, // stack pointer, needs a SIB byte as a memory base
    Rbp = 5, // frame pointer, needs a displacement as a memory base
    Rsi = 6,
    Rdi = 7,
}

/// Registers that need REX.B/REX.R and are therefore not available.
const HIGH_REGISTERS: std::ops::RangeInclusive<u8> = 8..=15;

/// Scratch registers for immediates and divisors, in order of preference.
const SCRATCH: [Register; 4] = [Register::Rcx, Register::Rbx, Register::Rsi, Register::Rdi];

impl Register {
    pub const MAX: u8 = Register::Rdi as u8;

    pub fn from_vreg(vreg: VirtualReg) -> Result<Self, ErrorKind> {
        if HIGH_REGISTERS.contains(&vreg.0) {
            return Err(ErrorKind::UnsupportedRegister { reg: vreg.0 });
        }

        Self::from_u8(vreg.0).ok_or(ErrorKind::RegisterOutOfRange {
            reg: vreg.0,
            max: Self::MAX,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// A scratch register that is none of `avoid`.
    pub fn scratch(avoid: &[Register]) -> Register {
        SCRATCH
            .into_iter()
            .find(|r| !avoid.contains(r))
            .unwrap_or(Register::Rdi)
    }

    /// Extra bytes needed when this register is the base of a memory operand.
    pub fn base_overhead(self) -> usize {
        match self {
            Register::Rsp | Register::Rbp => 1,
            _ => 0,
        }
    }
}

bitflags! {
    /// REX prefix bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rex: u8 {
        /// Extension of the ModRM r/m or SIB base field.
        const B = 0b0001;
        /// Extension of the SIB index field.
        const X = 0b0010;
        /// Extension of the ModRM reg field.
        const R = 0b0100;
        /// 64-bit operand size.
        const W = 0b1000;
    }
}

impl Rex {
    pub fn prefix(self) -> u8 {
        0x40 | self.bits()
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn low_registers_map_to_hardware_codes() {
        for reg in Register::iter() {
            assert_eq!(Register::from_vreg(VirtualReg(reg.code())), Ok(reg));
        }
        assert_eq!(Register::Rsp.to_string(), "rsp");
    }

    #[test]
    fn high_registers_are_unsupported() {
        for n in 8..=15 {
            assert_eq!(
                Register::from_vreg(VirtualReg(n)),
                Err(ErrorKind::UnsupportedRegister { reg: n })
            );
        }
        assert_eq!(
            Register::from_vreg(VirtualReg(16)),
            Err(ErrorKind::RegisterOutOfRange { reg: 16, max: 7 })
        );
    }

    #[test]
    fn scratch_avoids_destination() {
        assert_eq!(Register::scratch(&[Register::Rax]), Register::Rcx);
        assert_eq!(Register::scratch(&[Register::Rcx]), Register::Rbx);
        assert_eq!(
            Register::scratch(&[Register::Rcx, Register::Rbx]),
            Register::Rsi
        );
    }

    #[test]
    fn rex_w_prefix() {
        assert_eq!(Rex::W.prefix(), 0x48);
        assert_eq!((Rex::W | Rex::B).prefix(), 0x49);
    }
}
