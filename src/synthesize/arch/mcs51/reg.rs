use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use strum::{Display, EnumIter};

use crate::{ir::VirtualReg, synthesize::error::ErrorKind};

pub type Reg = Register;

/// Working registers of register bank 0.
#[repr(u8)]
#[derive(EnumIter, FromPrimitive, ToPrimitive, Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    R0 = 0, // indirect pointer
    R1 = 1, // indirect pointer
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
}

impl Register {
    pub const MAX: u8 = Register::R7 as u8;

    pub fn from_vreg(vreg: VirtualReg) -> Result<Self, ErrorKind> {
        Self::from_u8(vreg.0).ok_or(ErrorKind::RegisterOutOfRange {
            reg: vreg.0,
            max: Self::MAX,
        })
    }

    /// Low three bits of register-form opcodes.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Address of the register in internal RAM (bank 0 occupies 0x00-0x07).
    pub fn direct(self) -> u8 {
        self as u8
    }
}

/// The only registers usable as `@Ri` pointers.
#[repr(u8)]
#[derive(Display, Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndirectRegister {
    R0 = 0,
    R1 = 1,
}

impl IndirectRegister {
    pub fn from_vreg(vreg: VirtualReg) -> Result<Self, ErrorKind> {
        match Register::from_vreg(vreg)? {
            Register::R0 => Ok(Self::R0),
            Register::R1 => Ok(Self::R1),
            other => Err(ErrorKind::addressing(format!(
                "{} cannot be used for indirect addressing, only R0 and R1 can",
                other
            ))),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}
