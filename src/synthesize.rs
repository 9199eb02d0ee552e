pub mod arch;
pub mod buffer;
pub mod error;
pub mod exe;
pub mod reloc;
pub mod symbol;
