use tracing::trace;

use crate::synthesize::{arch::Allocate, error::ErrorKind};

/// Size of the directly addressable internal RAM.
pub const RAM_SIZE: usize = 0x80;

/// First byte after the register banks and the bit-addressable area.
pub const DATA_START: u8 = 0x30;

/// Allocates variables and buffers from directly addressable internal RAM, in declaration
/// order, and records their initial values.
#[derive(Debug)]
pub struct InternalRam {
    image: Vec<u8>,
    next: usize,
}

impl Default for InternalRam {
    fn default() -> Self {
        Self {
            image: vec![0; RAM_SIZE],
            next: DATA_START as usize,
        }
    }
}

impl InternalRam {
    pub fn new() -> Self {
        Self::default()
    }

    fn reserve(&mut self, len: usize, what: &'static str) -> Result<u64, ErrorKind> {
        let available = RAM_SIZE - self.next;
        if len > available {
            return Err(ErrorKind::StorageExhausted {
                what,
                needed: len as u64,
                available: available as u64,
            });
        }

        let address = self.next;
        self.next += len;
        trace!(address, len, "reserve internal ram");
        Ok(address as u64)
    }

    /// Initial RAM contents.
    pub fn into_image(self) -> Vec<u8> {
        self.image
    }
}

impl Allocate for InternalRam {
    fn variable(&mut self, init: Option<i64>) -> Result<u64, ErrorKind> {
        let init = ErrorKind::check_range(init.unwrap_or(0), -128, 255)?;
        let address = self.reserve(1, "internal RAM")?;
        self.image[address as usize] = init as u8;
        Ok(address)
    }

    fn buffer(&mut self, len: i64) -> Result<u64, ErrorKind> {
        let len = ErrorKind::check_range(len, 1, RAM_SIZE as i64)?;
        self.reserve(len as usize, "internal RAM")
    }
}
