use tracing::trace;

use crate::synthesize::{arch::Allocate, error::ErrorKind};

/// Size of a scalar variable.
pub const WORD_SIZE: usize = 8;

/// Data region appended after the code. Variables take one little-endian word holding their
/// initial value and buffers are zero filled, laid out in declaration order.
///
/// Addresses handed out are offsets into the region. They are rebased onto the end of the code
/// once its size is known.
#[derive(Debug, Default)]
pub struct DataSegment {
    bytes: Vec<u8>,
}

impl DataSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn append(&mut self, bytes: impl ExactSizeIterator<Item = u8>) -> Result<u64, ErrorKind> {
        let offset = self.bytes.len();
        self.bytes
            .try_reserve(bytes.len())
            .map_err(|_| ErrorKind::OutOfMemory)?;
        self.bytes.extend(bytes);

        trace!(offset, len = self.bytes.len() - offset, "reserve data");
        Ok(offset as u64)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Allocate for DataSegment {
    fn variable(&mut self, init: Option<i64>) -> Result<u64, ErrorKind> {
        self.append(init.unwrap_or(0).to_le_bytes().into_iter())
    }

    fn buffer(&mut self, len: i64) -> Result<u64, ErrorKind> {
        // displacements to the region are 32-bit
        let len = ErrorKind::check_range(len, 1, i32::MAX as i64)?;
        self.append(std::iter::repeat_n(0, len as usize))
    }
}
