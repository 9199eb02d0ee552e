use derive_more::Deref;

use crate::synthesize::error::ErrorKind;

/// Append-only output buffer for machine code.
///
/// Storage grows geometrically (through [Vec]), but growth is requested with `try_reserve` so an
/// allocation failure is reported as [ErrorKind::OutOfMemory] rather than aborting. Calling
/// [finish](Self::finish) hands the bytes to the caller and consumes the buffer.
#[derive(Debug, Default, Deref)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, ErrorKind> {
        let mut buffer = Self::new();
        buffer.reserve(capacity)?;
        Ok(buffer)
    }

    fn reserve(&mut self, additional: usize) -> Result<(), ErrorKind> {
        if self.bytes.capacity() - self.bytes.len() >= additional {
            return Ok(());
        }

        // double at least, like Vec would
        let wanted = additional.max(self.bytes.capacity());
        self.bytes
            .try_reserve(wanted)
            .map_err(|_| ErrorKind::OutOfMemory)
    }

    pub fn push(&mut self, byte: u8) -> Result<(), ErrorKind> {
        self.reserve(1)?;
        self.bytes.push(byte);
        Ok(())
    }

    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        self.reserve(bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// Appends `count` copies of `byte`.
    pub fn fill(&mut self, byte: u8, count: usize) -> Result<(), ErrorKind> {
        self.reserve(count)?;
        self.bytes.resize(self.bytes.len() + count, byte);
        Ok(())
    }

    /// Overwrites already emitted bytes at `offset`.
    ///
    /// # Panics
    ///
    /// If the patched range is not inside the emitted code.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.bytes[offset..(offset + bytes.len())].copy_from_slice(bytes);
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Bytes of a single native instruction. Long enough for every encoding either architecture
/// produces.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    bytes: [u8; Self::CAPACITY],
    len: usize,
}

impl Encoding {
    pub const CAPACITY: usize = 15;

    pub fn new() -> Self {
        Self {
            bytes: [0; Self::CAPACITY],
            len: 0,
        }
    }

    pub fn with(mut self, bytes: &[u8]) -> Self {
        self.bytes[self.len..(self.len + bytes.len())].copy_from_slice(bytes);
        self.len += bytes.len();
        self
    }

    pub fn byte(self, byte: u8) -> Self {
        self.with(&[byte])
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&[u8]> for Encoding {
    fn from(bytes: &[u8]) -> Self {
        Self::new().with(bytes)
    }
}

impl<const N: usize> From<[u8; N]> for Encoding {
    fn from(bytes: [u8; N]) -> Self {
        Self::new().with(&bytes)
    }
}

impl std::ops::Deref for Encoding {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl std::fmt::Debug for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X?}", &self[..])
    }
}
