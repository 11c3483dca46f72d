//! Bounds-checked little-endian cursor
//!
//! Every read checks the remaining length first, so malformed input
//! produces [`DecodeError::UnexpectedEnd`] instead of an out-of-bounds read.

use crate::error::{DecodeError, DecodeResult};

/// Cursor over a byte slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at offset 0
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Start reading at `pos`
    pub fn at(bytes: &'a [u8], pos: usize) -> DecodeResult<Self> {
        let mut reader = Self::new(bytes);
        reader.seek(pos)?;
        Ok(reader)
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Check if all input was consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Move to an absolute offset (the end of input is a valid position)
    pub fn seek(&mut self, pos: usize) -> DecodeResult<()> {
        if pos > self.bytes.len() {
            return Err(DecodeError::UnexpectedEnd {
                offset: self.bytes.len(),
                needed: pos - self.bytes.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Take the next `len` bytes
    pub fn take(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEnd {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a `u8`
    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    /// Read a little-endian `u16`
    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        self.array().map(u16::from_le_bytes)
    }

    /// Read a little-endian `u32`
    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    /// Read a little-endian `u64`
    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        self.array().map(u64::from_le_bytes)
    }

    /// Read a little-endian `f64`
    pub fn read_f64(&mut self) -> DecodeResult<f64> {
        self.array().map(f64::from_le_bytes)
    }

    /// Read `len` bytes as UTF-8
    pub fn read_str(&mut self, len: usize) -> DecodeResult<&'a str> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }
}
