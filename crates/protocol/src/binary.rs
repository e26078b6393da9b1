//! Little-endian binary reader and writer used by every frame in this crate.
//!
//! Reads are bounds-checked and fail with [`ProtocolError::UnexpectedEof`]
//! instead of panicking, so a truncated buffer is rejected as a whole.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;

macro_rules! checked_get {
    ($name:ident, $ty:ty, $size:expr, $get:ident) => {
        #[inline]
        pub fn $name(&mut self) -> Result<$ty, ProtocolError> {
            self.need($size)?;
            Ok(self.buf.$get())
        }
    };
}

/// A reader over a received frame.
#[derive(Debug)]
pub struct BinaryReader {
    buf: Bytes,
}

impl BinaryReader {
    /// Create a new reader from raw bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { buf: data.into() }
    }

    /// Returns remaining bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(())
    }

    /// Skip `n` bytes, failing if fewer are left.
    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.need(n)?;
        self.buf.advance(n);
        Ok(())
    }

    checked_get!(get_u8, u8, 1, get_u8);
    checked_get!(get_u16, u16, 2, get_u16_le);
    checked_get!(get_i16, i16, 2, get_i16_le);
    checked_get!(get_u32, u32, 4, get_u32_le);
    checked_get!(get_u64, u64, 8, get_u64_le);
    checked_get!(get_f32, f32, 4, get_f32_le);

    /// Split off the next `n` bytes without copying.
    pub fn get_bytes(&mut self, n: usize) -> Result<Bytes, ProtocolError> {
        self.need(n)?;
        Ok(self.buf.split_to(n))
    }

    /// Fails with [`ProtocolError::TrailingBytes`] if anything is left unread.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

/// A writer for building outgoing frames.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    #[inline]
    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    /// Write raw bytes.
    pub fn put_slice(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Overwrite a byte written earlier, used for flag bytes whose bits are
    /// only known after the payload that follows them.
    #[inline]
    pub fn set_u8(&mut self, at: usize, v: u8) {
        self.buf[at] = v;
    }

    /// Consume the writer and return the built buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Get current buffer as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_roundtrip() {
        let mut w = BinaryWriter::new();
        w.put_u8(7);
        w.put_i16(-1234);
        w.put_u32(0xDEADBEEF);
        w.put_f32(1.5);
        w.put_u64(u64::MAX - 1);
        let mut r = BinaryReader::new(w.finish());
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_i16().unwrap(), -1234);
        assert_eq!(r.get_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.get_f32().unwrap(), 1.5);
        assert_eq!(r.get_u64().unwrap(), u64::MAX - 1);
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_truncated_read_fails() {
        let mut r = BinaryReader::new(vec![1u8, 2, 3]);
        assert!(matches!(r.get_u32(), Err(ProtocolError::UnexpectedEof)));
        // A failed read consumes nothing.
        assert_eq!(r.remaining(), 3);
        assert_eq!(r.get_u16().unwrap(), 0x0201);
        assert!(matches!(r.finish(), Err(ProtocolError::TrailingBytes(1))));
    }

    #[test]
    fn test_set_u8_patches_flag_byte() {
        let mut w = BinaryWriter::new();
        w.put_u8(0);
        w.put_u16(5);
        w.set_u8(0, 0x40);
        assert_eq!(w.as_slice(), &[0x40, 5, 0]);
    }
}
