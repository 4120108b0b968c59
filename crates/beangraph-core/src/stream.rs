// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Byte-level stream primitives (LE scalars, LEB128 small ints, length-prefixed bytes).
//!
//! These are the raw building blocks under [`WriteContext`](crate::WriteContext) and
//! [`ReadContext`](crate::ReadContext). They know nothing about identity or beans.

use core::str;
use thiserror::Error;

/// Maximum number of bytes a LEB128-encoded `u32` may occupy.
const SMALL_INT_MAX_BYTES: usize = 5;

/// Errors produced by stream readers and writers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Attempted to read beyond the end of the buffer.
    #[error("buffer too short")]
    OutOfBounds,
    /// UTF-8 decoding failed.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// String length exceeded max bound.
    #[error("string too long")]
    StringTooLong,
    /// Length prefix exceeded max bound.
    #[error("length too large")]
    LengthTooLarge,
    /// A boolean byte was neither 0 nor 1.
    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),
    /// A LEB128 small int did not fit in a `u32`.
    #[error("small int overflows u32")]
    SmallIntOverflow,
}

/// Growable writer for little-endian scalars, small ints and length-prefixed bytes.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a boolean as a single `0`/`1` byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Write a little-endian u32.
    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian i64.
    pub fn write_i64_le(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an unsigned LEB128 integer (1..=5 bytes).
    ///
    /// Used for ids and counts, which are small in practice.
    pub fn write_small_u32(&mut self, value: u32) {
        let mut rest = value;
        loop {
            let low = rest.to_le_bytes()[0] & 0x7f;
            rest >>= 7;
            if rest == 0 {
                self.buf.push(low);
                return;
            }
            self.buf.push(low | 0x80);
        }
    }

    /// Write length-prefixed bytes (u32 LE length).
    pub fn write_len_prefixed_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let len: u32 = bytes
            .len()
            .try_into()
            .map_err(|_| StreamError::LengthTooLarge)?;
        self.write_u32_le(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Write a length-prefixed UTF-8 string with a max bound.
    pub fn write_string(&mut self, value: &str, max_len: usize) -> Result<(), StreamError> {
        let bytes = value.as_bytes();
        if bytes.len() > max_len {
            return Err(StreamError::StringTooLong);
        }
        self.write_len_prefixed_bytes(bytes)
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer and return the buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a borrowed byte slice, symmetric to [`Writer`].
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over the provided byte slice.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(StreamError::OutOfBounds)?;
        if end > self.bytes.len() {
            return Err(StreamError::OutOfBounds);
        }
        let out = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        let chunk = self.take(1)?;
        Ok(chunk[0])
    }

    /// Read a boolean written by [`Writer::write_bool`].
    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StreamError::InvalidBool(other)),
        }
    }

    /// Read a little-endian u32.
    pub fn read_u32_le(&mut self) -> Result<u32, StreamError> {
        let chunk = self.take(4)?;
        let raw: [u8; 4] = chunk.try_into().map_err(|_| StreamError::OutOfBounds)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Read a little-endian i64.
    pub fn read_i64_le(&mut self) -> Result<i64, StreamError> {
        let chunk = self.take(8)?;
        let raw: [u8; 8] = chunk.try_into().map_err(|_| StreamError::OutOfBounds)?;
        Ok(i64::from_le_bytes(raw))
    }

    /// Read an unsigned LEB128 integer written by [`Writer::write_small_u32`].
    pub fn read_small_u32(&mut self) -> Result<u32, StreamError> {
        let mut value: u32 = 0;
        let mut shift: u32 = 0;
        for index in 0..SMALL_INT_MAX_BYTES {
            let byte = self.read_u8()?;
            let bits = u32::from(byte & 0x7f);
            // Fifth byte may only carry the top 4 bits of a u32.
            if index == SMALL_INT_MAX_BYTES - 1 && bits > 0x0f {
                return Err(StreamError::SmallIntOverflow);
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(StreamError::SmallIntOverflow)
    }

    /// Read exactly `len` raw bytes.
    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        self.take(len)
    }

    /// Read a length-prefixed byte slice with a max bound.
    pub fn read_len_prefixed_bytes(&mut self, max_len: usize) -> Result<&'a [u8], StreamError> {
        let len = self.read_u32_le()? as usize;
        if len > max_len {
            return Err(StreamError::LengthTooLarge);
        }
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string with a max bound.
    pub fn read_string(&mut self, max_len: usize) -> Result<String, StreamError> {
        let bytes = self
            .read_len_prefixed_bytes(max_len)
            .map_err(|err| match err {
                StreamError::LengthTooLarge => StreamError::StringTooLong,
                other => other,
            })?;
        str::from_utf8(bytes)
            .map(ToString::to_string)
            .map_err(|_| StreamError::InvalidUtf8)
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    /// Returns `true` once every byte has been consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read offset (for diagnostics).
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn small_u32_uses_minimal_width() {
        for (value, width) in [(0u32, 1usize), (127, 1), (128, 2), (16_383, 2), (16_384, 3)] {
            let mut w = Writer::default();
            w.write_small_u32(value);
            assert_eq!(w.len(), width, "width of {value}");
        }
        let mut w = Writer::default();
        w.write_small_u32(u32::MAX);
        assert_eq!(w.into_vec(), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn small_u32_rejects_overlong_encodings() {
        let mut r = Reader::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert_eq!(r.read_small_u32(), Err(StreamError::SmallIntOverflow));

        let mut r = Reader::new(&[0xff, 0xff, 0xff, 0xff, 0x1f]);
        assert_eq!(r.read_small_u32(), Err(StreamError::SmallIntOverflow));
    }

    #[test]
    fn truncated_small_u32_is_out_of_bounds() {
        let mut r = Reader::new(&[0x80]);
        assert_eq!(r.read_small_u32(), Err(StreamError::OutOfBounds));
    }

    #[test]
    fn bool_rejects_non_canonical_bytes() {
        let mut r = Reader::new(&[1, 0, 2]);
        assert!(r.read_bool().unwrap());
        assert!(!r.read_bool().unwrap());
        assert_eq!(r.read_bool(), Err(StreamError::InvalidBool(2)));
    }

    #[test]
    fn string_bounds_are_enforced_on_both_sides() {
        let mut w = Writer::default();
        assert_eq!(w.write_string("abcdef", 3), Err(StreamError::StringTooLong));
        w.write_string("abcdef", 16).unwrap();
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_string(3), Err(StreamError::StringTooLong));
    }

    #[test]
    fn remaining_tracks_consumption() {
        let mut w = Writer::default();
        w.write_u32_le(7);
        w.write_i64_le(-1);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.remaining(), 12);
        assert_eq!(r.read_u32_le().unwrap(), 7);
        assert_eq!(r.read_i64_le().unwrap(), -1);
        assert!(r.is_exhausted());
    }
}
