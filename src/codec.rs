//! Little-endian primitives for the fixed block and transaction layouts.
//!
//! Encoders write through [`EncodeSink`] so the same code can fill a byte
//! buffer or stream straight into a SHA-256 digest. Decoders pull from a
//! [`Reader`] that tracks the unread tail of the input.

use crate::error::DecodeError;
use sha2::{Digest, Sha256};

/// Destination for encoded bytes.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);

    fn put_u8(&mut self, value: u8) {
        self.write(&[value]);
    }

    fn put_i16(&mut self, value: i16) {
        self.write(&value.to_le_bytes());
    }

    fn put_i32(&mut self, value: i32) {
        self.write(&value.to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.write(&value.to_le_bytes());
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl EncodeSink for Sha256 {
    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }
}

/// Cursor over a byte slice.
pub struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    /// Reads exactly `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.input.len() < n {
            return Err(DecodeError::UnexpectedEof {
                needed: n - self.input.len(),
            });
        }
        let (bytes, rest) = self.input.split_at(n);
        self.input = rest;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    /// Fails if any input is left unread.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut buf = Vec::new();
        buf.put_i32(1);
        buf.put_i16(-2);
        buf.put_i64(0x0102_0304_0506_0708);
        assert_eq!(&buf[..4], &[1, 0, 0, 0]);
        assert_eq!(&buf[4..6], &[0xfe, 0xff]);
        assert_eq!(&buf[6..], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn reader_reports_missing_bytes() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.read_i32(), Err(DecodeError::UnexpectedEof { needed: 1 }));
    }

    #[test]
    fn finish_rejects_trailing_bytes() {
        let mut r = Reader::new(&[7, 0, 9]);
        assert_eq!(r.read_i16().unwrap(), 7);
        assert_eq!(r.remaining(), 1);
        assert_eq!(r.finish(), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn hasher_sink_matches_buffer_digest() {
        let mut buf = Vec::new();
        buf.put_i64(42);
        buf.write(b"payload");

        let mut hasher = Sha256::new();
        hasher.put_i64(42);
        hasher.write(b"payload");

        assert_eq!(hasher.finalize().as_slice(), Sha256::digest(&buf).as_slice());
    }
}
