//! Little-endian binary reader/writer for the OPC UA wire encoding.
//!
//! Strings and byte-strings carry an `i32` length prefix where `-1` encodes
//! null. All multi-byte integers are little-endian.

use crate::error::UaError;
use crate::status::{self};

/// Cursor-style reader over a byte slice.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes remaining after the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Current cursor position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Advance the cursor without reading.
    pub fn skip(&mut self, n: usize) -> Result<(), UaError> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], UaError> {
        if self.remaining() < n {
            return Err(UaError::new(
                status::BAD_DECODING_ERROR,
                format!("need {n} bytes, have {}", self.remaining()),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, UaError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, UaError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("length checked")))
    }

    pub fn read_i16(&mut self) -> Result<i16, UaError> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().expect("length checked")))
    }

    pub fn read_u32(&mut self) -> Result<u32, UaError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("length checked")))
    }

    pub fn read_i32(&mut self) -> Result<i32, UaError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().expect("length checked")))
    }

    pub fn read_u64(&mut self) -> Result<u64, UaError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("length checked")))
    }

    pub fn read_i64(&mut self) -> Result<i64, UaError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("length checked")))
    }

    pub fn read_f32(&mut self) -> Result<f32, UaError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().expect("length checked")))
    }

    pub fn read_f64(&mut self) -> Result<f64, UaError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().expect("length checked")))
    }

    /// Read a byte-string: `i32` length, `-1` = null.
    pub fn read_byte_string(&mut self) -> Result<Option<Vec<u8>>, UaError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.take(len as usize)?.to_vec()))
    }

    /// Read a UTF-8 string: `i32` length, `-1` = null.
    pub fn read_string(&mut self) -> Result<Option<String>, UaError> {
        match self.read_byte_string()? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| UaError::new(status::BAD_DECODING_ERROR, "string is not valid UTF-8")),
        }
    }

    /// Read the rest of the buffer.
    #[must_use]
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

/// Growable little-endian writer.
#[derive(Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Write a byte-string with `i32` length prefix; `None` encodes as `-1`.
    pub fn write_byte_string(&mut self, v: Option<&[u8]>) {
        match v {
            None => self.write_i32(-1),
            Some(bytes) => {
                self.write_i32(bytes.len() as i32);
                self.buf.extend_from_slice(bytes);
            }
        }
    }

    /// Write a string with `i32` length prefix; `None` encodes as `-1`.
    pub fn write_string(&mut self, v: Option<&str>) {
        self.write_byte_string(v.map(str::as_bytes));
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}
