//! Byte buffers used by [`crate::StoreCodec`] implementations.
//!
//! Fixed-width integers are little-endian. Variable-length integers use LEB128 (signed values are
//! zigzag-encoded first). Byte arrays and strings carry a varint length prefix.

use crate::error::{Result, StorageError};

const MAX_VARINT_BYTES: usize = 10;

#[derive(Debug, Default, Clone)]
pub struct CodecBuffer {
    bytes: Vec<u8>,
}

impl CodecBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u128(&mut self, value: u128) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.bytes.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.bytes.push(value as u8);
    }

    pub fn write_varint_i64(&mut self, value: i64) {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Append without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

/// Cursor over an encoded byte slice.
#[derive(Debug)]
pub struct CodecReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> CodecReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(StorageError::decode(format!(
                "unexpected end of buffer: need {len} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StorageError::decode(format!("invalid bool byte {other}"))),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128> {
        Ok(u128::from_le_bytes(self.take_array()?))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(StorageError::decode("varint is too long"))
    }

    pub fn read_varint_i64(&mut self) -> Result<i64> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| StorageError::decode(format!("length {len} overflows usize")))?;
        self.take(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|err| StorageError::decode(err.to_string()))
    }

    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Fails when trailing bytes remain.
    pub fn finish(self) -> Result<()> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(StorageError::decode(format!(
                "{} trailing bytes after decode",
                self.remaining()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varints_use_minimal_width() {
        let mut buf = CodecBuffer::new();
        buf.write_varint(0);
        buf.write_varint(127);
        buf.write_varint(128);
        buf.write_varint(u64::MAX);
        assert_eq!(buf.len(), 1 + 1 + 2 + 10);

        let mut reader = CodecReader::new(buf.as_slice());
        assert_eq!(reader.read_varint().unwrap(), 0);
        assert_eq!(reader.read_varint().unwrap(), 127);
        assert_eq!(reader.read_varint().unwrap(), 128);
        assert_eq!(reader.read_varint().unwrap(), u64::MAX);
        reader.finish().unwrap();
    }

    #[test]
    fn signed_varints_are_zigzag_encoded() {
        let mut buf = CodecBuffer::new();
        buf.write_varint_i64(-1);
        buf.write_varint_i64(i64::MIN);
        assert_eq!(buf.as_slice()[0], 1);

        let mut reader = CodecReader::new(buf.as_slice());
        assert_eq!(reader.read_varint_i64().unwrap(), -1);
        assert_eq!(reader.read_varint_i64().unwrap(), i64::MIN);
    }

    #[test]
    fn truncated_input_is_a_decode_error() {
        let mut buf = CodecBuffer::new();
        buf.write_str("hello");
        let bytes = &buf.as_slice()[..3];
        let err = CodecReader::new(bytes).read_str().unwrap_err();
        match err {
            StorageError::Decode(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn finish_rejects_trailing_bytes() {
        let mut buf = CodecBuffer::new();
        buf.write_u32(7);
        buf.write_u8(0);
        let mut reader = CodecReader::new(buf.as_slice());
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert!(reader.finish().is_err());
    }
}
