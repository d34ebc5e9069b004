//! Scalar encodings shared by every packet type.
//!
//! Fixed-width little-endian integers, length-encoded integers and strings,
//! and NUL-terminated strings. Decoding goes through [`WireReader`], which
//! never panics on short input and reports a [`WireError`] instead.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Malformed scalar encoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unexpected end of packet: needed {needed} bytes, {remaining} left")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("invalid length-encoded integer marker 0x{0:02X}")]
    InvalidLengthMarker(u8),
    #[error("missing NUL terminator")]
    MissingTerminator,
}

/// Number of bytes a length-encoded integer occupies
pub fn lenenc_int_size(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < 1 << 16 {
        3
    } else if value < 1 << 24 {
        4
    } else {
        9
    }
}

/// Write helpers for the MySQL scalar encodings
pub trait WireWrite {
    fn put_lenenc_int(&mut self, value: u64);
    fn put_lenenc_bytes(&mut self, data: &[u8]);
    fn put_lenenc_str(&mut self, s: &str) {
        self.put_lenenc_bytes(s.as_bytes());
    }
    fn put_null_terminated(&mut self, data: &[u8]);
    fn put_u24_le(&mut self, value: u32);
    fn put_u48_le(&mut self, value: u64);
}

impl WireWrite for BytesMut {
    fn put_lenenc_int(&mut self, value: u64) {
        if value < 251 {
            self.put_u8(value as u8);
        } else if value < 1 << 16 {
            self.put_u8(0xFC);
            self.put_u16_le(value as u16);
        } else if value < 1 << 24 {
            self.put_u8(0xFD);
            self.put_uint_le(value, 3);
        } else {
            self.put_u8(0xFE);
            self.put_u64_le(value);
        }
    }

    fn put_lenenc_bytes(&mut self, data: &[u8]) {
        self.put_lenenc_int(data.len() as u64);
        self.extend_from_slice(data);
    }

    fn put_null_terminated(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
        self.put_u8(0);
    }

    fn put_u24_le(&mut self, value: u32) {
        self.put_uint_le(u64::from(value & 0xFF_FF_FF), 3);
    }

    fn put_u48_le(&mut self, value: u64) {
        self.put_uint_le(value & 0xFFFF_FFFF_FFFF, 6);
    }
}

/// Cursor over a packet payload
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), WireError> {
        self.take(n).map(|_| ())
    }

    /// Everything left in the payload
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn uint_le(&mut self, n: usize) -> Result<u64, WireError> {
        let bytes = self.take(n)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, WireError> {
        Ok(self.uint_le(2)? as u16)
    }

    pub fn u24_le(&mut self) -> Result<u32, WireError> {
        Ok(self.uint_le(3)? as u32)
    }

    pub fn u32_le(&mut self) -> Result<u32, WireError> {
        Ok(self.uint_le(4)? as u32)
    }

    pub fn u48_le(&mut self) -> Result<u64, WireError> {
        self.uint_le(6)
    }

    pub fn u64_le(&mut self) -> Result<u64, WireError> {
        self.uint_le(8)
    }

    /// Length-encoded integer. `0xFB` (NULL) and `0xFF` (ERR) are not
    /// valid integer markers.
    pub fn lenenc_int(&mut self) -> Result<u64, WireError> {
        match self.u8()? {
            b @ 0x00..=0xFA => Ok(u64::from(b)),
            0xFC => self.uint_le(2),
            0xFD => self.uint_le(3),
            0xFE => self.uint_le(8),
            marker => Err(WireError::InvalidLengthMarker(marker)),
        }
    }

    pub fn lenenc_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.lenenc_int()?;
        let len = usize::try_from(len).map_err(|_| WireError::UnexpectedEnd {
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        self.take(len)
    }

    /// NUL-terminated string; the terminator is consumed
    pub fn null_terminated(&mut self) -> Result<&'a [u8], WireError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(WireError::MissingTerminator)?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// NUL-terminated string that may also run to the end of the payload
    pub fn null_terminated_or_rest(&mut self) -> &'a [u8] {
        match self.null_terminated() {
            Ok(s) => s,
            Err(_) => self.rest(),
        }
    }
}
