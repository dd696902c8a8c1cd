//! The MessagePack subset used by packets.
//!
//! Packets only contain one array of small unsigned integers, byte strings
//! and `nil`, so that is all this module writes and reads. The writer always
//! picks the shortest encoding; the reader accepts every width MessagePack
//! allows for the types above.

use bytes::BufMut;

use crate::errors::{ProtocolError, Result};

pub(crate) const NIL: u8 = 0xc0;
pub(crate) const BIN8: u8 = 0xc4;
const BIN16: u8 = 0xc5;
const BIN32: u8 = 0xc6;
const UINT8: u8 = 0xcc;
const UINT16: u8 = 0xcd;
const UINT32: u8 = 0xce;
const UINT64: u8 = 0xcf;
const FIXARRAY: u8 = 0x90;
const FIXARRAY_MAX: u8 = 0x9f;
const FIXINT_MAX: u8 = 0x7f;

pub(crate) fn put_fixarray(buf: &mut impl BufMut, len: usize) {
    debug_assert!(len <= 15);
    buf.put_u8(FIXARRAY | (len as u8 & 0x0f));
}

pub(crate) fn put_u8(buf: &mut impl BufMut, value: u8) {
    if value > FIXINT_MAX {
        buf.put_u8(UINT8);
    }
    buf.put_u8(value);
}

/// Write `data` as the narrowest `bin` type.
///
/// MessagePack caps `bin32` at `u32::MAX` bytes; callers keep payloads below
/// that bound.
pub(crate) fn put_bin(buf: &mut impl BufMut, data: &[u8]) {
    let len = data.len();
    debug_assert!(u32::try_from(len).is_ok(), "bin payload of {len} bytes exceeds bin32");
    if let Ok(len) = u8::try_from(len) {
        buf.put_u8(BIN8);
        buf.put_u8(len);
    } else if let Ok(len) = u16::try_from(len) {
        buf.put_u8(BIN16);
        buf.put_u16(len);
    } else {
        buf.put_u8(BIN32);
        buf.put_u32(len as u32);
    }
    buf.put_slice(data);
}

pub(crate) fn put_nil(buf: &mut impl BufMut) {
    buf.put_u8(NIL);
}

/// Cursor over an encoded packet.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(ProtocolError::Truncated { field });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn byte(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn peek(&self, field: &'static str) -> Result<u8> {
        self.buf.first().copied().ok_or(ProtocolError::Truncated { field })
    }

    fn be_uint(&mut self, width: usize, field: &'static str) -> Result<u64> {
        Ok(self.take(width, field)?.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Read a fixarray header and return its element count.
    pub(crate) fn fixarray(&mut self) -> Result<usize> {
        let field = "array header";
        match self.byte(field)? {
            marker @ FIXARRAY..=FIXARRAY_MAX => Ok(usize::from(marker & 0x0f)),
            marker => Err(ProtocolError::UnexpectedMarker { field, marker }),
        }
    }

    /// Read a positive fixint, the only encoding the version tag may use.
    pub(crate) fn fixint(&mut self, field: &'static str) -> Result<u8> {
        match self.byte(field)? {
            value @ 0..=FIXINT_MAX => Ok(value),
            marker => Err(ProtocolError::UnexpectedMarker { field, marker }),
        }
    }

    /// Read an unsigned integer of any width that fits into a `u8`.
    pub(crate) fn uint8(&mut self, field: &'static str) -> Result<u8> {
        let value = match self.byte(field)? {
            value @ 0..=FIXINT_MAX => u64::from(value),
            UINT8 => self.be_uint(1, field)?,
            UINT16 => self.be_uint(2, field)?,
            UINT32 => self.be_uint(4, field)?,
            UINT64 => self.be_uint(8, field)?,
            marker => return Err(ProtocolError::UnexpectedMarker { field, marker }),
        };
        u8::try_from(value).map_err(|_| ProtocolError::ValueOutOfRange { field, value })
    }

    /// Read a byte string of any width.
    pub(crate) fn bin(&mut self, field: &'static str) -> Result<&'a [u8]> {
        let len = match self.byte(field)? {
            BIN8 => self.be_uint(1, field)?,
            BIN16 => self.be_uint(2, field)?,
            BIN32 => self.be_uint(4, field)?,
            marker => return Err(ProtocolError::UnexpectedMarker { field, marker }),
        };
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::ValueOutOfRange { field, value: len })?;
        self.take(len, field)
    }

    /// Read a byte string of exactly `N` bytes.
    pub(crate) fn bin_exact<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let data = self.bin(field)?;
        <[u8; N]>::try_from(data).map_err(|_| ProtocolError::FieldLength {
            field,
            expected: N,
            actual: data.len(),
        })
    }

    /// Read `nil` or a byte string of exactly `N` bytes.
    pub(crate) fn nil_or_bin_exact<const N: usize>(
        &mut self,
        field: &'static str,
    ) -> Result<Option<[u8; N]>> {
        if self.peek(field)? == NIL {
            self.byte(field)?;
            return Ok(None);
        }
        self.bin_exact(field).map(Some)
    }

    /// Fail if input remains.
    pub(crate) fn finish(self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}
