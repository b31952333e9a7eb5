//! Little-endian primitives shared by the cost and route matrix formats.
//!
//! Every read checks the remaining length first, so a short buffer surfaces as
//! [`FormatError::Truncated`] naming the field being read, never a panic.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::FormatError;
use crate::types::MAX_RELAY_NAME_LEN;

const ADDR_V4: u8 = 4;
const ADDR_V6: u8 = 6;

/// Cursor over an encoded matrix.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, field: &'static str) -> Result<(), FormatError> {
        if self.buf.remaining() < n {
            return Err(FormatError::Truncated { field });
        }
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, FormatError> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16, FormatError> {
        self.need(2, field)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, FormatError> {
        self.need(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self, field: &'static str) -> Result<u64, FormatError> {
        self.need(8, field)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn f32(&mut self, field: &'static str) -> Result<f32, FormatError> {
        self.need(4, field)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn bool(&mut self, field: &'static str) -> Result<bool, FormatError> {
        match self.u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(FormatError::Invalid {
                field,
                reason: format!("bool byte {other}"),
            }),
        }
    }

    /// A `u32` length that must still fit in the buffer at `unit` bytes each.
    pub fn count(&mut self, unit: usize, field: &'static str) -> Result<usize, FormatError> {
        let len = self.u32(field)? as usize;
        if len.saturating_mul(unit) > self.remaining() {
            return Err(FormatError::Truncated { field });
        }
        Ok(len)
    }

    pub fn bytes(&mut self, len: usize, field: &'static str) -> Result<Vec<u8>, FormatError> {
        self.need(len, field)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    pub fn string(&mut self, field: &'static str) -> Result<String, FormatError> {
        let len = self.u8(field)? as usize;
        if len > MAX_RELAY_NAME_LEN {
            return Err(FormatError::Invalid {
                field,
                reason: format!("length {len} exceeds {MAX_RELAY_NAME_LEN}"),
            });
        }
        let raw = self.bytes(len, field)?;
        String::from_utf8(raw).map_err(|e| FormatError::Invalid {
            field,
            reason: e.to_string(),
        })
    }

    pub fn address(&mut self, field: &'static str) -> Result<SocketAddr, FormatError> {
        let ip = match self.u8(field)? {
            ADDR_V4 => {
                self.need(4, field)?;
                let mut octets = [0u8; 4];
                self.buf.copy_to_slice(&mut octets);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            ADDR_V6 => {
                self.need(16, field)?;
                let mut octets = [0u8; 16];
                self.buf.copy_to_slice(&mut octets);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(FormatError::Invalid {
                    field,
                    reason: format!("address family {other}"),
                })
            }
        };
        let port = self.u16(field)?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Fails unless the whole buffer was consumed.
    pub fn finish(&self, field: &'static str) -> Result<(), FormatError> {
        if self.remaining() != 0 {
            return Err(FormatError::Invalid {
                field,
                reason: format!("{} trailing bytes", self.remaining()),
            });
        }
        Ok(())
    }
}

pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    // Callers validate names against MAX_RELAY_NAME_LEN before encoding.
    let bytes = &s.as_bytes()[..s.len().min(MAX_RELAY_NAME_LEN)];
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
}

pub(crate) fn put_address(buf: &mut BytesMut, addr: &SocketAddr) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(ADDR_V4);
            buf.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_u8(ADDR_V6);
            buf.put_slice(&ip.octets());
        }
    }
    buf.put_u16_le(addr.port());
}

pub(crate) fn put_len(buf: &mut BytesMut, len: usize) {
    buf.put_u32_le(len as u32);
}
