//! The fixed 24-byte binary protocol header (spec §4.1) plus the alt-magic
//! variant that carries framing-extras (used for preserve-expiry, durability
//! requirements, and impersonate-user, spec §6).

use super::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut};

pub const HEADER_LEN: usize = 24;

pub const REQ_MAGIC: u8 = 0x80;
pub const REQ_ALT_MAGIC: u8 = 0x08;
pub const RES_MAGIC: u8 = 0x81;
pub const RES_ALT_MAGIC: u8 = 0x18;

fn is_request_magic(magic: u8) -> bool {
    matches!(magic, REQ_MAGIC | REQ_ALT_MAGIC)
}

fn is_response_magic(magic: u8) -> bool {
    matches!(magic, RES_MAGIC | RES_ALT_MAGIC)
}

fn is_alt_magic(magic: u8) -> bool {
    matches!(magic, REQ_ALT_MAGIC | RES_ALT_MAGIC)
}

/// A decoded header. `key_len`/`framing_extras_len` are normalised to the
/// same fields regardless of whether the wire used the classic or alt-magic
/// layout, so callers never branch on magic after this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub framing_extras_len: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    /// Request: vbucket id. Response: status code.
    pub vbucket_or_status: u16,
    pub total_body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    pub fn is_request(&self) -> bool {
        is_request_magic(self.magic)
    }

    pub fn is_response(&self) -> bool {
        is_response_magic(self.magic)
    }

    pub fn is_alt(&self) -> bool {
        is_alt_magic(self.magic)
    }

    pub fn status(&self) -> super::opcode::Status {
        super::opcode::Status(self.vbucket_or_status)
    }

    /// Length of the variable body (everything after the 24-byte header):
    /// framing-extras + extras + key + value.
    pub fn body_len(&self) -> usize {
        self.total_body_len as usize
    }

    pub fn value_len(&self) -> usize {
        self.body_len()
            .saturating_sub(self.framing_extras_len as usize)
            .saturating_sub(self.extras_len as usize)
            .saturating_sub(self.key_len as usize)
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u8(self.magic);
        out.put_u8(self.opcode);
        if self.is_alt() {
            out.put_u8(self.framing_extras_len);
            out.put_u8(self.key_len as u8);
        } else {
            out.put_u16(self.key_len);
        }
        out.put_u8(self.extras_len);
        out.put_u8(self.data_type);
        out.put_u16(self.vbucket_or_status);
        out.put_u32(self.total_body_len);
        out.put_u32(self.opaque);
        out.put_u64(self.cas);
    }

    /// Decode a header from the front of `buf`. Validates the magic byte
    /// per spec §4.1: "Magic is validated on every frame; mismatch closes
    /// the session" — the caller is expected to treat `InvalidMagic` as
    /// exactly that kind of fatal, session-closing error.
    pub fn decode(buf: &mut impl Buf) -> CodecResult<Header> {
        if buf.remaining() < HEADER_LEN {
            return Err(CodecError::Truncated { have: buf.remaining(), need: HEADER_LEN });
        }
        let magic = buf.get_u8();
        if !is_request_magic(magic) && !is_response_magic(magic) {
            return Err(CodecError::InvalidMagic(magic));
        }
        let opcode = buf.get_u8();
        let (framing_extras_len, key_len) = if is_alt_magic(magic) {
            let f = buf.get_u8();
            let k = buf.get_u8();
            (f, k as u16)
        } else {
            (0, buf.get_u16())
        };
        let extras_len = buf.get_u8();
        let data_type = buf.get_u8();
        let vbucket_or_status = buf.get_u16();
        let total_body_len = buf.get_u32();
        let opaque = buf.get_u32();
        let cas = buf.get_u64();
        Ok(Header {
            magic,
            opcode,
            framing_extras_len,
            key_len,
            extras_len,
            data_type,
            vbucket_or_status,
            total_body_len,
            opaque,
            cas,
        })
    }
}
