//! Alt-magic framing-extras (spec §4.1, §6): a sequence of frame-info TLVs
//! prepended to a request when it carries durability requirements,
//! preserve-expiry, or user impersonation. Each entry packs its id and
//! payload length into a single leading byte, which is sufficient for every
//! frame-info this client emits (all payloads are under 15 bytes); the
//! escape encoding the real protocol uses for longer payloads is not
//! implemented since nothing here needs it.

use super::error::{CodecError, CodecResult};
use bytes::Bytes;

pub const ID_DURABILITY_REQUIREMENT: u8 = 0x01;
pub const ID_DCP_STREAM_ID: u8 = 0x02;
pub const ID_IMPERSONATE_USER: u8 = 0x03;
pub const ID_PRESERVE_TTL: u8 = 0x05;

#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub id: u8,
    pub payload: Bytes,
}

pub fn encode_framing_extras(infos: &[FrameInfo]) -> CodecResult<Bytes> {
    let mut out = Vec::new();
    for info in infos {
        if info.id > 0x0e || info.payload.len() > 0x0e {
            return Err(CodecError::MalformedSubdoc("frame-info id or payload too large for compact encoding"));
        }
        out.push((info.id << 4) | info.payload.len() as u8);
        out.extend_from_slice(&info.payload);
    }
    Ok(Bytes::from(out))
}

pub fn decode_framing_extras(mut buf: &[u8]) -> CodecResult<Vec<FrameInfo>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let header = buf[0];
        let id = header >> 4;
        let len = (header & 0x0f) as usize;
        if buf.len() < 1 + len {
            return Err(CodecError::Truncated { have: buf.len(), need: 1 + len });
        }
        let payload = Bytes::copy_from_slice(&buf[1..1 + len]);
        out.push(FrameInfo { id, payload });
        buf = &buf[1 + len..];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_preserve_ttl_marker() {
        let infos = vec![FrameInfo { id: ID_PRESERVE_TTL, payload: Bytes::new() }];
        let encoded = encode_framing_extras(&infos).unwrap();
        let decoded = decode_framing_extras(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, ID_PRESERVE_TTL);
        assert!(decoded[0].payload.is_empty());
    }

    #[test]
    fn round_trips_durability_requirement_with_level_and_timeout() {
        let payload = Bytes::from_static(&[0x02, 0x01, 0xf4]);
        let infos = vec![FrameInfo { id: ID_DURABILITY_REQUIREMENT, payload: payload.clone() }];
        let encoded = encode_framing_extras(&infos).unwrap();
        let decoded = decode_framing_extras(&encoded).unwrap();
        assert_eq!(decoded[0].payload, payload);
    }
}
