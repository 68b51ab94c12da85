//! Extras layout for GET/SET/ADD/REPLACE/DELETE (spec §4.1) and the
//! mutation-token trailer a server echoes back on a successful mutation
//! when `enable_mutation_tokens` is on (spec §3, §6).

use super::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut, Bytes};

/// Extras carried on a GET response: 4-byte flags.
pub fn encode_get_response_extras(flags: u32) -> Bytes {
    let mut out = Vec::with_capacity(4);
    out.put_u32(flags);
    Bytes::from(out)
}

pub fn decode_get_response_extras(extras: &[u8]) -> CodecResult<u32> {
    if extras.len() < 4 {
        return Err(CodecError::Truncated { have: extras.len(), need: 4 });
    }
    let mut buf = extras;
    Ok(buf.get_u32())
}

/// Extras carried on a SET/ADD/REPLACE request: 4-byte flags + 4-byte
/// expiry (seconds, relative or absolute per the usual memcached rule).
pub fn encode_mutate_request_extras(flags: u32, expiry: u32) -> Bytes {
    let mut out = Vec::with_capacity(8);
    out.put_u32(flags);
    out.put_u32(expiry);
    Bytes::from(out)
}

pub fn decode_mutate_request_extras(extras: &[u8]) -> CodecResult<(u32, u32)> {
    if extras.len() < 8 {
        return Err(CodecError::Truncated { have: extras.len(), need: 8 });
    }
    let mut buf = extras;
    Ok((buf.get_u32(), buf.get_u32()))
}

/// Mutation token trailer: partition uuid (8 bytes) + sequence number (8
/// bytes), present on the response value when mutation tokens were
/// negotiated (spec §3 `MutationToken`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationTokenWire {
    pub partition_uuid: u64,
    pub sequence_number: u64,
}

pub fn decode_mutation_token(value: &[u8]) -> CodecResult<MutationTokenWire> {
    if value.len() < 16 {
        return Err(CodecError::Truncated { have: value.len(), need: 16 });
    }
    let mut buf = value;
    let partition_uuid = buf.get_u64();
    let sequence_number = buf.get_u64();
    Ok(MutationTokenWire { partition_uuid, sequence_number })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mutate_extras() {
        let extras = encode_mutate_request_extras(0x1234, 60);
        let (flags, expiry) = decode_mutate_request_extras(&extras).unwrap();
        assert_eq!(flags, 0x1234);
        assert_eq!(expiry, 60);
    }

    #[test]
    fn decodes_mutation_token_trailer() {
        let mut raw = Vec::new();
        raw.put_u64(0xaaaa_bbbb_cccc_dddd);
        raw.put_u64(42);
        let token = decode_mutation_token(&raw).unwrap();
        assert_eq!(token.partition_uuid, 0xaaaa_bbbb_cccc_dddd);
        assert_eq!(token.sequence_number, 42);
    }
}
