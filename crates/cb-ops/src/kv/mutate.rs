//! SET/ADD/REPLACE (spec §4.1, §4.6): extras carry flags + expiry; durability
//! and preserve-expiry ride along as alt-magic framing-extras when
//! negotiated.

use crate::document_id::DocumentId;
use crate::durability::DurabilityLevel;
use crate::mutation_state::MutationToken;
use crate::status::status_to_result;
use bytes::Bytes;
use cb_codec::kv::framing::{encode_framing_extras, FrameInfo, ID_PRESERVE_TTL};
use cb_codec::kv::mutate::{decode_mutation_token, encode_mutate_request_extras};
use cb_codec::kv::{Frame, Opcode, Status};
use cb_core::{CouchbaseError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateKind {
    Insert,
    Upsert,
    Replace,
}

impl MutateKind {
    fn opcode(self) -> Opcode {
        match self {
            MutateKind::Insert => Opcode::ADD,
            MutateKind::Upsert => Opcode::SET,
            MutateKind::Replace => Opcode::REPLACE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MutateRequest {
    pub id: DocumentId,
    pub value: Bytes,
    pub flags: u32,
    pub expiry_seconds: u32,
    /// Required for `Replace` when the caller wants an optimistic-concurrency
    /// check; ignored for `Insert`, optional for `Upsert`.
    pub cas: Option<u64>,
    pub durability: Option<DurabilityLevel>,
    /// Only honoured when the session negotiated `PRESERVE_TTL` (spec §9
    /// open question, resolved in DESIGN.md): set without negotiation support
    /// is a caller error the session layer rejects before encoding.
    pub preserve_expiry: bool,
    pub data_type: u8,
}

#[derive(Debug, Clone)]
pub struct MutateResponse {
    pub cas: u64,
    pub mutation_token: Option<MutationToken>,
}

pub fn encode(
    kind: MutateKind,
    request: &MutateRequest,
    opaque: u32,
    vbucket: u16,
    collection_id: Option<u32>,
) -> Result<Frame, CouchbaseError> {
    let extras = encode_mutate_request_extras(request.flags, request.expiry_seconds);

    let mut frame_infos: Vec<FrameInfo> = Vec::new();
    if let Some(level) = request.durability {
        frame_infos.push(level.frame_info(None));
    }
    if request.preserve_expiry {
        frame_infos.push(FrameInfo { id: ID_PRESERVE_TTL, payload: Bytes::new() });
    }
    let framing_extras = encode_framing_extras(&frame_infos)
        .map_err(|e| CouchbaseError::new(ErrorKind::EncodingFailure, e.to_string()))?;

    let frame = Frame::request_with_framing(
        kind.opcode(),
        opaque,
        vbucket,
        framing_extras,
        extras,
        request.id.wire_key(collection_id),
        request.value.clone(),
    )
    .map_err(|e| CouchbaseError::new(ErrorKind::EncodingFailure, e.to_string()))?
    .with_data_type(request.data_type);

    Ok(match request.cas {
        Some(cas) => frame.with_cas(cas),
        None => frame,
    })
}

/// `cas_precondition` should be `request.cas.is_some()` from the request
/// that produced `frame` — only a replace-like call that asked for an
/// optimistic-concurrency check turns `KEY_EXISTS` into `CasMismatch`
/// instead of a plain key collision.
pub fn decode(frame: &Frame, partition_id: u16, cas_precondition: bool) -> Result<MutateResponse, CouchbaseError> {
    status_to_result(Status(frame.header.vbucket_or_status), "mutate", cas_precondition)?;
    let mutation_token = if frame.value.is_empty() {
        None
    } else {
        let wire = decode_mutation_token(&frame.value)
            .map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))?;
        Some(MutationToken {
            partition_id,
            partition_uuid: wire.partition_uuid,
            sequence_number: wire.sequence_number,
        })
    };
    Ok(MutateResponse { cas: frame.header.cas, mutation_token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn request() -> MutateRequest {
        MutateRequest {
            id: DocumentId::new("default", "user::1"),
            value: Bytes::from_static(b"{}"),
            flags: 0,
            expiry_seconds: 0,
            cas: None,
            durability: None,
            preserve_expiry: false,
            data_type: 0,
        }
    }

    #[test]
    fn insert_uses_add_opcode() {
        let frame = encode(MutateKind::Insert, &request(), 1, 0, None).unwrap();
        assert_eq!(frame.header.opcode, Opcode::ADD.0);
    }

    #[test]
    fn replace_with_cas_stamps_the_header_cas() {
        let mut req = request();
        req.cas = Some(77);
        let frame = encode(MutateKind::Replace, &req, 1, 0, None).unwrap();
        assert_eq!(frame.header.cas, 77);
    }

    #[test]
    fn durability_and_preserve_expiry_produce_alt_magic_framing() {
        let mut req = request();
        req.durability = Some(DurabilityLevel::Majority);
        req.preserve_expiry = true;
        let frame = encode(MutateKind::Upsert, &req, 1, 0, None).unwrap();
        assert!(!frame.framing_extras.is_empty());
    }

    #[test]
    fn decode_extracts_mutation_token_when_present() {
        let mut value = Vec::new();
        value.put_u64(0xaaaa);
        value.put_u64(7);
        let mut frame =
            Frame::request(Opcode::SET, 1, 0, Bytes::new(), Bytes::new(), Bytes::from(value)).unwrap();
        frame.header.vbucket_or_status = Status::SUCCESS.0;
        frame.header.cas = 5;
        let response = decode(&frame, 3, false).unwrap();
        let token = response.mutation_token.unwrap();
        assert_eq!(token.partition_id, 3);
        assert_eq!(token.sequence_number, 7);
    }

    #[test]
    fn decode_surfaces_document_exists_for_insert_conflict() {
        let mut frame = Frame::request(Opcode::ADD, 1, 0, Bytes::new(), Bytes::new(), Bytes::new()).unwrap();
        frame.header.vbucket_or_status = Status::KEY_EXISTS.0;
        let err = decode(&frame, 0, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DocumentExists);
    }

    #[test]
    fn decode_surfaces_cas_mismatch_for_a_replace_with_a_cas_precondition() {
        let mut frame = Frame::request(Opcode::REPLACE, 1, 0, Bytes::new(), Bytes::new(), Bytes::new()).unwrap();
        frame.header.vbucket_or_status = Status::KEY_EXISTS.0;
        let err = decode(&frame, 0, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CasMismatch);
    }
}
