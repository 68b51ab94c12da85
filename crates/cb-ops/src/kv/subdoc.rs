//! Sub-document lookup/mutate (spec §4.1, §4.6, §8 scenario 5): a multi-spec
//! request against one document, with caller order preserved across the
//! server's xattr-first wire ordering requirement.

use crate::document_id::DocumentId;
use crate::mutation_state::MutationToken;
use crate::status::status_to_result;
use bytes::{Buf, BufMut, Bytes};
use cb_codec::kv::mutate::decode_mutation_token;
use cb_codec::kv::subdoc::{decode_lookup_results, encode_specs, reorder_results, SubdocSpec, FLAG_XATTR};
use cb_codec::kv::{CodecError, Frame, Opcode, Status};
use cb_core::{CouchbaseError, ErrorKind};

/// Per-entry subdoc opcodes (distinct from the frame-level
/// `SUBDOC_LOOKUP_MULTI` / `SUBDOC_MUTATE_MULTI` opcode, which every
/// multi-spec request uses regardless of what its entries do).
pub mod entry_opcode {
    pub const GET: u8 = 0xc5;
    pub const EXISTS: u8 = 0xc6;
    pub const DICT_ADD: u8 = 0xc7;
    pub const DICT_UPSERT: u8 = 0xc8;
    pub const DELETE: u8 = 0xc9;
    pub const REPLACE: u8 = 0xca;
    pub const ARRAY_PUSH_LAST: u8 = 0xcb;
    pub const ARRAY_PUSH_FIRST: u8 = 0xcc;
    pub const ARRAY_INSERT: u8 = 0xcd;
    pub const ARRAY_ADD_UNIQUE: u8 = 0xce;
    pub const COUNTER: u8 = 0xcf;
    pub const GET_COUNT: u8 = 0xd2;
}

#[derive(Debug, Clone)]
pub struct LookupSpec {
    pub opcode: u8,
    pub xattr: bool,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct SubdocLookupRequest {
    pub id: DocumentId,
    pub specs: Vec<LookupSpec>,
}

#[derive(Debug, Clone)]
pub struct SubdocLookupFieldResult {
    pub status: u16,
    pub value: Bytes,
}

#[derive(Debug, Clone)]
pub struct SubdocLookupResponse {
    pub cas: u64,
    /// In the caller's original spec order.
    pub results: Vec<SubdocLookupFieldResult>,
}

fn to_wire_specs(specs: &[LookupSpec]) -> Vec<SubdocSpec> {
    specs
        .iter()
        .map(|s| SubdocSpec {
            opcode: s.opcode,
            flags: if s.xattr { FLAG_XATTR } else { 0 },
            path: Bytes::copy_from_slice(s.path.as_bytes()),
            value: Bytes::new(),
        })
        .collect()
}

pub fn encode_lookup(
    request: &SubdocLookupRequest,
    opaque: u32,
    vbucket: u16,
    collection_id: Option<u32>,
) -> Result<Frame, CouchbaseError> {
    let wire_specs = to_wire_specs(&request.specs);
    let (value, _order) = encode_specs(&wire_specs, false);
    Frame::request(Opcode::SUBDOC_LOOKUP_MULTI, opaque, vbucket, Bytes::new(), request.id.wire_key(collection_id), value)
        .map_err(|e| CouchbaseError::new(ErrorKind::EncodingFailure, e.to_string()))
}

pub fn decode_lookup(frame: &Frame, request: &SubdocLookupRequest) -> Result<SubdocLookupResponse, CouchbaseError> {
    status_to_result(Status(frame.header.vbucket_or_status), "subdoc lookup", false)?;
    let wire_specs = to_wire_specs(&request.specs);
    let (_, order) = encode_specs(&wire_specs, false);
    let wire_results = decode_lookup_results(&frame.value, request.specs.len())
        .map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))?;
    let ordered = reorder_results(&wire_results, &order);
    Ok(SubdocLookupResponse {
        cas: frame.header.cas,
        results: ordered.into_iter().map(|r| SubdocLookupFieldResult { status: r.status, value: r.value }).collect(),
    })
}

#[derive(Debug, Clone)]
pub struct MutateSpec {
    pub opcode: u8,
    pub xattr: bool,
    pub path: String,
    pub value: Bytes,
}

#[derive(Debug, Clone)]
pub struct SubdocMutateRequest {
    pub id: DocumentId,
    pub specs: Vec<MutateSpec>,
    pub cas: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SubdocMutateFieldResult {
    pub status: u16,
    /// Non-empty only for entries that return a value, e.g. `COUNTER`.
    pub value: Bytes,
}

#[derive(Debug, Clone)]
pub struct SubdocMutateResponse {
    pub cas: u64,
    pub mutation_token: Option<MutationToken>,
    pub results: Vec<SubdocMutateFieldResult>,
}

fn to_wire_mutate_specs(specs: &[MutateSpec]) -> Vec<SubdocSpec> {
    specs
        .iter()
        .map(|s| SubdocSpec {
            opcode: s.opcode,
            flags: if s.xattr { FLAG_XATTR } else { 0 },
            path: Bytes::copy_from_slice(s.path.as_bytes()),
            value: s.value.clone(),
        })
        .collect()
}

pub fn encode_mutate(
    request: &SubdocMutateRequest,
    opaque: u32,
    vbucket: u16,
    collection_id: Option<u32>,
) -> Result<Frame, CouchbaseError> {
    let wire_specs = to_wire_mutate_specs(&request.specs);
    let (value, _order) = encode_specs(&wire_specs, true);
    let frame = Frame::request(Opcode::SUBDOC_MUTATE_MULTI, opaque, vbucket, Bytes::new(), request.id.wire_key(collection_id), value)
        .map_err(|e| CouchbaseError::new(ErrorKind::EncodingFailure, e.to_string()))?;
    Ok(match request.cas {
        Some(cas) => frame.with_cas(cas),
        None => frame,
    })
}

/// Decode a multi-mutate response body: on full success, a flat sequence of
/// `{index: u8, status: u16, valuelen: u32, value}` entries only for specs
/// that return a value (e.g. COUNTER); on partial failure the server instead
/// sends the single failing index/status with no further entries.
fn decode_mutate_results(mut value: &[u8], spec_count: usize) -> Result<Vec<SubdocMutateFieldResult>, CodecError> {
    let mut by_index = vec![SubdocMutateFieldResult { status: 0, value: Bytes::new() }; spec_count];
    while value.remaining() >= 3 {
        let index = value.get_u8() as usize;
        let status = value.get_u16();
        if index >= spec_count {
            return Err(CodecError::MalformedSubdoc("mutate result index out of range"));
        }
        if value.remaining() >= 4 {
            let len = value.get_u32() as usize;
            if value.remaining() < len {
                return Err(CodecError::MalformedSubdoc("mutate result value length overruns buffer"));
            }
            by_index[index] = SubdocMutateFieldResult { status, value: Bytes::copy_from_slice(&value[..len]) };
            value.advance(len);
        } else {
            by_index[index] = SubdocMutateFieldResult { status, value: Bytes::new() };
        }
    }
    Ok(by_index)
}

pub fn decode_mutate(frame: &Frame, request: &SubdocMutateRequest, partition_id: u16) -> Result<SubdocMutateResponse, CouchbaseError> {
    status_to_result(Status(frame.header.vbucket_or_status), "subdoc mutate", request.cas.is_some())?;
    let results = decode_mutate_results(&frame.value, request.specs.len())
        .map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))?;
    // Subdoc's value is already spoken for by the per-spec results, so the
    // mutation-token trailer rides in extras instead of value when
    // mutation-seqno is negotiated.
    let mutation_token = if frame.extras.len() >= 16 {
        let wire = decode_mutation_token(&frame.extras)
            .map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))?;
        Some(MutationToken { partition_id, partition_uuid: wire.partition_uuid, sequence_number: wire.sequence_number })
    } else {
        None
    };
    Ok(SubdocMutateResponse { cas: frame.header.cas, mutation_token, results })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xattr_specs_are_reordered_before_body_specs_on_the_wire() {
        let request = SubdocLookupRequest {
            id: DocumentId::new("default", "k"),
            specs: vec![
                LookupSpec { opcode: entry_opcode::GET, xattr: false, path: "foo".to_string() },
                LookupSpec { opcode: entry_opcode::GET, xattr: true, path: "$XTOC".to_string() },
            ],
        };
        let frame = encode_lookup(&request, 1, 0, None).unwrap();
        // First entry on the wire should be the xattr one despite being second in caller order.
        assert_eq!(frame.value[0], entry_opcode::GET);
        let path_len = u16::from_be_bytes([frame.value[2], frame.value[3]]) as usize;
        assert_eq!(&frame.value[4..4 + path_len], b"$XTOC");
    }

    #[test]
    fn lookup_response_is_restored_to_caller_order() {
        let request = SubdocLookupRequest {
            id: DocumentId::new("default", "k"),
            specs: vec![
                LookupSpec { opcode: entry_opcode::GET, xattr: false, path: "foo".to_string() },
                LookupSpec { opcode: entry_opcode::GET, xattr: true, path: "$XTOC".to_string() },
            ],
        };
        let mut value = Vec::new();
        // Wire order is xattr-first: $XTOC then foo.
        value.put_u16(0);
        value.put_u32(3);
        value.put_slice(b"xtv");
        value.put_u16(0);
        value.put_u32(3);
        value.put_slice(b"fov");
        let mut frame =
            Frame::request(Opcode::SUBDOC_LOOKUP_MULTI, 1, 0, Bytes::new(), Bytes::new(), Bytes::from(value)).unwrap();
        frame.header.vbucket_or_status = Status::SUCCESS.0;
        let response = decode_lookup(&frame, &request).unwrap();
        assert_eq!(&response.results[0].value[..], b"fov");
        assert_eq!(&response.results[1].value[..], b"xtv");
    }

    #[test]
    fn mutate_decode_reports_counter_result_value() {
        let request = SubdocMutateRequest {
            id: DocumentId::new("default", "k"),
            specs: vec![MutateSpec { opcode: entry_opcode::COUNTER, xattr: false, path: "count".to_string(), value: Bytes::from_static(b"1") }],
            cas: None,
        };
        let mut value = Vec::new();
        value.put_u8(0);
        value.put_u16(0);
        value.put_u32(1);
        value.put_slice(b"5");
        let mut frame =
            Frame::request(Opcode::SUBDOC_MUTATE_MULTI, 1, 0, Bytes::new(), Bytes::new(), Bytes::from(value)).unwrap();
        frame.header.vbucket_or_status = Status::SUCCESS.0;
        let response = decode_mutate(&frame, &request, 0).unwrap();
        assert_eq!(&response.results[0].value[..], b"5");
    }

    #[test]
    fn mutate_decode_surfaces_cas_mismatch_for_a_cas_gated_request() {
        let request = SubdocMutateRequest {
            id: DocumentId::new("default", "k"),
            specs: vec![MutateSpec { opcode: entry_opcode::DICT_UPSERT, xattr: false, path: "a".to_string(), value: Bytes::from_static(b"1") }],
            cas: Some(42),
        };
        let mut frame =
            Frame::request(Opcode::SUBDOC_MUTATE_MULTI, 1, 0, Bytes::new(), Bytes::new(), Bytes::new()).unwrap();
        frame.header.vbucket_or_status = Status::KEY_EXISTS.0;
        let err = decode_mutate(&frame, &request, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CasMismatch);
    }
}
