//! DELETE (spec §4.1): no extras or value on the request; the response may
//! carry a mutation token exactly like a SET/ADD/REPLACE does.

use crate::document_id::DocumentId;
use crate::mutation_state::MutationToken;
use crate::status::status_to_result;
use bytes::Bytes;
use cb_codec::kv::mutate::decode_mutation_token;
use cb_codec::kv::{Frame, Opcode, Status};
use cb_core::{CouchbaseError, ErrorKind};

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub id: DocumentId,
    pub cas: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DeleteResponse {
    pub cas: u64,
    pub mutation_token: Option<MutationToken>,
}

pub fn encode(request: &DeleteRequest, opaque: u32, vbucket: u16, collection_id: Option<u32>) -> Result<Frame, CouchbaseError> {
    let frame = Frame::request(Opcode::DELETE, opaque, vbucket, Bytes::new(), request.id.wire_key(collection_id), Bytes::new())
        .map_err(|e| CouchbaseError::new(ErrorKind::EncodingFailure, e.to_string()))?;
    Ok(match request.cas {
        Some(cas) => frame.with_cas(cas),
        None => frame,
    })
}

/// `cas_precondition` should be `request.cas.is_some()` from the request
/// that produced `frame` (spec §8 scenario 3: a CAS-gated remove reports
/// `CasMismatch`, not `DocumentExists`).
pub fn decode(frame: &Frame, partition_id: u16, cas_precondition: bool) -> Result<DeleteResponse, CouchbaseError> {
    status_to_result(Status(frame.header.vbucket_or_status), "delete", cas_precondition)?;
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
    Ok(DeleteResponse { cas: frame.header.cas, mutation_token })
}
