//! GET_COLLECTIONS_MANIFEST (spec §4.1, §4.4 supplement): no request body;
//! the response value is the manifest JSON, left for the bucket layer to
//! parse into its scope/collection id table — this operation only speaks
//! the wire frame, not the manifest shape.

use crate::status::status_to_result;
use bytes::Bytes;
use cb_codec::kv::{Frame, Opcode, Status};
use cb_core::CouchbaseError;

pub fn encode(opaque: u32) -> Result<Frame, CouchbaseError> {
    Frame::request(Opcode::GET_COLLECTIONS_MANIFEST, opaque, 0, Bytes::new(), Bytes::new(), Bytes::new())
        .map_err(|e| CouchbaseError::new(cb_core::ErrorKind::EncodingFailure, e.to_string()))
}

pub fn decode(frame: &Frame) -> Result<Bytes, CouchbaseError> {
    status_to_result(Status(frame.header.vbucket_or_status), "get collections manifest", false)?;
    Ok(frame.value.clone())
}
