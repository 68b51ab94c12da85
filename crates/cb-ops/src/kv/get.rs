//! GET (spec §4.1, §4.6): no request extras, key only; response extras carry
//! the stored flags.

use crate::document_id::DocumentId;
use crate::status::status_to_result;
use bytes::Bytes;
use cb_codec::kv::mutate::decode_get_response_extras;
use cb_codec::kv::{Frame, Opcode, Status};
use cb_core::{CouchbaseError, ErrorKind};

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub id: DocumentId,
}

#[derive(Debug, Clone)]
pub struct GetResponse {
    pub cas: u64,
    pub flags: u32,
    pub value: Bytes,
    pub data_type: u8,
}

pub fn encode(request: &GetRequest, opaque: u32, vbucket: u16, collection_id: Option<u32>) -> Result<Frame, CouchbaseError> {
    Frame::request(Opcode::GET, opaque, vbucket, Bytes::new(), request.id.wire_key(collection_id), Bytes::new())
        .map_err(|e| CouchbaseError::new(ErrorKind::EncodingFailure, e.to_string()))
}

pub fn decode(frame: &Frame) -> Result<GetResponse, CouchbaseError> {
    status_to_result(Status(frame.header.vbucket_or_status), "get", false)?;
    let flags = decode_get_response_extras(&frame.extras)
        .map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))?;
    let value = frame
        .decompress_value()
        .map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))?;
    Ok(GetResponse { cas: frame.header.cas, flags, value, data_type: frame.header.data_type })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use cb_codec::kv::mutate::encode_get_response_extras;

    #[test]
    fn encodes_the_document_key_with_no_extras() {
        let request = GetRequest { id: DocumentId::new("default", "user::1") };
        let frame = encode(&request, 1, 0, None).unwrap();
        assert_eq!(&frame.key[..], b"user::1");
        assert!(frame.extras.is_empty());
    }

    #[test]
    fn decodes_flags_and_value_from_a_success_response() {
        let mut frame = Frame::request(
            Opcode::GET,
            1,
            0,
            encode_get_response_extras(0x02000006),
            Bytes::new(),
            Bytes::from_static(b"{\"a\":1}"),
        )
        .unwrap();
        frame.header.vbucket_or_status = Status::SUCCESS.0;
        frame.header.cas = 42;
        let response = decode(&frame).unwrap();
        assert_eq!(response.cas, 42);
        assert_eq!(response.flags, 0x02000006);
        assert_eq!(&response.value[..], b"{\"a\":1}");
    }

    #[test]
    fn decode_surfaces_document_not_found() {
        let mut buf = BytesMut::new();
        let mut frame =
            Frame::request(Opcode::GET, 1, 0, Bytes::new(), Bytes::new(), Bytes::new()).unwrap();
        frame.header.vbucket_or_status = Status::KEY_NOT_FOUND.0;
        frame.encode(&mut buf);
        let err = decode(&frame).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DocumentNotFound);
    }
}
