//! Full request/response frames built on top of [`super::header::Header`].
//! Bodies are encoded per-opcode (spec §4.1): GET carries no extras, MUTATE
//! carries flags+expiry extras and an optional value, SASL frames carry the
//! mechanism name as the key and the challenge as the value, HELLO carries
//! a sequence of 16-bit feature codes as the value.

use super::error::{CodecError, CodecResult};
use super::header::{Header, HEADER_LEN, REQ_ALT_MAGIC, REQ_MAGIC, RES_MAGIC};
use super::opcode::Opcode;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Datatype bit-set values (spec §4.1, §4.2).
pub mod datatype {
    pub const RAW: u8 = 0x00;
    pub const JSON: u8 = 0x01;
    pub const SNAPPY: u8 = 0x02;
    pub const XATTR: u8 = 0x04;
}

/// Maximum total body length this client will accept from a server; guards
/// against a corrupt length field causing an unbounded allocation.
pub const MAX_BODY_LEN: u32 = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub framing_extras: Bytes,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Frame {
    pub fn request(
        opcode: Opcode,
        opaque: u32,
        vbucket: u16,
        extras: Bytes,
        key: Bytes,
        value: Bytes,
    ) -> CodecResult<Frame> {
        Self::request_with_framing(opcode, opaque, vbucket, Bytes::new(), extras, key, value)
    }

    pub fn request_with_framing(
        opcode: Opcode,
        opaque: u32,
        vbucket: u16,
        framing_extras: Bytes,
        extras: Bytes,
        key: Bytes,
        value: Bytes,
    ) -> CodecResult<Frame> {
        if key.len() > 250 {
            return Err(CodecError::KeyTooLong(key.len()));
        }
        let magic = if framing_extras.is_empty() { REQ_MAGIC } else { REQ_ALT_MAGIC };
        let total_body_len =
            (framing_extras.len() + extras.len() + key.len() + value.len()) as u32;
        let header = Header {
            magic,
            opcode: opcode.0,
            framing_extras_len: framing_extras.len() as u8,
            key_len: key.len() as u16,
            extras_len: extras.len() as u8,
            data_type: datatype::RAW,
            vbucket_or_status: vbucket,
            total_body_len,
            opaque,
            cas: 0,
        };
        Ok(Frame { header, framing_extras, extras, key, value })
    }

    pub fn with_data_type(mut self, data_type: u8) -> Self {
        self.header.data_type = data_type;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.header.cas = cas;
        self
    }

    pub fn encode(&self, out: &mut BytesMut) {
        self.header.encode(out);
        out.put_slice(&self.framing_extras);
        out.put_slice(&self.extras);
        out.put_slice(&self.key);
        out.put_slice(&self.value);
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.header.body_len()
    }

    /// Attempt to decode one full frame from the front of `buf`, leaving
    /// `buf` untouched if the frame is not fully buffered yet (the stream
    /// layer is expected to read more and retry).
    pub fn try_decode(buf: &mut BytesMut) -> CodecResult<Option<Frame>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = {
            let mut peek = &buf[..HEADER_LEN];
            Header::decode(&mut peek)?
        };
        if header.total_body_len > MAX_BODY_LEN {
            return Err(CodecError::BodyTooLarge {
                declared: header.total_body_len,
                limit: MAX_BODY_LEN,
            });
        }
        let total_len = HEADER_LEN + header.body_len();
        if buf.len() < total_len {
            return Ok(None);
        }
        let mut frame_buf = buf.split_to(total_len);
        frame_buf.advance(HEADER_LEN);
        let framing_extras = frame_buf.split_to(header.framing_extras_len as usize).freeze();
        let extras = frame_buf.split_to(header.extras_len as usize).freeze();
        let key = frame_buf.split_to(header.key_len as usize).freeze();
        let value = frame_buf.freeze();
        Ok(Some(Frame { header, framing_extras, extras, key, value }))
    }

    /// Decompress `value` in place when the datatype snappy bit is set and
    /// the session negotiated snappy via HELLO (spec §4.1). The caller is
    /// responsible for only calling this once the session knows snappy was
    /// negotiated; the frame itself cannot know that.
    pub fn decompress_value(&self) -> CodecResult<Bytes> {
        if self.header.data_type & datatype::SNAPPY == 0 {
            return Ok(self.value.clone());
        }
        let mut decoder = snap::raw::Decoder::new();
        let decompressed = decoder.decompress_vec(&self.value)?;
        Ok(Bytes::from(decompressed))
    }

    pub fn is_response_magic(&self) -> bool {
        matches!(self.header.magic, RES_MAGIC | super::header::RES_ALT_MAGIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_get_request() {
        let frame =
            Frame::request(Opcode::GET, 7, 0, Bytes::new(), Bytes::from_static(b"foo"), Bytes::new())
                .unwrap();
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let decoded = Frame::try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header.opaque, 7);
        assert_eq!(&decoded.key[..], b"foo");
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frame_returns_none_without_consuming() {
        let frame =
            Frame::request(Opcode::GET, 1, 0, Bytes::new(), Bytes::from_static(b"foo"), Bytes::new())
                .unwrap();
        let mut full = BytesMut::new();
        frame.encode(&mut full);
        let expected_len = full.len() - 1;
        let mut partial = full.split_to(expected_len);
        let result = Frame::try_decode(&mut partial).unwrap();
        assert!(result.is_none());
        assert_eq!(partial.len(), expected_len);
    }

    #[test]
    fn rejects_oversized_body_length() {
        let mut buf = BytesMut::new();
        let header = Header {
            magic: REQ_MAGIC,
            opcode: 0,
            framing_extras_len: 0,
            key_len: 0,
            extras_len: 0,
            data_type: 0,
            vbucket_or_status: 0,
            total_body_len: MAX_BODY_LEN + 1,
            opaque: 0,
            cas: 0,
        };
        header.encode(&mut buf);
        let err = Frame::try_decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::BodyTooLarge { .. }));
    }

    #[test]
    fn snappy_round_trip_via_datatype_bit() {
        let raw = b"{\"hello\":\"world\"}".repeat(4);
        let mut encoder = snap::raw::Encoder::new();
        let compressed = encoder.compress_vec(&raw).unwrap();
        let frame = Frame::request(
            Opcode::GET,
            1,
            0,
            Bytes::new(),
            Bytes::new(),
            Bytes::from(compressed),
        )
        .unwrap()
        .with_data_type(datatype::SNAPPY);
        let decompressed = frame.decompress_value().unwrap();
        assert_eq!(&decompressed[..], &raw[..]);
    }
}
