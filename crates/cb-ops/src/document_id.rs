//! Document addressing (spec §3 `DocumentId`): `(bucket, scope, collection,
//! key)`. The collection name is resolved to a 32-bit id by the session's
//! per-config cache before a key/value frame can be built; this module only
//! knows how to fold that id into the wire key once resolved.

use bytes::Bytes;

pub const DEFAULT_SCOPE: &str = "_default";
pub const DEFAULT_COLLECTION: &str = "_default";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
    pub key: String,
}

impl DocumentId {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            scope: DEFAULT_SCOPE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            key: key.into(),
        }
    }

    pub fn in_collection(mut self, scope: impl Into<String>, collection: impl Into<String>) -> Self {
        self.scope = scope.into();
        self.collection = collection.into();
        self
    }

    pub fn is_default_collection(&self) -> bool {
        self.scope == DEFAULT_SCOPE && self.collection == DEFAULT_COLLECTION
    }

    /// The bytes actually sent as the frame key. When collections were
    /// negotiated the wire key is `unsigned-LEB128(collection_id) ++ key`
    /// (spec §4.1); the default collection's id (0) still needs the single
    /// zero byte once collections are on, since the server distinguishes a
    /// collection-aware connection from a legacy one by framing alone.
    pub fn wire_key(&self, collection_id: Option<u32>) -> Bytes {
        match collection_id {
            Some(id) => {
                let mut out = encode_unsigned_leb128(id);
                out.extend_from_slice(self.key.as_bytes());
                Bytes::from(out)
            }
            None => Bytes::copy_from_slice(self.key.as_bytes()),
        }
    }
}

fn encode_unsigned_leb128(mut value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_key_without_collections_is_the_raw_key() {
        let id = DocumentId::new("travel-sample", "airport_1254");
        assert_eq!(&id.wire_key(None)[..], b"airport_1254");
    }

    #[test]
    fn wire_key_with_collections_prefixes_the_leb128_id() {
        let id = DocumentId::new("travel-sample", "airport_1254").in_collection("inventory", "airport");
        let wire = id.wire_key(Some(300));
        // 300 = 0b1_0010_1100 -> LEB128 bytes [0xac, 0x02]
        assert_eq!(&wire[..2], &[0xac, 0x02]);
        assert_eq!(&wire[2..], b"airport_1254");
    }

    #[test]
    fn default_collection_id_still_gets_a_single_zero_byte() {
        let id = DocumentId::new("default", "k");
        assert_eq!(&id.wire_key(Some(0))[..], &[0x00, b'k']);
    }
}
