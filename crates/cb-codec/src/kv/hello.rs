//! HELLO feature negotiation (spec §4.3, §6). The HELLO request value is a
//! sequence of 16-bit feature codes the client offers; the response value is
//! the subset the server accepted. Negotiation never fails outright — an
//! unsupported feature is simply absent from the reply — except when a
//! *required* feature comes back missing, which the session treats as a
//! fatal `NOT_SUPPORTED` condition (spec §4.3 state table).

use bytes::{Buf, BufMut, Bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Feature(pub u16);

impl Feature {
    pub const TLS: Feature = Feature(0x02);
    pub const TCP_NODELAY: Feature = Feature(0x03);
    pub const MUTATION_SEQNO: Feature = Feature(0x04);
    pub const XATTR: Feature = Feature(0x06);
    pub const XERROR: Feature = Feature(0x07);
    pub const SELECT_BUCKET: Feature = Feature(0x08);
    pub const SNAPPY: Feature = Feature(0x0a);
    pub const JSON: Feature = Feature(0x0b);
    pub const DUPLEX: Feature = Feature(0x0c);
    pub const CLUSTERMAP_CHANGE_NOTIFICATION: Feature = Feature(0x0d);
    pub const UNORDERED_EXECUTION: Feature = Feature(0x0e);
    pub const TRACING: Feature = Feature(0x0f);
    pub const ALT_REQUEST_SUPPORT: Feature = Feature(0x10);
    pub const SYNC_REPLICATION: Feature = Feature(0x11);
    pub const COLLECTIONS: Feature = Feature(0x12);
    pub const PRESERVE_TTL: Feature = Feature(0x14);
}

pub fn encode_features(features: &[Feature]) -> Bytes {
    let mut out = Vec::with_capacity(features.len() * 2);
    for f in features {
        out.put_u16(f.0);
    }
    Bytes::from(out)
}

pub fn decode_features(value: &[u8]) -> Vec<Feature> {
    let mut buf = value;
    let mut out = Vec::with_capacity(buf.len() / 2);
    while buf.remaining() >= 2 {
        out.push(Feature(buf.get_u16()));
    }
    out
}

/// The features every session requires; absence on the reply is a fatal
/// negotiation failure (spec §4.3 table: "NOT_SUPPORTED on required
/// feature" -> stopped).
pub const REQUIRED: &[Feature] = &[Feature::XERROR, Feature::SELECT_BUCKET];

pub fn missing_required(accepted: &[Feature]) -> Vec<Feature> {
    REQUIRED.iter().copied().filter(|r| !accepted.contains(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_feature_list() {
        let offered = vec![Feature::XATTR, Feature::SNAPPY, Feature::COLLECTIONS];
        let encoded = encode_features(&offered);
        let decoded = decode_features(&encoded);
        assert_eq!(decoded, offered);
    }

    #[test]
    fn detects_missing_required_features() {
        let accepted = vec![Feature::XATTR];
        let missing = missing_required(&accepted);
        assert!(missing.contains(&Feature::XERROR));
        assert!(missing.contains(&Feature::SELECT_BUCKET));
    }

    #[test]
    fn satisfied_when_all_required_present() {
        let accepted = vec![Feature::XERROR, Feature::SELECT_BUCKET, Feature::SNAPPY];
        assert!(missing_required(&accepted).is_empty());
    }
}
