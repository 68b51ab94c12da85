//! Sub-document lookup/mutate specs (spec §4.1, §8 scenario 5).
//!
//! The server requires every xattr-flagged entry in a multi-spec request to
//! precede the body entries. This module performs that reorder with a
//! *stable* sort (relative order within each group is preserved) and
//! remembers, for each wire position, which original index it came from, so
//! [`reorder_results`] can hand the caller back results in exactly the
//! order they specified their specs — regardless of how xattr/body entries
//! were interleaved.

use super::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut, Bytes};

pub const FLAG_XATTR: u8 = 0x04;

#[derive(Debug, Clone)]
pub struct SubdocSpec {
    pub opcode: u8,
    pub flags: u8,
    pub path: Bytes,
    /// Empty for lookup specs.
    pub value: Bytes,
}

impl SubdocSpec {
    pub fn is_xattr(&self) -> bool {
        self.flags & FLAG_XATTR != 0
    }
}

/// Stably partitions `specs` into xattr-first order and returns the encoded
/// wire bytes alongside a map from wire position to original index.
pub fn encode_specs(specs: &[SubdocSpec], with_value: bool) -> (Bytes, Vec<usize>) {
    let mut order: Vec<usize> = (0..specs.len()).collect();
    order.sort_by_key(|&i| !specs[i].is_xattr()); // xattr (true->0) sorts first; stable preserves ties.

    let mut out = Vec::new();
    for &i in &order {
        let spec = &specs[i];
        out.put_u8(spec.opcode);
        out.put_u8(spec.flags);
        out.put_u16(spec.path.len() as u16);
        if with_value {
            out.put_u32(spec.value.len() as u32);
        }
        out.put_slice(&spec.path);
        if with_value {
            out.put_slice(&spec.value);
        }
    }
    (Bytes::from(out), order)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub status: u16,
    pub value: Bytes,
}

/// Decode a multi-lookup response body: a flat sequence of
/// `{status: u16, valuelen: u32, value}` entries in wire order.
pub fn decode_lookup_results(mut value: &[u8], expected: usize) -> CodecResult<Vec<LookupResult>> {
    let mut results = Vec::with_capacity(expected);
    while value.remaining() >= 6 {
        let status = value.get_u16();
        let len = value.get_u32() as usize;
        if value.remaining() < len {
            return Err(CodecError::MalformedSubdoc("lookup result value length overruns buffer"));
        }
        let bytes = Bytes::copy_from_slice(&value[..len]);
        value.advance(len);
        results.push(LookupResult { status, value: bytes });
    }
    if results.len() != expected {
        return Err(CodecError::MalformedSubdoc("lookup result count does not match spec count"));
    }
    Ok(results)
}

/// Restore caller order given the wire-order results and the map produced
/// by [`encode_specs`] (spec §8: "response fields are returned in the
/// caller's original order" regardless of xattr/body interleaving).
pub fn reorder_results<T: Clone>(wire_order_results: &[T], order: &[usize]) -> Vec<T> {
    let mut out: Vec<Option<T>> = vec![None; wire_order_results.len()];
    for (wire_pos, &original_index) in order.iter().enumerate() {
        out[original_index] = Some(wire_order_results[wire_pos].clone());
    }
    out.into_iter().map(|v| v.expect("order is a permutation of 0..len")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(opcode: u8, xattr: bool, path: &'static str) -> SubdocSpec {
        SubdocSpec {
            opcode,
            flags: if xattr { FLAG_XATTR } else { 0 },
            path: Bytes::from_static(path.as_bytes()),
            value: Bytes::new(),
        }
    }

    #[test]
    fn xattr_entries_sort_before_body_entries_stably() {
        // get($XTOC, xattr), get(foo), get(meta.rev, xattr) — spec §8 scenario 5.
        let specs = vec![spec(0xc5, true, "$XTOC"), spec(0xc5, false, "foo"), spec(0xc5, true, "meta.rev")];
        let (wire, order) = encode_specs(&specs, false);
        assert_eq!(order, vec![0, 2, 1]);
        // Decode the wire entries back out to confirm encode order matches `order`.
        let mut buf = &wire[..];
        let mut decoded_paths = Vec::new();
        while buf.remaining() > 0 {
            let _opcode = buf.get_u8();
            let _flags = buf.get_u8();
            let len = buf.get_u16() as usize;
            decoded_paths.push(std::str::from_utf8(&buf[..len]).unwrap().to_string());
            buf.advance(len);
        }
        assert_eq!(decoded_paths, vec!["$XTOC", "meta.rev", "foo"]);
    }

    #[test]
    fn results_are_restored_to_caller_order() {
        let specs = vec![spec(0xc5, true, "$XTOC"), spec(0xc5, false, "foo"), spec(0xc5, true, "meta.rev")];
        let (_, order) = encode_specs(&specs, false);
        // Simulate server replying in wire order: $XTOC, meta.rev, foo.
        let wire_results = vec!["$XTOC-val", "meta.rev-val", "foo-val"];
        let restored = reorder_results(&wire_results, &order);
        assert_eq!(restored, vec!["$XTOC-val", "foo-val", "meta.rev-val"]);
    }

    #[test]
    fn lookup_results_round_trip() {
        let mut raw = Vec::new();
        raw.put_u16(0);
        raw.put_u32(3);
        raw.put_slice(b"bar");
        raw.put_u16(1);
        raw.put_u32(0);
        let results = decode_lookup_results(&raw, 2).unwrap();
        assert_eq!(results[0].status, 0);
        assert_eq!(&results[0].value[..], b"bar");
        assert_eq!(results[1].status, 1);
        assert!(results[1].value.is_empty());
    }
}
