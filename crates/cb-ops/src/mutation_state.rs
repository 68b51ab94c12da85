//! `MutationToken` / `MutationState` bookkeeping (spec §3, §8 scenario 2):
//! mutations hand the caller a token, and a later query can present the
//! accumulated tokens as `scan_vectors` to request read-your-writes
//! consistency against the partitions those mutations touched.

use cb_codec::http::ScanVector;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationToken {
    pub partition_id: u16,
    pub partition_uuid: u64,
    pub sequence_number: u64,
}

/// Accumulates the newest token per (bucket, partition) observed across a
/// series of mutations, so a scan vector only ever needs to wait on the most
/// recent write to a given partition.
#[derive(Debug, Clone, Default)]
pub struct MutationState {
    tokens: HashMap<String, HashMap<u16, MutationToken>>,
}

impl MutationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bucket: &str, token: MutationToken) {
        let per_bucket = self.tokens.entry(bucket.to_string()).or_default();
        match per_bucket.get(&token.partition_id) {
            Some(existing) if existing.sequence_number >= token.sequence_number => {}
            _ => {
                per_bucket.insert(token.partition_id, token);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.values().all(|b| b.is_empty())
    }

    /// Build the `scan_vector` payload for `bucket`'s tokens, in the sparse
    /// `{partition_id: [sequence_number, partition_uuid_as_string]}` shape
    /// the query service expects.
    pub fn to_scan_vector(&self, bucket: &str) -> ScanVector {
        let mut sparse = Map::new();
        if let Some(per_bucket) = self.tokens.get(bucket) {
            for token in per_bucket.values() {
                sparse.insert(
                    token.partition_id.to_string(),
                    Value::Array(vec![
                        Value::Number(token.sequence_number.into()),
                        Value::String(token.partition_uuid.to_string()),
                    ]),
                );
            }
        }
        ScanVector { sparse }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(partition_id: u16, seq: u64) -> MutationToken {
        MutationToken { partition_id, partition_uuid: 1, sequence_number: seq }
    }

    #[test]
    fn keeps_only_the_newest_token_per_partition() {
        let mut state = MutationState::new();
        state.add("default", token(5, 10));
        state.add("default", token(5, 3));
        state.add("default", token(5, 20));
        let vector = state.to_scan_vector("default");
        let entry = vector.sparse.get("5").unwrap().as_array().unwrap();
        assert_eq!(entry[0], Value::Number(20.into()));
    }

    #[test]
    fn scan_vector_is_scoped_to_the_requested_bucket() {
        let mut state = MutationState::new();
        state.add("a", token(1, 1));
        state.add("b", token(2, 1));
        assert!(state.to_scan_vector("a").sparse.contains_key("1"));
        assert!(!state.to_scan_vector("a").sparse.contains_key("2"));
    }
}
