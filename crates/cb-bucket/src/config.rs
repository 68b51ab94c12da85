//! The immutable cluster config snapshot (spec §3 `ClusterConfig`) and its
//! wire JSON shape, as returned by `GET_CLUSTER_CONFIG` and re-pushed on
//! `NOT_MY_VBUCKET`.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketType {
    Couchbase,
    Ephemeral,
    Memcached,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub collections: bool,
    #[serde(default)]
    pub durable_write: bool,
    #[serde(default)]
    pub xattr: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeServices {
    #[serde(rename = "kv", default)]
    pub kv_plain: Option<u16>,
    #[serde(rename = "kvSSL", default)]
    pub kv_tls: Option<u16>,
    #[serde(rename = "mgmt", default)]
    pub mgmt_plain: Option<u16>,
    #[serde(rename = "mgmtSSL", default)]
    pub mgmt_tls: Option<u16>,
    #[serde(rename = "n1ql", default)]
    pub query_plain: Option<u16>,
    #[serde(rename = "n1qlSSL", default)]
    pub query_tls: Option<u16>,
    #[serde(rename = "cbas", default)]
    pub analytics_plain: Option<u16>,
    #[serde(rename = "cbasSSL", default)]
    pub analytics_tls: Option<u16>,
    #[serde(rename = "fts", default)]
    pub search_plain: Option<u16>,
    #[serde(rename = "ftsSSL", default)]
    pub search_tls: Option<u16>,
    #[serde(rename = "capi", default)]
    pub views_plain: Option<u16>,
    #[serde(rename = "capiSSL", default)]
    pub views_tls: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub hostname: String,
    #[serde(rename = "nodeUUID")]
    pub node_uuid: String,
    #[serde(default)]
    pub services: NodeServices,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionEntry {
    /// Node indexes into the enclosing config's `nodes`: position 0 is the
    /// master, 1..N are replicas (spec §3 `PartitionMap`). `-1` denotes no
    /// replica assigned yet.
    pub node_indexes: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionMap {
    pub partitions: Vec<PartitionEntry>,
}

impl PartitionMap {
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Master node index for `key` (spec §8: `master == partition_map[CRC32(K)
    /// mod partition_count][0]`).
    pub fn master_for(&self, key: &[u8]) -> Option<usize> {
        self.node_for(key, 0)
    }

    pub fn node_for(&self, key: &[u8], replica: usize) -> Option<usize> {
        let partition_id = partition_id_for(key, self.partition_count());
        self.partitions
            .get(partition_id)
            .and_then(|p| p.node_indexes.get(replica))
            .filter(|&&idx| idx >= 0)
            .map(|&idx| idx as usize)
    }

    pub fn partition_id_for(&self, key: &[u8]) -> usize {
        partition_id_for(key, self.partition_count())
    }
}

pub fn partition_id_for(key: &[u8], partition_count: usize) -> usize {
    if partition_count == 0 {
        return 0;
    }
    (crc32fast::hash(key) as usize) % partition_count
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub rev: u64,
    pub nodes: Vec<NodeInfo>,
    #[serde(rename = "bucketType", default = "default_bucket_type")]
    pub bucket_type: BucketType,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(rename = "vBucketServerMap")]
    pub partition_map: PartitionMap,
}

fn default_bucket_type() -> BucketType {
    BucketType::Couchbase
}

impl ClusterConfig {
    pub fn parse(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_map() -> PartitionMap {
        PartitionMap {
            partitions: vec![
                PartitionEntry { node_indexes: vec![0, 1] },
                PartitionEntry { node_indexes: vec![1, 0] },
            ],
        }
    }

    #[test]
    fn master_lookup_matches_crc32_mod_partition_count() {
        let map = two_node_map();
        let key = b"user::42";
        let expected_partition = crc32fast::hash(key) as usize % map.partition_count();
        let expected_master = map.partitions[expected_partition].node_indexes[0];
        assert_eq!(map.master_for(key), Some(expected_master as usize));
    }

    #[test]
    fn negative_node_index_has_no_replica() {
        let map = PartitionMap { partitions: vec![PartitionEntry { node_indexes: vec![0, -1] }] };
        assert_eq!(map.node_for(b"k", 1), None);
    }
}
