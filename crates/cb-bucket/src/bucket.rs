//! Groups one bucket's sessions and owns its partition map (spec §4.4
//! component design refers to this as "Bucket").

use crate::config::ClusterConfig;
use crate::manifest::CollectionsManifest;
use arc_swap::ArcSwapOption;
use cb_core::{CouchbaseError, ErrorKind};
use cb_session::Session;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A bucket's config snapshot plus its node sessions. The config is
/// replaced atomically by pointer swap (spec §3 invariant: "no operation
/// observes a partially updated map") and gated on revision so a stale
/// NOT_MY_VBUCKET reply can never roll the map backwards.
pub struct Bucket {
    name: String,
    config: ArcSwapOption<ClusterConfig>,
    manifest: ArcSwapOption<CollectionsManifest>,
    sessions: DashMap<usize, Arc<Session>>,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ArcSwapOption::from(None),
            manifest: ArcSwapOption::from(None),
            sessions: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Option<Arc<ClusterConfig>> {
        self.config.load_full()
    }

    /// Install `new` if it is newer than what we have (or we have none
    /// yet). Returns whether it was accepted.
    pub fn apply_config(&self, new: ClusterConfig) -> bool {
        let accepted = match self.config.load_full() {
            Some(current) if new.rev <= current.rev => false,
            _ => true,
        };
        if accepted {
            info!(bucket = %self.name, revision = new.rev, "installing newer cluster config");
            self.config.store(Some(Arc::new(new)));
        } else {
            debug!(bucket = %self.name, revision = new.rev, "ignoring stale or duplicate config");
        }
        accepted
    }

    pub fn bind_session(&self, node_index: usize, session: Arc<Session>) {
        self.sessions.insert(node_index, session);
    }

    pub fn session_for_node(&self, node_index: usize) -> Option<Arc<Session>> {
        self.sessions.get(&node_index).map(|e| Arc::clone(e.value()))
    }

    /// Any bound session, for bucket-wide requests that are not
    /// key-routed (the collections manifest fetch, most notably).
    pub fn any_session(&self) -> Option<Arc<Session>> {
        self.sessions.iter().next().map(|e| Arc::clone(e.value()))
    }

    pub fn manifest(&self) -> Option<Arc<CollectionsManifest>> {
        self.manifest.load_full()
    }

    /// Install a freshly fetched manifest. Unlike `apply_config` there is
    /// no revision gate: a manifest fetch is always triggered by the
    /// caller wanting the latest one, so last-write-wins is correct.
    pub fn apply_manifest(&self, manifest: CollectionsManifest) {
        debug!(bucket = %self.name, uid = manifest.uid(), "installing collections manifest");
        self.manifest.store(Some(Arc::new(manifest)));
    }

    /// Resolve `(scope, collection)` to its wire id. The default
    /// collection is id 0 whether or not a manifest has been fetched yet,
    /// since every bucket has it by construction; anything else requires
    /// a manifest lookup.
    pub fn collection_id(&self, scope: &str, collection: &str) -> Result<u32, CouchbaseError> {
        if scope == "_default" && collection == "_default" {
            return Ok(0);
        }
        let manifest = self
            .manifest
            .load_full()
            .ok_or_else(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, "collections manifest not fetched yet"))?;
        manifest
            .collection_id(scope, collection)
            .ok_or_else(|| CouchbaseError::new(ErrorKind::CollectionNotFound, format!("no such collection `{scope}.{collection}`")))
    }

    /// Master node index for `key` under the current config (spec §8
    /// invariant: `master == partition_map[CRC32(K) mod partition_count][0]`).
    pub fn master_node_for(&self, key: &[u8]) -> Result<usize, CouchbaseError> {
        let config = self.config.load_full().ok_or_else(|| {
            CouchbaseError::new(ErrorKind::ServiceNotAvailable, "bucket has not received a cluster config yet")
        })?;
        config
            .partition_map
            .master_for(key)
            .ok_or_else(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, "no master assigned for this key's partition"))
    }

    /// The session that currently owns `key`, ready to accept a command.
    pub fn session_for_key(&self, key: &[u8]) -> Result<Arc<Session>, CouchbaseError> {
        let node_index = self.master_node_for(key)?;
        self.session_for_node(node_index)
            .ok_or_else(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, "no session established for the owning node yet"))
    }

    /// Handle a NOT_MY_VBUCKET reply that carries a fresher config (spec
    /// §4.4, §8 scenario 4): install it, then the caller is expected to
    /// resubmit through the retry orchestrator against the new master.
    pub fn handle_not_my_vbucket(&self, config_body: &[u8]) -> Result<(), CouchbaseError> {
        let config = ClusterConfig::parse(config_body)
            .map_err(|e| CouchbaseError::new(ErrorKind::ParsingFailure, e.to_string()))?;
        self.apply_config(config);
        Ok(())
    }

    /// Diff the previous and current node sets so the caller knows which
    /// sessions to open and which to tear down after a config swap.
    pub fn node_set_diff(&self, previous: &ClusterConfig, current: &ClusterConfig) -> NodeSetDiff {
        let previous_hosts: std::collections::HashSet<&str> =
            previous.nodes.iter().map(|n| n.hostname.as_str()).collect();
        let current_hosts: std::collections::HashSet<&str> =
            current.nodes.iter().map(|n| n.hostname.as_str()).collect();

        NodeSetDiff {
            added: current_hosts.difference(&previous_hosts).map(|h| h.to_string()).collect(),
            removed: previous_hosts.difference(&current_hosts).map(|h| h.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct NodeSetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BucketType, Capabilities, NodeInfo, NodeServices, PartitionEntry, PartitionMap};

    fn config(rev: u64) -> ClusterConfig {
        ClusterConfig {
            rev,
            nodes: vec![NodeInfo {
                hostname: "node1".to_string(),
                node_uuid: "uuid-1".to_string(),
                services: NodeServices { kv_plain: Some(11210), mgmt_plain: Some(8091), ..NodeServices::default() },
            }],
            bucket_type: BucketType::Couchbase,
            capabilities: Capabilities::default(),
            partition_map: PartitionMap { partitions: vec![PartitionEntry { node_indexes: vec![0] }] },
        }
    }

    #[test]
    fn stale_config_is_rejected() {
        let bucket = Bucket::new("default");
        assert!(bucket.apply_config(config(5)));
        assert!(!bucket.apply_config(config(3)));
        assert_eq!(bucket.config().unwrap().rev, 5);
    }

    #[test]
    fn session_for_key_requires_both_config_and_bound_session() {
        let bucket = Bucket::new("default");
        assert!(bucket.session_for_key(b"foo").is_err());
        bucket.apply_config(config(1));
        assert!(bucket.session_for_key(b"foo").is_err());
    }

    #[test]
    fn default_collection_resolves_without_a_manifest() {
        let bucket = Bucket::new("default");
        assert_eq!(bucket.collection_id("_default", "_default").unwrap(), 0);
    }

    #[test]
    fn named_collection_requires_a_fetched_manifest() {
        let bucket = Bucket::new("default");
        assert!(bucket.collection_id("inventory", "airport").is_err());
        bucket.apply_manifest(
            crate::manifest::CollectionsManifest::parse(
                br#"{"uid":"1","scopes":[{"name":"inventory","uid":"1","collections":[{"name":"airport","uid":"8"}]}]}"#,
            )
            .unwrap(),
        );
        assert_eq!(bucket.collection_id("inventory", "airport").unwrap(), 8);
    }

    #[test]
    fn node_set_diff_detects_additions_and_removals() {
        let bucket = Bucket::new("default");
        let mut next = config(2);
        next.nodes.push(NodeInfo {
            hostname: "node2".to_string(),
            node_uuid: "uuid-2".to_string(),
            services: NodeServices { kv_plain: Some(11210), mgmt_plain: Some(8091), ..NodeServices::default() },
        });
        let diff = bucket.node_set_diff(&config(1), &next);
        assert_eq!(diff.added, vec!["node2".to_string()]);
        assert!(diff.removed.is_empty());
    }
}
