//! Groups the sessions for one bucket, owns the partition map, and routes
//! key/value operations to the node that currently owns each key (spec
//! §4.4).

pub mod bucket;
pub mod config;
pub mod manifest;

pub use bucket::{Bucket, NodeSetDiff};
pub use config::{BucketType, Capabilities, ClusterConfig, NodeInfo, NodeServices, PartitionEntry, PartitionMap};
pub use manifest::CollectionsManifest;
