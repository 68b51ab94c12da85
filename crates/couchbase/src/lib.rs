//! Public facade over the key/value and query services (spec §3, §4.5):
//! `Cluster::connect` parses a connection string without doing I/O, then
//! `Cluster::bucket` bootstraps sessions and the collections manifest on
//! first access. Every document operation hangs off a [`Collection`],
//! reached through `Bucket::scope`/`Scope::collection` or
//! `Bucket::default_collection`.

pub mod cluster;
pub mod collection;
pub mod kv;

pub use cb_core::{CouchbaseError, ErrorKind};
pub use cb_ops::durability::DurabilityLevel;
pub use cb_ops::mutation_state::MutationToken;
pub use cluster::{Cluster, ClusterOptions, QueryOptions, Service};
pub use cb_ops::query::QueryResponse;
pub use collection::{Bucket, Collection, Scope};
pub use kv::{
    GetOptions, GetResult, InsertOptions, LookupInOptions, LookupInResult, LookupInSpec, MutateInOptions, MutateInResult,
    MutateInSpec, MutationResult, RemoveOptions, ReplaceOptions, UpsertOptions,
};
