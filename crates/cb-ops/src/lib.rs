//! The operation layer (spec §4.6): per-operation request/response structs
//! with pure `encode`/`decode` functions, free of I/O. Key/value operations
//! are driven by `cb-session`; the query operation is driven by
//! `cb-cluster`'s HTTP dispatch.

pub mod document_id;
pub mod durability;
pub mod kv;
pub mod mutation_state;
pub mod query;
pub mod status;

pub use document_id::DocumentId;
pub use durability::DurabilityLevel;
pub use mutation_state::{MutationState, MutationToken};
pub use query::{QueryRequest, QueryResponse};
