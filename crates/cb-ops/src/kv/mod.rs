//! Key/value operation pairs (spec §4.6): each submodule holds a request
//! struct, a response struct, and pure `encode`/`decode` functions driven by
//! `cb-session`.

pub mod delete;
pub mod get;
pub mod manifest;
pub mod mutate;
pub mod subdoc;

pub use delete::{DeleteRequest, DeleteResponse};
pub use get::{GetRequest, GetResponse};
pub use mutate::{MutateKind, MutateRequest, MutateResponse};
pub use subdoc::{
    LookupSpec, MutateSpec, SubdocLookupFieldResult, SubdocLookupRequest, SubdocLookupResponse, SubdocMutateFieldResult,
    SubdocMutateRequest, SubdocMutateResponse,
};
