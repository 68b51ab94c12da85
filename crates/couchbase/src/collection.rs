//! `Bucket`/`Scope`/`Collection` handles (spec §4.5, §3 `DocumentId`): the
//! per-document entry points. Every method here builds one attempt closure
//! and drives it through [`kv::run_with_retry`]; the closure itself only
//! ever touches the `cb-ops` operation pair for its opcode.

use crate::cluster::ClusterContext;
use crate::kv::{self, AttemptOutcome, AttemptResult};
use cb_bucket::Bucket as RoutingBucket;
use cb_core::{CouchbaseError, Deadline, ErrorKind, Idempotence, Timeout};
use cb_ops::document_id::{DocumentId, DEFAULT_COLLECTION, DEFAULT_SCOPE};
use cb_ops::kv::mutate::{MutateKind, MutateRequest};
use cb_ops::kv::subdoc::{LookupSpec, MutateSpec, SubdocLookupRequest, SubdocMutateRequest};
use cb_ops::kv::{delete, get, mutate, subdoc};
use std::sync::Arc;
use std::time::Duration;

/// A bucket's sessions and routing state, shared by every [`Scope`] and
/// [`Collection`] opened from it.
#[derive(Clone)]
pub struct Bucket {
    pub(crate) ctx: Arc<ClusterContext>,
    pub(crate) routing: Arc<RoutingBucket>,
    name: Arc<str>,
}

impl Bucket {
    pub(crate) fn new(ctx: Arc<ClusterContext>, routing: Arc<RoutingBucket>, name: String) -> Self {
        Self { ctx, routing, name: Arc::from(name) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_collection(&self) -> Collection {
        self.scope(DEFAULT_SCOPE).collection(DEFAULT_COLLECTION)
    }

    pub fn scope(&self, name: impl Into<String>) -> Scope {
        Scope { bucket: self.clone(), name: Arc::from(name.into()) }
    }
}

#[derive(Clone)]
pub struct Scope {
    bucket: Bucket,
    name: Arc<str>,
}

impl Scope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection { bucket: self.bucket.clone(), scope: Arc::clone(&self.name), collection: Arc::from(name.into()) }
    }
}

/// One named collection within a scope (the default scope's default
/// collection when the caller never named one, spec §3).
#[derive(Clone)]
pub struct Collection {
    bucket: Bucket,
    scope: Arc<str>,
    collection: Arc<str>,
}

impl Collection {
    fn document_id(&self, key: &str) -> DocumentId {
        DocumentId::new(self.bucket.name(), key).in_collection(self.scope.to_string(), self.collection.to_string())
    }

    fn deadline(&self, override_timeout: Option<Duration>) -> Deadline {
        match override_timeout {
            Some(d) => Timeout::from_millis(d.as_millis() as u64).deadline_from_now(),
            None => self.bucket.ctx.key_value_timeout().deadline_from_now(),
        }
    }

    async fn resolved(&self, key: &[u8]) -> AttemptResult<(u32, Arc<cb_session::Session>, u16)> {
        let collection_id = kv::resolve_collection_id(&self.bucket.routing, &self.scope, &self.collection).await?;
        let (session, vbucket) = kv::session_for(&self.bucket.routing, key)?;
        Ok((collection_id, session, vbucket))
    }

    pub async fn get(&self, key: &str, opts: kv::GetOptions) -> Result<kv::GetResult, CouchbaseError> {
        let id = self.document_id(key);
        let deadline = self.deadline(opts.timeout);
        let bucket = Arc::clone(&self.bucket.routing);
        let this = self.clone();

        kv::run_with_retry(self.bucket.ctx.orchestrator(), Idempotence::Idempotent, deadline, move |_attempt| {
            let id = id.clone();
            let this = this.clone();
            let bucket = Arc::clone(&bucket);
            async move {
                let (collection_id, session, vbucket) = this.resolved(id.key.as_bytes()).await?;
                let request = get::GetRequest { id: id.clone() };
                let frame = get::encode(&request, 0, vbucket, Some(collection_id)).map_err(AttemptOutcome::Terminal)?;
                let response = session.submit(frame, deadline, Idempotence::Idempotent).await.map_err(kv::classify_retryable)?;
                kv::handle_topology(&bucket, &response)?;
                let decoded = get::decode(&response).map_err(kv::classify_retryable)?;
                Ok(kv::GetResult { cas: decoded.cas, flags: decoded.flags, content: decoded.value })
            }
        })
        .await
    }

    async fn mutate(&self, kind: MutateKind, key: &str, value: bytes::Bytes, idempotence: Idempotence, request_opts: MutateRequestOptions) -> Result<kv::MutationResult, CouchbaseError> {
        let id = self.document_id(key);
        let deadline = self.deadline(request_opts.timeout);
        let bucket = Arc::clone(&self.bucket.routing);
        let this = self.clone();
        let ctx = Arc::clone(&self.bucket.ctx);
        let bucket_name: Arc<str> = Arc::from(self.bucket.name());

        kv::run_with_retry(self.bucket.ctx.orchestrator(), idempotence, deadline, move |_attempt| {
            let id = id.clone();
            let this = this.clone();
            let bucket = Arc::clone(&bucket);
            let value = value.clone();
            let request_opts = request_opts.clone();
            let ctx = Arc::clone(&ctx);
            let bucket_name = Arc::clone(&bucket_name);
            async move {
                let (collection_id, session, vbucket) = this.resolved(id.key.as_bytes()).await?;
                let request = MutateRequest {
                    id: id.clone(),
                    value,
                    flags: 0,
                    expiry_seconds: request_opts.expiry.map(|d| d.as_secs() as u32).unwrap_or(0),
                    cas: request_opts.cas,
                    durability: request_opts.durability,
                    preserve_expiry: request_opts.preserve_expiry,
                    data_type: cb_codec::kv::frame::datatype::JSON,
                };
                let frame = mutate::encode(kind, &request, 0, vbucket, Some(collection_id)).map_err(AttemptOutcome::Terminal)?;
                let response = session.submit(frame, deadline, idempotence).await.map_err(kv::classify_retryable)?;
                kv::handle_topology(&bucket, &response)?;
                let decoded = mutate::decode(&response, vbucket, request_opts.cas.is_some()).map_err(kv::classify_retryable)?;
                ctx.record_mutation(&bucket_name, decoded.mutation_token);
                Ok(kv::MutationResult::new(decoded.cas, decoded.mutation_token))
            }
        })
        .await
    }

    pub async fn upsert<T: serde::Serialize>(&self, key: &str, value: &T, opts: kv::UpsertOptions) -> Result<kv::MutationResult, CouchbaseError> {
        let value = encode_json(value)?;
        let request_opts = MutateRequestOptions {
            timeout: opts.timeout,
            expiry: opts.expiry,
            cas: None,
            durability: opts.durability,
            preserve_expiry: opts.preserve_expiry,
        };
        self.mutate(MutateKind::Upsert, key, value, Idempotence::Idempotent, request_opts).await
    }

    pub async fn insert<T: serde::Serialize>(&self, key: &str, value: &T, opts: kv::InsertOptions) -> Result<kv::MutationResult, CouchbaseError> {
        let value = encode_json(value)?;
        let request_opts = MutateRequestOptions {
            timeout: opts.timeout,
            expiry: opts.expiry,
            cas: None,
            durability: opts.durability,
            preserve_expiry: false,
        };
        self.mutate(MutateKind::Insert, key, value, Idempotence::NotIdempotent, request_opts).await
    }

    pub async fn replace<T: serde::Serialize>(&self, key: &str, value: &T, opts: kv::ReplaceOptions) -> Result<kv::MutationResult, CouchbaseError> {
        let value = encode_json(value)?;
        let idempotence = kv::replace_like_idempotence(opts.cas);
        let request_opts = MutateRequestOptions {
            timeout: opts.timeout,
            expiry: opts.expiry,
            cas: opts.cas,
            durability: opts.durability,
            preserve_expiry: opts.preserve_expiry,
        };
        self.mutate(MutateKind::Replace, key, value, idempotence, request_opts).await
    }

    pub async fn remove(&self, key: &str, opts: kv::RemoveOptions) -> Result<kv::MutationResult, CouchbaseError> {
        let id = self.document_id(key);
        let deadline = self.deadline(opts.timeout);
        let bucket = Arc::clone(&self.bucket.routing);
        let this = self.clone();
        let ctx = Arc::clone(&self.bucket.ctx);
        let bucket_name: Arc<str> = Arc::from(self.bucket.name());
        let idempotence = kv::replace_like_idempotence(opts.cas);
        let cas = opts.cas;

        kv::run_with_retry(self.bucket.ctx.orchestrator(), idempotence, deadline, move |_attempt| {
            let id = id.clone();
            let this = this.clone();
            let bucket = Arc::clone(&bucket);
            let ctx = Arc::clone(&ctx);
            let bucket_name = Arc::clone(&bucket_name);
            async move {
                let (collection_id, session, vbucket) = this.resolved(id.key.as_bytes()).await?;
                let request = delete::DeleteRequest { id: id.clone(), cas };
                let frame = delete::encode(&request, 0, vbucket, Some(collection_id)).map_err(AttemptOutcome::Terminal)?;
                let response = session.submit(frame, deadline, idempotence).await.map_err(kv::classify_retryable)?;
                kv::handle_topology(&bucket, &response)?;
                let decoded = delete::decode(&response, vbucket, cas.is_some()).map_err(kv::classify_retryable)?;
                ctx.record_mutation(&bucket_name, decoded.mutation_token);
                Ok(kv::MutationResult::new(decoded.cas, decoded.mutation_token))
            }
        })
        .await
    }

    pub async fn lookup_in(&self, key: &str, specs: Vec<kv::LookupInSpec>, opts: kv::LookupInOptions) -> Result<kv::LookupInResult, CouchbaseError> {
        let id = self.document_id(key);
        let deadline = self.deadline(opts.timeout);
        let bucket = Arc::clone(&self.bucket.routing);
        let this = self.clone();
        let wire_specs: Vec<LookupSpec> = specs.iter().map(|s| LookupSpec { opcode: s.opcode, xattr: s.xattr, path: s.path.clone() }).collect();

        kv::run_with_retry(self.bucket.ctx.orchestrator(), Idempotence::Idempotent, deadline, move |_attempt| {
            let id = id.clone();
            let this = this.clone();
            let bucket = Arc::clone(&bucket);
            let wire_specs = wire_specs.clone();
            async move {
                let (collection_id, session, vbucket) = this.resolved(id.key.as_bytes()).await?;
                let request = SubdocLookupRequest { id: id.clone(), specs: wire_specs };
                let frame = subdoc::encode_lookup(&request, 0, vbucket, Some(collection_id)).map_err(AttemptOutcome::Terminal)?;
                let response = session.submit(frame, deadline, Idempotence::Idempotent).await.map_err(kv::classify_retryable)?;
                kv::handle_topology(&bucket, &response)?;
                let decoded = subdoc::decode_lookup(&response, &request).map_err(kv::classify_retryable)?;
                Ok(kv::LookupInResult::new(decoded.cas, decoded.results))
            }
        })
        .await
    }

    pub async fn mutate_in(&self, key: &str, specs: Vec<kv::MutateInSpec>, opts: kv::MutateInOptions) -> Result<kv::MutateInResult, CouchbaseError> {
        let id = self.document_id(key);
        let deadline = self.deadline(opts.timeout);
        let bucket = Arc::clone(&self.bucket.routing);
        let this = self.clone();
        let ctx = Arc::clone(&self.bucket.ctx);
        let bucket_name: Arc<str> = Arc::from(self.bucket.name());
        let idempotence = kv::replace_like_idempotence(opts.cas);
        let cas = opts.cas;
        let wire_specs: Vec<MutateSpec> = specs.iter().map(|s| MutateSpec { opcode: s.opcode, xattr: s.xattr, path: s.path.clone(), value: s.value.clone() }).collect();

        kv::run_with_retry(self.bucket.ctx.orchestrator(), idempotence, deadline, move |_attempt| {
            let id = id.clone();
            let this = this.clone();
            let bucket = Arc::clone(&bucket);
            let ctx = Arc::clone(&ctx);
            let bucket_name = Arc::clone(&bucket_name);
            let wire_specs = wire_specs.clone();
            async move {
                let (collection_id, session, vbucket) = this.resolved(id.key.as_bytes()).await?;
                let request = SubdocMutateRequest { id: id.clone(), specs: wire_specs, cas };
                let frame = subdoc::encode_mutate(&request, 0, vbucket, Some(collection_id)).map_err(AttemptOutcome::Terminal)?;
                let response = session.submit(frame, deadline, idempotence).await.map_err(kv::classify_retryable)?;
                kv::handle_topology(&bucket, &response)?;
                let decoded = subdoc::decode_mutate(&response, &request, vbucket).map_err(kv::classify_retryable)?;
                ctx.record_mutation(&bucket_name, decoded.mutation_token);
                Ok(kv::MutateInResult::new(decoded.cas, decoded.mutation_token, decoded.results))
            }
        })
        .await
    }
}

#[derive(Debug, Clone)]
struct MutateRequestOptions {
    timeout: Option<Duration>,
    expiry: Option<Duration>,
    cas: Option<u64>,
    durability: Option<cb_ops::durability::DurabilityLevel>,
    preserve_expiry: bool,
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<bytes::Bytes, CouchbaseError> {
    serde_json::to_vec(value).map(bytes::Bytes::from).map_err(|e| CouchbaseError::new(ErrorKind::EncodingFailure, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_json_round_trips_through_serde() {
        let body = encode_json(&serde_json::json!({"city": "Bristol"})).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["city"], "Bristol");
    }

    #[test]
    fn default_collection_addresses_the_default_scope_and_collection() {
        let document_id = |bucket: &str, key: &str| {
            DocumentId::new(bucket, key).in_collection(DEFAULT_SCOPE.to_string(), DEFAULT_COLLECTION.to_string())
        };
        let id = document_id("travel-sample", "airport_1254");
        assert_eq!(id.scope, DEFAULT_SCOPE);
        assert_eq!(id.collection, DEFAULT_COLLECTION);
    }
}
