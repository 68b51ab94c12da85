//! Shared key/value dispatch (spec §4.4, §4.6, §4.7): resolves the session
//! owning a key, builds the wire frame through the matching `cb-ops`
//! operation, and feeds topology or collection-routing failures back into
//! the retry orchestrator instead of surfacing them to the caller.
//!
//! Every `Collection` method in [`crate::collection`] drives one attempt
//! closure through [`run_with_retry`]; this module only holds the plumbing
//! those closures share.

use bytes::Bytes;
use cb_bucket::Bucket as RoutingBucket;
use cb_codec::kv::{Frame, Status};
use cb_core::{CouchbaseError, Deadline, ErrorKind, Idempotence, RetryReason, Timeout};
use cb_ops::durability::DurabilityLevel;
use cb_ops::mutation_state::MutationToken;
use cb_retry::RetryOrchestrator;
use cb_session::Session;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// What one attempt of a key/value operation ended with: a value worth
/// retrying against, or a terminal failure the caller sees as-is.
pub(crate) enum AttemptOutcome {
    Retry(RetryReason, CouchbaseError),
    Terminal(CouchbaseError),
}

pub(crate) type AttemptResult<T> = Result<T, AttemptOutcome>;

/// Drives `attempt` under `orchestrator` until it returns a value, a
/// terminal error, or the orchestrator gives up against `deadline` (spec
/// §4.7).
pub(crate) async fn run_with_retry<T, F, Fut>(
    orchestrator: &RetryOrchestrator,
    idempotence: Idempotence,
    deadline: Deadline,
    mut attempt: F,
) -> Result<T, CouchbaseError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = AttemptResult<T>>,
{
    let outcome = cb_retry::retry_with_backoff(orchestrator, idempotence, deadline, |n| {
        let fut = attempt(n);
        async move {
            match fut.await {
                Ok(value) => Ok(Ok(value)),
                Err(AttemptOutcome::Retry(reason, err)) => Err((reason, err)),
                Err(AttemptOutcome::Terminal(err)) => Ok(Err(err)),
            }
        }
    })
    .await;

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(terminal)) => Err(terminal),
        Err(exhausted) => Err(exhausted.last_error),
    }
}

/// Maps a failure observed mid-attempt (a `Session::submit` transport error,
/// or a status the operation's `decode` turned into an error) onto a retry
/// signal or a terminal error, per the reason set in spec §4.7.
pub(crate) fn classify_retryable(err: CouchbaseError) -> AttemptOutcome {
    match err.kind() {
        ErrorKind::ServiceNotAvailable => AttemptOutcome::Retry(RetryReason::NotReady, err),
        ErrorKind::TemporaryFailure | ErrorKind::RateLimited => AttemptOutcome::Retry(RetryReason::TemporaryFailure, err),
        ErrorKind::DocumentLocked => AttemptOutcome::Retry(RetryReason::Locked, err),
        _ => AttemptOutcome::Terminal(err),
    }
}

/// The session currently owning `key`'s partition, plus that partition's
/// vbucket id, or a `NotReady` retry signal if the bucket has no config or
/// no session bound to the master yet.
pub(crate) fn session_for(bucket: &RoutingBucket, key: &[u8]) -> AttemptResult<(Arc<Session>, u16)> {
    let config = bucket.config().ok_or_else(|| {
        AttemptOutcome::Retry(RetryReason::NotReady, CouchbaseError::new(ErrorKind::ServiceNotAvailable, "bucket has no cluster config yet"))
    })?;
    let vbucket = config.partition_map.partition_id_for(key) as u16;
    let session = bucket.session_for_key(key).map_err(|e| AttemptOutcome::Retry(RetryReason::NotReady, e))?;
    Ok((session, vbucket))
}

/// Resolve `(scope, collection)` to its wire id, refreshing the manifest
/// once if the pair is not yet cached (spec §4.1 supplement: collections
/// must be resolved before a key/value frame can be built).
pub(crate) async fn resolve_collection_id(bucket: &RoutingBucket, scope: &str, collection: &str) -> AttemptResult<u32> {
    match bucket.collection_id(scope, collection) {
        Ok(id) => Ok(id),
        Err(first_err) => {
            refresh_manifest(bucket).await.map_err(|e| AttemptOutcome::Retry(RetryReason::CollectionUnknown, e))?;
            bucket.collection_id(scope, collection).map_err(|_| AttemptOutcome::Retry(RetryReason::CollectionUnknown, first_err))
        }
    }
}

pub(crate) async fn refresh_manifest(bucket: &RoutingBucket) -> Result<(), CouchbaseError> {
    let session = bucket
        .any_session()
        .ok_or_else(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, "no session available to refresh the collections manifest"))?;
    let frame = cb_ops::kv::manifest::encode(0)?;
    let deadline = Timeout::from_millis(5_000).deadline_from_now();
    let response = session.submit(frame, deadline, Idempotence::Idempotent).await?;
    let body = cb_ops::kv::manifest::decode(&response)?;
    let manifest = cb_bucket::CollectionsManifest::parse(&body).map_err(|e| CouchbaseError::new(ErrorKind::ParsingFailure, e.to_string()))?;
    bucket.apply_manifest(manifest);
    Ok(())
}

/// Inspects a response's status for the two topology failures the bucket
/// layer (not the operation layer) knows how to react to: a stale
/// partition map, or a stale collection id (spec §4.4: "the attached new
/// config is installed ... the operation is re-routed through the retry
/// orchestrator"). Any other status is left for the operation's own
/// `decode` to interpret.
pub(crate) fn handle_topology(bucket: &RoutingBucket, frame: &Frame) -> AttemptResult<()> {
    match frame.header.status() {
        Status::NOT_MY_VBUCKET => {
            if let Err(e) = bucket.handle_not_my_vbucket(&frame.value) {
                warn!(error = %e, "failed to parse NOT_MY_VBUCKET config body, retrying against the current map");
            }
            Err(AttemptOutcome::Retry(
                RetryReason::NotMyVbucket,
                CouchbaseError::new(ErrorKind::ServiceNotAvailable, "server reported NOT_MY_VBUCKET"),
            ))
        }
        Status::UNKNOWN_COLLECTION | Status::NOT_MY_COLLECTION => Err(AttemptOutcome::Retry(
            RetryReason::CollectionUnknown,
            CouchbaseError::new(ErrorKind::CollectionNotFound, "server reported the collection id is stale"),
        )),
        _ => Ok(()),
    }
}

/// Mutations are idempotent only if the caller attached a CAS precondition
/// (spec §4.7); `Insert` has no CAS concept and is never idempotent.
pub(crate) fn replace_like_idempotence(cas: Option<u64>) -> Idempotence {
    if cas.is_some() {
        Idempotence::Idempotent
    } else {
        Idempotence::NotIdempotent
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub timeout: Option<std::time::Duration>,
}

#[derive(Debug, Clone)]
pub struct GetResult {
    pub(crate) cas: u64,
    pub(crate) flags: u32,
    pub(crate) content: Bytes,
}

impl GetResult {
    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, CouchbaseError> {
        serde_json::from_slice(&self.content).map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))
    }

    pub fn raw_content(&self) -> &[u8] {
        &self.content
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    pub timeout: Option<std::time::Duration>,
    pub expiry: Option<std::time::Duration>,
    pub durability: Option<DurabilityLevel>,
    pub preserve_expiry: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    pub timeout: Option<std::time::Duration>,
    pub expiry: Option<std::time::Duration>,
    pub durability: Option<DurabilityLevel>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplaceOptions {
    pub timeout: Option<std::time::Duration>,
    pub expiry: Option<std::time::Duration>,
    pub cas: Option<u64>,
    pub durability: Option<DurabilityLevel>,
    pub preserve_expiry: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    pub timeout: Option<std::time::Duration>,
    pub cas: Option<u64>,
    pub durability: Option<DurabilityLevel>,
}

#[derive(Debug, Clone)]
pub struct MutationResult {
    cas: u64,
    mutation_token: Option<MutationToken>,
}

impl MutationResult {
    pub(crate) fn new(cas: u64, mutation_token: Option<MutationToken>) -> Self {
        Self { cas, mutation_token }
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn mutation_token(&self) -> Option<MutationToken> {
        self.mutation_token
    }
}

#[derive(Debug, Clone)]
pub struct LookupInSpec {
    pub(crate) opcode: u8,
    pub(crate) xattr: bool,
    pub(crate) path: String,
}

impl LookupInSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self { opcode: cb_ops::kv::subdoc::entry_opcode::GET, xattr: false, path: path.into() }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Self { opcode: cb_ops::kv::subdoc::entry_opcode::EXISTS, xattr: false, path: path.into() }
    }

    pub fn count(path: impl Into<String>) -> Self {
        Self { opcode: cb_ops::kv::subdoc::entry_opcode::GET_COUNT, xattr: false, path: path.into() }
    }

    pub fn xattr(mut self) -> Self {
        self.xattr = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MutateInSpec {
    pub(crate) opcode: u8,
    pub(crate) xattr: bool,
    pub(crate) path: String,
    pub(crate) value: Bytes,
}

impl MutateInSpec {
    pub fn upsert<T: Serialize>(path: impl Into<String>, value: &T) -> Result<Self, CouchbaseError> {
        Self::with_json(cb_ops::kv::subdoc::entry_opcode::DICT_UPSERT, path, value)
    }

    pub fn insert<T: Serialize>(path: impl Into<String>, value: &T) -> Result<Self, CouchbaseError> {
        Self::with_json(cb_ops::kv::subdoc::entry_opcode::DICT_ADD, path, value)
    }

    pub fn replace<T: Serialize>(path: impl Into<String>, value: &T) -> Result<Self, CouchbaseError> {
        Self::with_json(cb_ops::kv::subdoc::entry_opcode::REPLACE, path, value)
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self { opcode: cb_ops::kv::subdoc::entry_opcode::DELETE, xattr: false, path: path.into(), value: Bytes::new() }
    }

    pub fn array_append<T: Serialize>(path: impl Into<String>, value: &T) -> Result<Self, CouchbaseError> {
        Self::with_json(cb_ops::kv::subdoc::entry_opcode::ARRAY_PUSH_LAST, path, value)
    }

    pub fn increment(path: impl Into<String>, delta: i64) -> Self {
        Self { opcode: cb_ops::kv::subdoc::entry_opcode::COUNTER, xattr: false, path: path.into(), value: Bytes::from(delta.to_string()) }
    }

    pub fn xattr(mut self) -> Self {
        self.xattr = true;
        self
    }

    fn with_json<T: Serialize>(opcode: u8, path: impl Into<String>, value: &T) -> Result<Self, CouchbaseError> {
        let encoded = serde_json::to_vec(value).map_err(|e| CouchbaseError::new(ErrorKind::EncodingFailure, e.to_string()))?;
        Ok(Self { opcode, xattr: false, path: path.into(), value: Bytes::from(encoded) })
    }
}

#[derive(Debug, Clone, Default)]
pub struct LookupInOptions {
    pub timeout: Option<std::time::Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct MutateInOptions {
    pub timeout: Option<std::time::Duration>,
    pub cas: Option<u64>,
    pub durability: Option<DurabilityLevel>,
}

#[derive(Debug, Clone)]
pub struct LookupInResult {
    cas: u64,
    fields: Vec<cb_ops::kv::subdoc::SubdocLookupFieldResult>,
}

impl LookupInResult {
    pub(crate) fn new(cas: u64, fields: Vec<cb_ops::kv::subdoc::SubdocLookupFieldResult>) -> Self {
        Self { cas, fields }
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn exists(&self, index: usize) -> bool {
        self.fields.get(index).map(|f| Status(f.status).is_success()).unwrap_or(false)
    }

    pub fn content_as<T: DeserializeOwned>(&self, index: usize) -> Result<T, CouchbaseError> {
        let field = self
            .fields
            .get(index)
            .ok_or_else(|| CouchbaseError::new(ErrorKind::InvalidArgument, "lookup_in spec index out of range"))?;
        cb_ops::status::status_to_result(Status(field.status), "lookup_in field", false)?;
        serde_json::from_slice(&field.value).map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct MutateInResult {
    cas: u64,
    mutation_token: Option<MutationToken>,
    fields: Vec<cb_ops::kv::subdoc::SubdocMutateFieldResult>,
}

impl MutateInResult {
    pub(crate) fn new(cas: u64, mutation_token: Option<MutationToken>, fields: Vec<cb_ops::kv::subdoc::SubdocMutateFieldResult>) -> Self {
        Self { cas, mutation_token, fields }
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn mutation_token(&self) -> Option<MutationToken> {
        self.mutation_token
    }

    pub fn content_as<T: DeserializeOwned>(&self, index: usize) -> Result<T, CouchbaseError> {
        let field = self
            .fields
            .get(index)
            .ok_or_else(|| CouchbaseError::new(ErrorKind::InvalidArgument, "mutate_in spec index out of range"))?;
        serde_json::from_slice(&field.value).map_err(|e| CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_bucket::Bucket as RoutingBucket;
    use cb_codec::kv::frame::Frame;
    use cb_codec::kv::opcode::{Opcode, Status};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn classify_retryable_maps_transient_kinds_to_retry() {
        assert!(matches!(
            classify_retryable(CouchbaseError::new(ErrorKind::ServiceNotAvailable, "down")),
            AttemptOutcome::Retry(RetryReason::NotReady, _)
        ));
        assert!(matches!(
            classify_retryable(CouchbaseError::new(ErrorKind::TemporaryFailure, "busy")),
            AttemptOutcome::Retry(RetryReason::TemporaryFailure, _)
        ));
        assert!(matches!(
            classify_retryable(CouchbaseError::new(ErrorKind::RateLimited, "slow down")),
            AttemptOutcome::Retry(RetryReason::TemporaryFailure, _)
        ));
        assert!(matches!(
            classify_retryable(CouchbaseError::new(ErrorKind::DocumentLocked, "locked")),
            AttemptOutcome::Retry(RetryReason::Locked, _)
        ));
    }

    #[test]
    fn classify_retryable_leaves_everything_else_terminal() {
        assert!(matches!(
            classify_retryable(CouchbaseError::new(ErrorKind::DocumentNotFound, "gone")),
            AttemptOutcome::Terminal(_)
        ));
        assert!(matches!(
            classify_retryable(CouchbaseError::new(ErrorKind::CasMismatch, "stale cas")),
            AttemptOutcome::Terminal(_)
        ));
    }

    #[test]
    fn replace_like_idempotence_requires_a_cas() {
        assert_eq!(replace_like_idempotence(Some(7)), Idempotence::Idempotent);
        assert_eq!(replace_like_idempotence(None), Idempotence::NotIdempotent);
    }

    fn frame_with_status(status: u16) -> Frame {
        let mut frame = Frame::request(Opcode(0x00), 0, 0, Bytes::new(), Bytes::new(), Bytes::new()).unwrap();
        frame.header.vbucket_or_status = status;
        frame
    }

    #[test]
    fn handle_topology_retries_not_my_vbucket_and_leaves_the_bucket_usable() {
        let bucket = RoutingBucket::new("travel-sample");
        let frame = frame_with_status(Status::NOT_MY_VBUCKET.0);
        let result = handle_topology(&bucket, &frame);
        assert!(matches!(result, Err(AttemptOutcome::Retry(RetryReason::NotMyVbucket, _))));
    }

    #[test]
    fn handle_topology_retries_unknown_and_not_my_collection() {
        let bucket = RoutingBucket::new("travel-sample");
        for status in [Status::UNKNOWN_COLLECTION.0, Status::NOT_MY_COLLECTION.0] {
            let frame = frame_with_status(status);
            let result = handle_topology(&bucket, &frame);
            assert!(matches!(result, Err(AttemptOutcome::Retry(RetryReason::CollectionUnknown, _))));
        }
    }

    #[test]
    fn handle_topology_leaves_every_other_status_for_the_operation_decode() {
        let bucket = RoutingBucket::new("travel-sample");
        let frame = frame_with_status(Status::SUCCESS.0);
        assert!(handle_topology(&bucket, &frame).is_ok());
        let frame = frame_with_status(Status::KEY_NOT_FOUND.0);
        assert!(handle_topology(&bucket, &frame).is_ok());
    }

    #[tokio::test]
    async fn run_with_retry_retries_until_the_attempt_succeeds() {
        let orchestrator = cb_retry::RetryOrchestrator::new(cb_retry::BackoffPolicy { base: std::time::Duration::from_millis(1), max: std::time::Duration::from_millis(5) });
        let deadline = Timeout::from_millis(5_000).deadline_from_now();
        let attempts = AtomicU32::new(0);

        let result = run_with_retry(&orchestrator, Idempotence::Idempotent, deadline, |_attempt| {
            let count = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(AttemptOutcome::Retry(RetryReason::NotReady, CouchbaseError::new(ErrorKind::ServiceNotAvailable, "not ready")))
                } else {
                    Ok(count)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_with_retry_stops_immediately_on_a_terminal_failure() {
        let orchestrator = cb_retry::RetryOrchestrator::new(cb_retry::BackoffPolicy::default());
        let deadline = Timeout::from_millis(5_000).deadline_from_now();
        let attempts = AtomicU32::new(0);

        let result: Result<(), CouchbaseError> = run_with_retry(&orchestrator, Idempotence::Idempotent, deadline, |_attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(AttemptOutcome::Terminal(CouchbaseError::new(ErrorKind::DocumentNotFound, "no such document"))) }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::DocumentNotFound);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
