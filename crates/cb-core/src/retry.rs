//! The retry vocabulary (spec §4.7). `RetryReason` is produced by session,
//! bucket and cluster code whenever an attempt fails in a way that might be
//! worth retrying; `cb-retry` is the only crate that interprets it to decide
//! whether, where and after how long to retry. Keeping the enum here (rather
//! than in `cb-retry`) lets every producer depend on `cb-core` alone.

/// Why a single attempt failed, in the fixed classification the retry
/// orchestrator dispatches on. This is deliberately not the same type as
/// [`crate::ErrorKind`]: a `RetryReason` is an internal signal from the
/// component that observed the failure, while `ErrorKind` is what a caller
/// ultimately sees if no more retries are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryReason {
    /// The session/bucket for the target node exists but is not yet ready
    /// to accept commands (still negotiating, or reconnecting).
    NotReady,
    /// Server replied NOT_MY_VBUCKET; a newer config may already have been
    /// installed by the time this is inspected.
    NotMyVbucket,
    /// Document is locked by another actor's pending CAS operation.
    Locked,
    /// Server-side transient failure (overload, OOM, compaction, ...).
    TemporaryFailure,
    /// The socket closed while this command was already written and
    /// in-flight; outcome is unknown to the client.
    SocketClosedInFlight,
    /// No node in the current config snapshot advertises the required
    /// service (query/search/analytics/view/management).
    ServiceNotAvailable,
    /// SASL negotiation for the owning session has not completed yet.
    AuthPending,
    /// Server replied NOT_MY_COLLECTION or UNKNOWN_COLLECTION; the
    /// collection id cache must be invalidated before resubmission.
    CollectionUnknown,
    /// A newer config was requested but has not arrived yet.
    ConfigNotUpdated,
}

impl RetryReason {
    /// Whether this reason is ever retryable, independent of the
    /// operation's idempotence. `cb-retry`'s policy additionally requires
    /// idempotence (or explicit caller opt-in) before it will schedule
    /// another attempt.
    pub fn is_retryable(self) -> bool {
        // Every member of this enum, by construction, is a "maybe retry
        // this" signal; a component that observed a terminal failure
        // reports an ErrorKind directly rather than constructing one of
        // these. The method still exists so call sites read as a policy
        // check rather than "this enum is trivially always true".
        true
    }
}

/// Whether replaying an operation is safe without the caller's involvement.
/// Reads are always idempotent; mutations are idempotent only if the caller
/// attached a CAS precondition, or the operation is inherently so (spec
/// §4.7 — insert with a server-generated id is explicitly *not*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotence {
    Idempotent,
    NotIdempotent,
    /// The caller has explicitly opted into retrying a non-idempotent
    /// mutation, accepting the risk of a duplicate side effect.
    CallerAllowedRetry,
}

impl Idempotence {
    pub fn permits_retry(self) -> bool {
        !matches!(self, Idempotence::NotIdempotent)
    }
}
