//! The uniform error taxonomy (spec §7). Every operation response carries a
//! single [`ErrorKind`] drawn from this namespace; [`CouchbaseError`] adds the
//! human-readable message and an optional underlying cause so the taxonomy
//! stays flat while still supporting `?`-based propagation and `source()`
//! chains.

use std::fmt;

pub type Result<T> = std::result::Result<T, CouchbaseError>;

/// The stable, flat error namespace described in spec §7. Grouped here by
/// the section that introduces them; the grouping is purely documentation,
/// the enum itself has no sub-namespacing so a caller can match on it with a
/// single `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // -- Common --
    RequestCanceled,
    InvalidArgument,
    ServiceNotAvailable,
    InternalServerFailure,
    AuthenticationFailure,
    TemporaryFailure,
    ParsingFailure,
    CasMismatch,
    BucketNotFound,
    CollectionNotFound,
    UnsupportedOperation,
    AmbiguousTimeout,
    UnambiguousTimeout,
    FeatureNotAvailable,
    ScopeNotFound,
    IndexNotFound,
    IndexExists,
    EncodingFailure,
    DecodingFailure,
    RateLimited,
    QuotaLimited,

    // -- Key/Value --
    DocumentNotFound,
    DocumentExists,
    DocumentLocked,
    ValueTooLarge,
    ValueInvalid,
    DurabilityLevelInvalid,
    DurabilityImpossible,
    DurabilityAmbiguous,
    DurabilitySyncWriteInProgress,
    DurabilitySyncWriteReCommitInProgress,
    PathNotFound,
    PathMismatch,
    PathInvalid,
    PathTooBig,
    XattrInvalidFlagCombo,
    XattrInvalidKeyCombo,
    XattrUnknownMacro,

    // -- Query / Analytics / Search / View --
    PlanningFailure,
    IndexFailure,
    PreparedStatementFailure,
    DmlFailure,
    CompilationFailure,
    JobQueueFull,
    DatasetNotFound,
    LinkNotFound,

    // -- Management --
    UserNotFound,
    GroupNotFound,
    BucketExists,
    UserExists,
    CollectionExists,
}

impl ErrorKind {
    /// Whether the retry orchestrator is ever allowed to retry an operation
    /// that failed with this kind, independent of the per-command
    /// [`crate::RetryReason`] classification that drives *when*. Most
    /// taxonomy members are terminal; only the handful the orchestrator
    /// actually loops on are not.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            ErrorKind::TemporaryFailure
                | ErrorKind::ServiceNotAvailable
                | ErrorKind::DocumentLocked
                | ErrorKind::RateLimited
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The error type surfaced to callers from every public entry point.
///
/// Carries a stable [`ErrorKind`], a message meant for a human, and an
/// optional source error for `std::error::Error::source` chains. Construct
/// with [`CouchbaseError::new`] and attach a cause with
/// [`CouchbaseError::with_cause`]; both are cheap, neither panics.
#[derive(Debug)]
pub struct CouchbaseError {
    kind: ErrorKind,
    message: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CouchbaseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), cause: None }
    }

    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CouchbaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CouchbaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification_matches_retry_orchestrator_expectations() {
        assert!(!ErrorKind::TemporaryFailure.is_terminal());
        assert!(!ErrorKind::DocumentLocked.is_terminal());
        assert!(ErrorKind::DocumentNotFound.is_terminal());
        assert!(ErrorKind::CasMismatch.is_terminal());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = CouchbaseError::new(ErrorKind::DocumentNotFound, "key `foo` missing");
        let rendered = err.to_string();
        assert!(rendered.contains("DocumentNotFound"));
        assert!(rendered.contains("foo"));
    }

    #[test]
    fn source_chain_is_preserved() {
        #[derive(Debug, thiserror::Error)]
        #[error("underlying io failure")]
        struct Inner;

        let err = CouchbaseError::new(ErrorKind::ServiceNotAvailable, "connect failed")
            .with_cause(Inner);
        assert!(std::error::Error::source(&err).is_some());
    }
}
