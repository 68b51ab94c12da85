//! Maps a key/value response [`Status`] onto the uniform error taxonomy
//! (spec §7). Error-map-driven retry classification lives in `cb-session`,
//! which sees the whole session's error map; this mapping only needs to
//! know enough to hand a caller a typed terminal error when no retry
//! applies.

use cb_codec::kv::Status;
use cb_core::{CouchbaseError, ErrorKind};

/// `cas_precondition` is whether the request that produced `status` carried
/// a CAS value the server checks before applying the mutation — only then
/// does a `KEY_EXISTS` response mean the CAS check failed rather than a
/// plain key collision (spec §8 scenario 3).
pub fn status_to_result(status: Status, context: &str, cas_precondition: bool) -> Result<(), CouchbaseError> {
    if status.is_success() {
        return Ok(());
    }
    Err(CouchbaseError::new(status_to_kind(status, cas_precondition), format!("{context}: server status {:#06x}", status.0)))
}

fn status_to_kind(status: Status, cas_precondition: bool) -> ErrorKind {
    match status {
        Status::KEY_NOT_FOUND => ErrorKind::DocumentNotFound,
        Status::KEY_EXISTS if cas_precondition => ErrorKind::CasMismatch,
        Status::KEY_EXISTS => ErrorKind::DocumentExists,
        Status::VALUE_TOO_LARGE => ErrorKind::ValueTooLarge,
        Status::INVALID_ARGUMENTS => ErrorKind::InvalidArgument,
        Status::LOCKED => ErrorKind::DocumentLocked,
        Status::NOT_SUPPORTED => ErrorKind::FeatureNotAvailable,
        Status::TEMPORARY_FAILURE => ErrorKind::TemporaryFailure,
        Status::UNKNOWN_COLLECTION | Status::NOT_MY_COLLECTION => ErrorKind::CollectionNotFound,
        Status::SUBDOC_PATH_NOT_FOUND => ErrorKind::PathNotFound,
        Status::SUBDOC_PATH_MISMATCH => ErrorKind::PathMismatch,
        Status::SUBDOC_PATH_INVALID => ErrorKind::PathInvalid,
        Status::SUBDOC_PATH_TOO_BIG => ErrorKind::PathTooBig,
        Status::AUTH_ERROR | Status::AUTH_CONTINUE => ErrorKind::AuthenticationFailure,
        _ => ErrorKind::InternalServerFailure,
    }
}
