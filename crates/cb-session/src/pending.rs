//! The opaque-keyed pending-command table (spec §3 `PendingCommand`).
//!
//! A command lives here from write submission until its response arrives,
//! its deadline elapses, or the owning session tears down — at which point
//! every entry still in the table is drained with a terminal error.

use bytes::Bytes;
use cb_codec::kv::Frame;
use cb_core::{CouchbaseError, Deadline, Idempotence, Opaque};
use dashmap::DashMap;
use tokio::sync::oneshot;

/// What a completed (or abandoned) command resolves to: the raw response
/// frame, status and all, or the terminal transport/session-level error that
/// ended it before any response arrived. A non-success status is still
/// `Ok` — interpreting it is the operation layer's job (spec §4.6), since
/// only it knows which statuses are benign for a given opcode (e.g.
/// `NOT_MY_VBUCKET` carries a config body the caller must consume).
pub type CommandOutcome = Result<Frame, CouchbaseError>;

pub struct RetryContext {
    pub idempotence: Idempotence,
    pub attempt: u32,
}

pub struct PendingCommand {
    pub deadline: Deadline,
    pub encoded_frame: Bytes,
    pub completion: oneshot::Sender<CommandOutcome>,
    pub retry: RetryContext,
}

/// Invariant (spec §3): a `PendingCommand` is in exactly one session's
/// table; opaques are unique within a session for the command's lifetime.
#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<Opaque, PendingCommand>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn insert(&self, opaque: Opaque, command: PendingCommand) {
        self.entries.insert(opaque, command);
    }

    /// Remove and complete the command matching `opaque`, if any is still
    /// pending (it may have already timed out and been drained).
    pub fn complete(&self, opaque: Opaque, outcome: CommandOutcome) -> bool {
        if let Some((_, command)) = self.entries.remove(&opaque) {
            let _ = command.completion.send(outcome);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every command whose deadline has already passed, completing
    /// each with a timeout error.
    pub fn drain_expired(&self) -> usize {
        let expired: Vec<Opaque> =
            self.entries.iter().filter(|e| e.deadline.is_expired()).map(|e| *e.key()).collect();
        let count = expired.len();
        for opaque in expired {
            if let Some((_, command)) = self.entries.remove(&opaque) {
                let _ = command.completion.send(Err(CouchbaseError::new(
                    cb_core::ErrorKind::UnambiguousTimeout,
                    "command exceeded its deadline while pending",
                )));
            }
        }
        count
    }

    /// Drain every entry with the given terminal error — used on session
    /// teardown (spec §3 invariant: "on session teardown every entry is
    /// drained with a not-connected error or re-enqueued for retry").
    pub fn drain_all(&self, make_error: impl Fn() -> CouchbaseError) -> Vec<(Opaque, PendingCommand)> {
        let opaques: Vec<Opaque> = self.entries.iter().map(|e| *e.key()).collect();
        let mut drained = Vec::with_capacity(opaques.len());
        for opaque in opaques {
            if let Some((_, command)) = self.entries.remove(&opaque) {
                drained.push((opaque, command));
            }
        }
        // Caller decides retry vs. terminal failure per command; if it
        // chooses terminal failure it should still invoke `make_error` per
        // entry to keep distinct messages, so we hand entries back rather
        // than completing them here.
        let _ = make_error;
        drained
    }
}
