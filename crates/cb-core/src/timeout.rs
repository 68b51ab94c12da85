//! `Timeout` is a configured duration (e.g. `key_value_timeout_ms` from the
//! connection string, spec §6); `Deadline` is the absolute instant derived
//! from it at the moment an operation starts, which is what every
//! [`crate::RetryReason`] decision and every [`crate::CouchbaseError`]
//! timeout variant is measured against. Keeping the two separate means a
//! retried operation computes one `Deadline` up front and every attempt
//! checks against the same absolute point, rather than each attempt getting
//! a fresh relative timeout and the overall call running unbounded.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timeout(Duration);

impl Timeout {
    pub const fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }

    pub fn deadline_from_now(self) -> Deadline {
        Deadline(Instant::now() + self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn is_expired(self) -> bool {
        Instant::now() >= self.0
    }

    pub fn remaining(self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn as_instant(self) -> Instant {
        self.0
    }
}
