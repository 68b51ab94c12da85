//! Correlators. `Opaque` is the 32-bit per-session wire correlator (spec
//! §3 PendingCommand, §4.3 opcode demux); `CorrelationId` and
//! `ClientContextId` are higher-level, human-meaningful identifiers used by
//! tracing and by the HTTP services' sticky-routing preference (§4.5).

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// A 32-bit correlator stamped on every request frame and echoed on its
/// response. Unique within a session for the lifetime of the command (spec
/// §3 invariant); session-local, so no cross-strand synchronization is
/// needed to generate one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opaque(u32);

impl Opaque {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Opaque {
    fn from(value: u32) -> Self {
        Opaque(value)
    }
}

impl fmt::Display for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Monotonic per-session opaque counter. Wraps on overflow rather than
/// panicking: a session that has issued 2^32 commands without tearing down
/// would already have cycled through opaques long before the pending-command
/// table allowed that, since every slot is freed on completion.
#[derive(Debug, Default)]
pub struct OpaqueGenerator {
    next: AtomicU32,
}

impl OpaqueGenerator {
    pub fn new() -> Self {
        Self { next: AtomicU32::new(1) }
    }

    pub fn next(&self) -> Opaque {
        Opaque(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Free-form correlation id propagated through tracing spans across a single
/// logical call (connect → negotiate → dispatch → decode).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query-service `client_context_id`, used both for server-side request
/// tracing and by the cluster's service router to prefer the last
/// successful node for the same logical client session (spec §4.5).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientContextId(String);

impl ClientContextId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_generator_is_monotonic_and_unique_within_a_session() {
        let gen = OpaqueGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        assert!(b.as_u32() > a.as_u32());
    }
}
