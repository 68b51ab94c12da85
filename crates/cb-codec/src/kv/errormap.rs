//! The server-published error map (spec §3 `ErrorMap`, §4.3): a per-session
//! table mapping a 16-bit status to a set of attributes plus a retry
//! strategy. Fetched once via `GET_ERROR_MAP` during negotiation; `cb-retry`
//! consults it as the authoritative source of key/value retry
//! classification, supplementing the fixed `RetryReason` enum.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorAttribute {
    Retry,
    Auth,
    Temp,
    ItemOnly,
    ConnStateInvalidated,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrySpecStrategy {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetrySpec {
    pub strategy: RetrySpecStrategy,
    #[serde(rename = "interval")]
    pub interval_ms: u64,
    #[serde(rename = "after")]
    pub max_ms: u64,
}

impl RetrySpec {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match self.strategy {
            RetrySpecStrategy::Constant => self.interval_ms,
            RetrySpecStrategy::Linear => self.interval_ms.saturating_mul(attempt as u64 + 1),
            RetrySpecStrategy::Exponential => {
                self.interval_ms.saturating_mul(1u64 << attempt.min(16))
            }
        };
        Duration::from_millis(ms.min(self.max_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMapEntry {
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub attrs: Vec<ErrorAttribute>,
    pub retry: Option<RetrySpec>,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorMap {
    entries: HashMap<u16, ErrorMapEntry>,
}

#[derive(Debug, Deserialize)]
struct WireErrorMap {
    version: u32,
    revision: u32,
    errors: HashMap<String, ErrorMapEntry>,
}

impl ErrorMap {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let wire: WireErrorMap = serde_json::from_slice(body)?;
        tracing::debug!(version = wire.version, revision = wire.revision, "parsed error map");
        let mut entries = HashMap::with_capacity(wire.errors.len());
        for (code, entry) in wire.errors {
            if let Ok(code) = u16::from_str_radix(code.trim_start_matches("0x"), 16) {
                entries.insert(code, entry);
            }
        }
        Ok(ErrorMap { entries })
    }

    pub fn lookup(&self, status: u16) -> Option<&ErrorMapEntry> {
        self.entries.get(&status)
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.lookup(status).map(|e| e.attrs.contains(&ErrorAttribute::Retry)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 2,
        "revision": 1,
        "errors": {
            "0x23": {
                "name": "LOCKED",
                "desc": "document locked",
                "attrs": ["item-only", "retry"],
                "retry": {"strategy": "exponential", "interval": 10, "after": 500}
            }
        }
    }"#;

    #[test]
    fn parses_and_classifies_retryable_status() {
        let map = ErrorMap::parse(SAMPLE.as_bytes()).unwrap();
        assert!(map.is_retryable(0x23));
        assert!(!map.is_retryable(0x01));
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        let spec = RetrySpec { strategy: RetrySpecStrategy::Exponential, interval_ms: 10, max_ms: 50 };
        assert_eq!(spec.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(spec.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(spec.delay_for_attempt(10), Duration::from_millis(50));
    }
}
