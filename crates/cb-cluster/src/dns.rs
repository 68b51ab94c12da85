//! DNS-SRV expansion (spec §4.5). Resolution is behind a trait so
//! bootstrap logic can be exercised with a fixed record set in tests
//! without a real resolver.

use async_trait::async_trait;
use cb_core::{CouchbaseError, ErrorKind};
use std::net::SocketAddr;
use trust_dns_resolver::TokioAsyncResolver;

#[derive(Debug, Clone)]
pub struct SrvTarget {
    pub hostname: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

#[async_trait]
pub trait SrvResolver: Send + Sync {
    async fn resolve_srv(&self, record_name: &str) -> Result<Vec<SrvTarget>, CouchbaseError>;
    async fn resolve_host(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, CouchbaseError>;
}

pub struct TrustDnsResolver {
    inner: TokioAsyncResolver,
}

impl TrustDnsResolver {
    pub fn from_system_config() -> Result<Self, CouchbaseError> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| CouchbaseError::new(ErrorKind::ServiceNotAvailable, e.to_string()))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl SrvResolver for TrustDnsResolver {
    async fn resolve_srv(&self, record_name: &str) -> Result<Vec<SrvTarget>, CouchbaseError> {
        let lookup = self
            .inner
            .srv_lookup(record_name)
            .await
            .map_err(|e| CouchbaseError::new(ErrorKind::ServiceNotAvailable, e.to_string()))?;
        let targets = lookup
            .iter()
            .map(|record| SrvTarget {
                hostname: record.target().to_utf8().trim_end_matches('.').to_string(),
                port: record.port(),
                priority: record.priority(),
                weight: record.weight(),
            })
            .collect();
        Ok(targets)
    }

    async fn resolve_host(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, CouchbaseError> {
        let lookup = self
            .inner
            .lookup_ip(hostname)
            .await
            .map_err(|e| CouchbaseError::new(ErrorKind::ServiceNotAvailable, e.to_string()))?;
        Ok(lookup.iter().map(|ip| SocketAddr::new(ip, port)).collect())
    }
}

/// Orders SRV targets by priority ascending, then by weight descending
/// within a priority tier — the simplified, deterministic subset of RFC
/// 2782's weighted selection that is sufficient for a client trying seeds
/// in order until one answers.
pub fn order_srv_targets(mut targets: Vec<SrvTarget>) -> Vec<SrvTarget> {
    targets.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.weight.cmp(&a.weight)));
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(hostname: &str, priority: u16, weight: u16) -> SrvTarget {
        SrvTarget { hostname: hostname.to_string(), port: 11210, priority, weight }
    }

    #[test]
    fn orders_by_priority_then_weight_descending() {
        let targets = vec![target("c", 10, 5), target("a", 0, 1), target("b", 0, 9)];
        let ordered = order_srv_targets(targets);
        let hosts: Vec<&str> = ordered.iter().map(|t| t.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["b", "a", "c"]);
    }
}
