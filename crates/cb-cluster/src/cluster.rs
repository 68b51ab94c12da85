//! Top-level coordinator (spec §4.5): bootstraps via seed addresses,
//! maintains bucket handles, and dispatches HTTP service requests.

use crate::connection_string::{self, ConnectionOptions, ConnectionString};
use crate::dns::SrvResolver;
use crate::service_router::{Service, ServiceRouter};
use base64::Engine;
use cb_bucket::Bucket;
use cb_codec::http::{HttpRequest, HttpResponse};
use cb_core::{CouchbaseError, ErrorKind};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct ClusterCredentials {
    pub username: String,
    pub password: String,
}

pub struct ClusterOptions {
    pub credentials: ClusterCredentials,
    pub connect_timeout: Duration,
}

impl ClusterOptions {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: ClusterCredentials { username: username.into(), password: password.into() },
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Owns every open [`Bucket`] and dispatches HTTP service requests to
/// whichever node the [`ServiceRouter`] picks. Key/value traffic never
/// passes through here — it goes straight from a caller to the owning
/// `Bucket`, which owns the sessions.
pub struct Cluster {
    connection_string: ConnectionString,
    options: ClusterOptions,
    http: reqwest::Client,
    router: ServiceRouter,
    buckets: DashMap<String, Arc<Bucket>>,
}

impl Cluster {
    /// Parses the connection string and builds the HTTP client; does not
    /// itself perform any I/O (spec's `open` constructs the Cluster, actual
    /// bootstrap happens in [`Cluster::bootstrap`]).
    pub fn connect(connection_string: &str, options: ClusterOptions) -> Result<Self, CouchbaseError> {
        let parsed = connection_string::parse(connection_string)?;
        let http = reqwest::Client::builder()
            .timeout(parsed.options.management_timeout)
            .build()
            .map_err(|e| CouchbaseError::new(ErrorKind::InternalServerFailure, e.to_string()))?;
        let router = ServiceRouter::new(parsed.options.enable_tls);
        Ok(Self { connection_string: parsed, options, http, router, buckets: DashMap::new() })
    }

    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.connection_string.options
    }

    /// Expand seed hosts (via DNS-SRV if the connection string calls for
    /// it) and try each in order until one answers (spec §4.5: "seed nodes
    /// are tried in order until one produces a cluster config"). Returns
    /// the ordered list of `host:port` strings a caller should attempt a
    /// KV session against.
    #[instrument(skip(self, resolver))]
    pub async fn bootstrap_seed_list(&self, resolver: &dyn SrvResolver) -> Result<Vec<(String, u16)>, CouchbaseError> {
        if self.connection_string.needs_srv_expansion() {
            let record = self.connection_string.srv_record_name();
            let targets = resolver.resolve_srv(&record).await?;
            if targets.is_empty() {
                return Err(CouchbaseError::new(ErrorKind::ServiceNotAvailable, format!("no SRV records for {record}")));
            }
            let ordered = crate::dns::order_srv_targets(targets);
            info!(count = ordered.len(), "expanded seed list via DNS-SRV");
            Ok(ordered.into_iter().map(|t| (t.hostname, t.port)).collect())
        } else {
            let default_port = if self.connection_string.options.enable_tls { 11207 } else { 11210 };
            Ok(self
                .connection_string
                .hosts
                .iter()
                .map(|h| (h.hostname.clone(), h.port.unwrap_or(default_port)))
                .collect())
        }
    }

    pub fn bucket(&self, name: &str) -> Arc<Bucket> {
        Arc::clone(&self.buckets.entry(name.to_string()).or_insert_with(|| Arc::new(Bucket::new(name))))
    }

    fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.options.credentials.username, self.options.credentials.password);
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
    }

    /// Dispatch an HTTP service request to a node the [`ServiceRouter`]
    /// selects, carrying basic auth derived from the cluster credentials
    /// (spec §4.5).
    #[instrument(skip(self, request), fields(service = ?service))]
    pub async fn dispatch_http(
        &self,
        bucket_name: &str,
        service: Service,
        request: HttpRequest,
        client_context_id: Option<&str>,
    ) -> Result<HttpResponse, CouchbaseError> {
        let bucket = self.bucket(bucket_name);
        let config = bucket
            .config()
            .ok_or_else(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, "no cluster config available yet"))?;
        let (host, port) = self
            .router
            .select(&config, service, client_context_id)
            .ok_or_else(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, "no node advertises the requested service"))?;

        let scheme = if self.connection_string.options.enable_tls { "https" } else { "http" };
        let url = format!("{scheme}://{host}:{port}{}", request.path);

        let mut builder = match request.method {
            cb_codec::http::Method::Get => self.http.get(&url),
            cb_codec::http::Method::Post => self.http.post(&url),
            cb_codec::http::Method::Put => self.http.put(&url),
            cb_codec::http::Method::Delete => self.http.delete(&url),
        };
        builder = builder.header("Authorization", self.basic_auth_header());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CouchbaseError::new(ErrorKind::ServiceNotAvailable, e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| CouchbaseError::new(ErrorKind::ServiceNotAvailable, e.to_string()))?
            .to_vec();

        Ok(HttpResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::SocketAddr;

    #[test]
    fn connect_parses_the_connection_string_without_doing_io() {
        let cluster = Cluster::connect("couchbase://localhost/travel-sample", ClusterOptions::new("a", "b")).unwrap();
        assert_eq!(cluster.connection_string.bucket.as_deref(), Some("travel-sample"));
    }

    struct FixedResolver {
        hosts: Vec<(String, u16)>,
    }

    #[async_trait]
    impl SrvResolver for FixedResolver {
        async fn resolve_srv(&self, _record_name: &str) -> Result<Vec<crate::dns::SrvTarget>, CouchbaseError> {
            Ok(self
                .hosts
                .iter()
                .map(|(h, p)| crate::dns::SrvTarget { hostname: h.clone(), port: *p, priority: 0, weight: 0 })
                .collect())
        }

        async fn resolve_host(&self, _hostname: &str, _port: u16) -> Result<Vec<SocketAddr>, CouchbaseError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn bootstrap_seed_list_expands_via_srv_for_a_bare_host() {
        let cluster = Cluster::connect("couchbase://cb.example.com", ClusterOptions::new("a", "b")).unwrap();
        let resolver = FixedResolver { hosts: vec![("node1.example.com".to_string(), 11210)] };
        let seeds = cluster.bootstrap_seed_list(&resolver).await.unwrap();
        assert_eq!(seeds, vec![("node1.example.com".to_string(), 11210)]);
    }

    #[tokio::test]
    async fn bootstrap_seed_list_uses_explicit_hosts_without_dns() {
        let cluster = Cluster::connect("couchbase://node1:11210,node2:11210", ClusterOptions::new("a", "b")).unwrap();
        let resolver = FixedResolver { hosts: vec![] };
        let seeds = cluster.bootstrap_seed_list(&resolver).await.unwrap();
        assert_eq!(seeds, vec![("node1".to_string(), 11210), ("node2".to_string(), 11210)]);
    }
}
