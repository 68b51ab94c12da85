//! Top-level facade entry point (spec §4.5): parses a connection string,
//! then bootstraps one bucket at a time on first access — opening a
//! session to each seed in order until one completes negotiation and hands
//! back a cluster config, then opening sessions to every other node that
//! config lists.

use crate::collection::Bucket;
use crate::kv;
use bytes::Bytes;
use cb_bucket::{Bucket as RoutingBucket, ClusterConfig};
use cb_cluster::dns::{SrvResolver, TrustDnsResolver};
use cb_codec::http::{HttpRequest, HttpResponse};
use cb_codec::kv::hello::Feature;
use cb_core::{CouchbaseError, ErrorKind, Idempotence, Timeout};
use cb_ops::query::{QueryRequest, QueryResponse};
use cb_ops::MutationState;
use cb_retry::{BackoffPolicy, RetryOrchestrator};
use cb_session::{Credentials, Session, SessionOptions};
use cb_transport::{tcp::TcpStream, tls::TlsStream, Stream};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, instrument, warn};

pub use cb_cluster::service_router::Service;
pub use cb_codec::http::QueryOptions;

/// Credentials and timeouts for a new [`Cluster`] handle (spec §6).
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    /// Allows PLAIN SASL on a non-TLS connection; left `false` unless the
    /// deployment's threat model accepts it (spec §4.3).
    pub allow_plain_on_plaintext: bool,
}

impl ClusterOptions {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(10),
            allow_plain_on_plaintext: false,
        }
    }
}

pub(crate) struct ClusterContext {
    core: cb_cluster::Cluster,
    resolver: Box<dyn SrvResolver>,
    orchestrator: RetryOrchestrator,
    credentials: Credentials,
    features: Vec<Feature>,
    connect_timeout: Duration,
    key_value_timeout: Timeout,
    query_timeout: Timeout,
    tls_config: Option<Arc<tokio_rustls::rustls::ClientConfig>>,
    mutation_state: Mutex<MutationState>,
}

impl ClusterContext {
    pub(crate) fn orchestrator(&self) -> &RetryOrchestrator {
        &self.orchestrator
    }

    pub(crate) fn key_value_timeout(&self) -> Timeout {
        self.key_value_timeout
    }

    pub(crate) fn record_mutation(&self, bucket: &str, token: Option<cb_ops::MutationToken>) {
        if let Some(token) = token {
            self.mutation_state.lock().expect("mutation state lock is never poisoned").add(bucket, token);
        }
    }

    async fn resolve_addr(&self, host: &str, port: u16) -> Result<SocketAddr, CouchbaseError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        let addrs = self.resolver.resolve_host(host, port).await?;
        addrs
            .into_iter()
            .next()
            .ok_or_else(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, format!("no address found for host `{host}`")))
    }

    async fn open_and_negotiate(&self, host: &str, port: u16, bucket: &str) -> Result<(Arc<Session>, Bytes), CouchbaseError> {
        let addr = self.resolve_addr(host, port).await?;
        let deadline = Timeout::from_millis(self.connect_timeout.as_millis() as u64).deadline_from_now();
        let stream: Arc<dyn Stream> = match &self.tls_config {
            Some(config) => Arc::new(TlsStream::connect(addr, host, Arc::clone(config), deadline).await.map_err(transport_err)?),
            None => Arc::new(TcpStream::connect(addr, deadline).await.map_err(transport_err)?),
        };
        let options = SessionOptions {
            credentials: self.credentials.clone(),
            bucket: Some(bucket.to_string()),
            features: self.features.clone(),
            key_value_timeout: self.key_value_timeout,
        };
        let session = Session::new(stream, options);
        let config_bytes = session.negotiate().await?;
        Ok((session, config_bytes))
    }

    /// Opens sessions to every node in `config` the given seed session did
    /// not already cover, best-effort: a node this client cannot reach yet
    /// is logged and left unbound, to be retried lazily the next time an
    /// operation's NOT_MY_VBUCKET handling refreshes the config.
    async fn bind_remaining_nodes(&self, routing: &Arc<RoutingBucket>, config: &ClusterConfig, skip_index: usize, bucket: &str) {
        for (index, node) in config.nodes.iter().enumerate() {
            if index == skip_index || routing.session_for_node(index).is_some() {
                continue;
            }
            let port = if self.tls_config.is_some() { node.services.kv_tls } else { node.services.kv_plain };
            let Some(port) = port else { continue };
            match self.open_and_negotiate(&node.hostname, port, bucket).await {
                Ok((session, _)) => routing.bind_session(index, session),
                Err(e) => warn!(host = %node.hostname, error = %e, "failed to open a session to a node listed in the cluster config"),
            }
        }
    }

    #[instrument(skip(self, routing), fields(bucket = %bucket))]
    async fn bootstrap_bucket(&self, routing: &Arc<RoutingBucket>, bucket: &str) -> Result<(), CouchbaseError> {
        let seeds = self.core.bootstrap_seed_list(self.resolver.as_ref()).await?;
        let mut last_err = None;
        for (host, port) in &seeds {
            match self.open_and_negotiate(host, *port, bucket).await {
                Ok((session, config_bytes)) => {
                    let config = ClusterConfig::parse(&config_bytes).map_err(|e| CouchbaseError::new(ErrorKind::ParsingFailure, e.to_string()))?;
                    let node_index = config.nodes.iter().position(|n| &n.hostname == host).unwrap_or(0);
                    routing.apply_config(config.clone());
                    routing.bind_session(node_index, session);
                    self.bind_remaining_nodes(routing, &config, node_index, bucket).await;
                    if config.capabilities.collections {
                        if let Err(e) = kv::refresh_manifest(routing).await {
                            warn!(error = %e, "initial collections manifest fetch failed, will retry lazily on first named-collection use");
                        }
                    }
                    info!(nodes = config.nodes.len(), "bucket bootstrap complete");
                    return Ok(());
                }
                Err(e) => {
                    warn!(host, port, error = %e, "seed node bootstrap failed, trying next seed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, "no seed node could be reached")))
    }
}

/// Owns every bucket handle and dispatches query-service requests;
/// key/value traffic never passes through here, it goes straight from a
/// [`crate::collection::Collection`] to the bucket's sessions.
pub struct Cluster {
    ctx: Arc<ClusterContext>,
}

impl Cluster {
    /// Parses the connection string and prepares a resolver, TLS config and
    /// credentials; performs no I/O (the first real connection happens on
    /// the first [`Cluster::bucket`] call, spec §4.5).
    pub fn connect(connection_string: &str, options: ClusterOptions) -> Result<Self, CouchbaseError> {
        let core = cb_cluster::Cluster::connect(
            connection_string,
            cb_cluster::ClusterOptions {
                credentials: cb_cluster::ClusterCredentials { username: options.username.clone(), password: options.password.clone() },
                connect_timeout: options.connect_timeout,
            },
        )?;
        let conn_opts = core.connection_options().clone();

        let resolver: Box<dyn SrvResolver> = Box::new(TrustDnsResolver::from_system_config()?);
        let tls_config = if conn_opts.enable_tls { Some(cb_transport::tls::default_client_config()) } else { None };
        let credentials = Credentials {
            username: options.username,
            password: options.password,
            allow_plain_on_plaintext: options.allow_plain_on_plaintext,
        };

        let ctx = Arc::new(ClusterContext {
            core,
            resolver,
            orchestrator: RetryOrchestrator::new(BackoffPolicy::default()),
            credentials,
            features: cb_session::default_features(),
            connect_timeout: options.connect_timeout,
            key_value_timeout: Timeout::from_millis(conn_opts.key_value_timeout.as_millis() as u64),
            query_timeout: Timeout::from_millis(conn_opts.query_timeout.as_millis() as u64),
            tls_config,
            mutation_state: Mutex::new(MutationState::new()),
        });
        Ok(Self { ctx })
    }

    /// Returns a handle to `name`, bootstrapping it (opening sessions,
    /// fetching the cluster config and collections manifest) on first
    /// access. Subsequent calls reuse the already-open sessions.
    pub async fn bucket(&self, name: &str) -> Result<Bucket, CouchbaseError> {
        let routing = self.ctx.core.bucket(name);
        if routing.any_session().is_none() {
            self.ctx.bootstrap_bucket(&routing, name).await?;
        }
        Ok(Bucket::new(Arc::clone(&self.ctx), routing, name.to_string()))
    }

    /// Runs a N1QL query against `bucket`'s query service, consulting the
    /// cluster-wide accumulated [`MutationState`] when the caller asked for
    /// `at_plus` consistency without supplying an explicit scan vector
    /// (spec §8 scenario 2: read-your-writes).
    pub async fn query(&self, bucket: &str, statement: impl Into<String>, options: QueryOptions) -> Result<QueryResponse, CouchbaseError> {
        let request = QueryRequest { statement: statement.into(), bucket: bucket.to_string(), options };
        let state = self.ctx.mutation_state.lock().expect("mutation state lock is never poisoned").clone();
        let http_request: HttpRequest = cb_ops::query::encode(&request, Some(&state));
        let deadline = self.ctx.query_timeout.deadline_from_now();
        let client_context_id = request.options.client_context_id.clone();

        let response = kv::run_with_retry(&self.ctx.orchestrator, Idempotence::Idempotent, deadline, |_attempt| {
            let http_request = http_request.clone();
            let client_context_id = client_context_id.clone();
            async move {
                let response: HttpResponse = self
                    .ctx
                    .core
                    .dispatch_http(bucket, Service::Query, http_request, client_context_id.as_deref())
                    .await
                    .map_err(kv::classify_retryable)?;
                cb_ops::query::decode(&response).map_err(kv::classify_retryable)
            }
        })
        .await?;
        Ok(response)
    }
}

fn transport_err(e: cb_transport::TransportError) -> CouchbaseError {
    let kind = match e {
        cb_transport::TransportError::TimedOut => ErrorKind::UnambiguousTimeout,
        cb_transport::TransportError::Cancelled => ErrorKind::RequestCanceled,
        _ => ErrorKind::ServiceNotAvailable,
    };
    CouchbaseError::new(kind, e.to_string())
}
