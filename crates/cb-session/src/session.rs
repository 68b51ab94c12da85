//! The per-node [`Session`]: drives the connection lifecycle through HELLO,
//! error-map fetch, SASL, bucket selection and config fetch (spec §4.3),
//! then demultiplexes in-flight commands by opaque until torn down.

use crate::credentials::Credentials;
use crate::pending::{PendingCommand, PendingTable, RetryContext};
use crate::state::{NegotiationStage, SessionState};
use bytes::{Bytes, BytesMut};
use cb_codec::kv::errormap::ErrorMap;
use cb_codec::kv::{hello, hello::Feature, Frame, Opcode, Status};
use cb_codec::sasl::{self, Mechanism, ScramClient};
use cb_core::{CouchbaseError, Deadline, ErrorKind, Idempotence, OpaqueGenerator, Timeout};
use cb_transport::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// The features every session offers; `REQUIRED` ones (see
/// [`cb_codec::kv::hello::REQUIRED`]) must come back accepted or
/// negotiation fails.
pub fn default_features() -> Vec<Feature> {
    vec![
        Feature::XATTR,
        Feature::XERROR,
        Feature::SELECT_BUCKET,
        Feature::SNAPPY,
        Feature::JSON,
        Feature::DUPLEX,
        Feature::CLUSTERMAP_CHANGE_NOTIFICATION,
        Feature::UNORDERED_EXECUTION,
        Feature::COLLECTIONS,
        Feature::ALT_REQUEST_SUPPORT,
        Feature::SYNC_REPLICATION,
        Feature::MUTATION_SEQNO,
    ]
}

pub struct SessionOptions {
    pub credentials: Credentials,
    pub bucket: Option<String>,
    pub features: Vec<Feature>,
    pub key_value_timeout: Timeout,
}

impl SessionOptions {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials, bucket: None, features: default_features(), key_value_timeout: Timeout::from_millis(2500) }
    }
}

/// One node connection. Holds no knowledge of partitions or other nodes —
/// that belongs to `cb-bucket`, which is handed the raw cluster config
/// bytes this session fetches during negotiation.
pub struct Session {
    stream: Arc<dyn Stream>,
    state: Mutex<SessionState>,
    options: SessionOptions,
    opaques: OpaqueGenerator,
    pending: PendingTable,
    error_map: RwLock<Option<ErrorMap>>,
    read_loop_started: AtomicBool,
}

impl Session {
    pub fn new(stream: Arc<dyn Stream>, options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            stream,
            state: Mutex::new(SessionState::Disconnected),
            options,
            opaques: OpaqueGenerator::new(),
            pending: PendingTable::new(),
            error_map: RwLock::new(None),
            read_loop_started: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state mutex is never held across a panic")
    }

    fn transition(&self, target: SessionState) -> Result<(), CouchbaseError> {
        let mut guard = self.state.lock().expect("state mutex is never held across a panic");
        if !guard.can_transition_to(target) {
            return Err(CouchbaseError::new(
                ErrorKind::InternalServerFailure,
                format!("illegal session transition {:?} -> {:?}", *guard, target),
            ));
        }
        debug!(from = ?*guard, to = ?target, "session state transition");
        *guard = target;
        Ok(())
    }

    /// Drives `connecting -> negotiating(..) -> ready` (spec §4.3). The
    /// stream is assumed already connected (that is `cb-transport`'s job);
    /// `cb-cluster` owns DNS resolution of the node's endpoints before a
    /// `Session` is even constructed.
    #[instrument(skip(self), fields(bucket = ?self.options.bucket))]
    pub async fn negotiate(self: &Arc<Self>) -> Result<Bytes, CouchbaseError> {
        self.transition(SessionState::Connecting)?;
        self.transition(SessionState::Negotiating(NegotiationStage::Hello))?;

        let accepted = self.do_hello().await?;
        let missing = hello::missing_required(&accepted);
        if !missing.is_empty() {
            self.transition(SessionState::Stopped).ok();
            return Err(CouchbaseError::new(
                ErrorKind::FeatureNotAvailable,
                format!("server did not accept required features: {missing:?}"),
            ));
        }

        self.transition(SessionState::Negotiating(NegotiationStage::ErrorMap))?;
        self.do_error_map().await?;

        self.transition(SessionState::Negotiating(NegotiationStage::Sasl))?;
        self.do_sasl().await?;

        let config = if let Some(bucket) = self.options.bucket.clone() {
            self.transition(SessionState::Negotiating(NegotiationStage::SelectBucket))?;
            self.do_select_bucket(&bucket).await?;
            self.transition(SessionState::Negotiating(NegotiationStage::GetConfig))?;
            self.do_get_config().await?
        } else {
            self.transition(SessionState::Negotiating(NegotiationStage::GetConfig))?;
            self.do_get_config().await?
        };

        // The read loop must not start until every negotiation exchange that
        // drives its own reads through `write_and_await` is done — both paths
        // read from the same mutex-guarded stream, and the loop would either
        // hold the lock across its long read window or steal a negotiation
        // response meant for `write_and_await`.
        self.spawn_read_loop();

        self.transition(SessionState::Ready)?;
        info!("session ready");
        Ok(config)
    }

    async fn do_hello(&self) -> Result<Vec<Feature>, CouchbaseError> {
        let opaque = self.opaques.next();
        let value = hello::encode_features(&self.options.features);
        let frame = Frame::request(Opcode::HELLO, opaque.as_u32(), 0, Bytes::new(), Bytes::new(), value)
            .map_err(codec_err)?;
        let response = self.write_and_await(frame, self.negotiation_deadline()).await?;
        Ok(hello::decode_features(&response))
    }

    async fn do_error_map(&self) -> Result<(), CouchbaseError> {
        let opaque = self.opaques.next();
        let version: u16 = 2;
        let value = Bytes::copy_from_slice(&version.to_be_bytes());
        let frame = Frame::request(Opcode::GET_ERROR_MAP, opaque.as_u32(), 0, Bytes::new(), Bytes::new(), value)
            .map_err(codec_err)?;
        let response = self.write_and_await(frame, self.negotiation_deadline()).await?;
        let map = ErrorMap::parse(&response)
            .map_err(|e| CouchbaseError::new(ErrorKind::ParsingFailure, e.to_string()))?;
        *self.error_map.write().expect("error map lock is never poisoned") = Some(map);
        Ok(())
    }

    async fn do_sasl(&self) -> Result<(), CouchbaseError> {
        let opaque = self.opaques.next();
        let list_frame = Frame::request(
            Opcode::SASL_LIST_MECHS,
            opaque.as_u32(),
            0,
            Bytes::new(),
            Bytes::new(),
            Bytes::new(),
        )
        .map_err(codec_err)?;
        let offered = self.write_and_await(list_frame, self.negotiation_deadline()).await?;
        let offered = std::str::from_utf8(&offered)
            .map_err(|e| CouchbaseError::new(ErrorKind::ParsingFailure, e.to_string()))?;

        let mechanism = sasl::select_mechanism(offered, self.stream.is_tls(), self.options.credentials.allow_plain_on_plaintext)
            .ok_or_else(|| CouchbaseError::new(ErrorKind::AuthenticationFailure, "no acceptable SASL mechanism offered"))?;

        if mechanism == Mechanism::Plain {
            let message = sasl::plain_message("", &self.options.credentials.username, &self.options.credentials.password);
            let opaque = self.opaques.next();
            let frame = Frame::request(
                Opcode::SASL_AUTH,
                opaque.as_u32(),
                0,
                Bytes::new(),
                Bytes::from_static(b"PLAIN"),
                Bytes::from(message),
            )
            .map_err(codec_err)?;
            self.write_and_await(frame, self.negotiation_deadline()).await?;
            return Ok(());
        }

        let mut client =
            ScramClient::new(mechanism, &self.options.credentials.username, &self.options.credentials.password);
        let first = client.client_first_message();
        let opaque = self.opaques.next();
        let frame = Frame::request(
            Opcode::SASL_AUTH,
            opaque.as_u32(),
            0,
            Bytes::new(),
            Bytes::copy_from_slice(mechanism.name().as_bytes()),
            Bytes::from(first.into_bytes()),
        )
        .map_err(codec_err)?;
        let server_first = self.write_and_await(frame, self.negotiation_deadline()).await?;
        let server_first = std::str::from_utf8(&server_first)
            .map_err(|e| CouchbaseError::new(ErrorKind::AuthenticationFailure, e.to_string()))?;

        let client_final = client
            .handle_server_first(server_first)
            .map_err(|e| CouchbaseError::new(ErrorKind::AuthenticationFailure, e.to_string()))?;

        let opaque = self.opaques.next();
        let frame = Frame::request(
            Opcode::SASL_STEP,
            opaque.as_u32(),
            0,
            Bytes::new(),
            Bytes::copy_from_slice(mechanism.name().as_bytes()),
            Bytes::from(client_final.into_bytes()),
        )
        .map_err(codec_err)?;
        let server_final = self.write_and_await(frame, self.negotiation_deadline()).await?;
        let server_final = std::str::from_utf8(&server_final)
            .map_err(|e| CouchbaseError::new(ErrorKind::AuthenticationFailure, e.to_string()))?;

        client
            .verify_server_final(server_final)
            .map_err(|_| CouchbaseError::new(ErrorKind::AuthenticationFailure, "server signature did not match"))
    }

    async fn do_select_bucket(&self, bucket: &str) -> Result<(), CouchbaseError> {
        let opaque = self.opaques.next();
        let frame = Frame::request(
            Opcode::SELECT_BUCKET,
            opaque.as_u32(),
            0,
            Bytes::new(),
            Bytes::copy_from_slice(bucket.as_bytes()),
            Bytes::new(),
        )
        .map_err(codec_err)?;
        self.write_and_await(frame, self.negotiation_deadline()).await?;
        Ok(())
    }

    async fn do_get_config(&self) -> Result<Bytes, CouchbaseError> {
        let opaque = self.opaques.next();
        let frame = Frame::request(
            Opcode::GET_CLUSTER_CONFIG,
            opaque.as_u32(),
            0,
            Bytes::new(),
            Bytes::new(),
            Bytes::new(),
        )
        .map_err(codec_err)?;
        self.write_and_await(frame, self.negotiation_deadline()).await
    }

    fn negotiation_deadline(&self) -> Deadline {
        self.options.key_value_timeout.deadline_from_now()
    }

    /// Write a frame and wait for its matched response, bypassing the
    /// pending table's normal opaque-demux path since negotiation happens
    /// before the read loop is running.
    async fn write_and_await(&self, frame: Frame, deadline: Deadline) -> Result<Bytes, CouchbaseError> {
        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded);
        self.stream.write_all(&encoded, deadline).await.map_err(transport_err)?;

        let mut buf = BytesMut::new();
        loop {
            if let Some(response) = Frame::try_decode(&mut buf).map_err(codec_err)? {
                return status_to_result(response);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read_some(&mut chunk, deadline).await.map_err(transport_err)?;
            if n == 0 {
                return Err(CouchbaseError::new(ErrorKind::ServiceNotAvailable, "peer closed connection during negotiation"));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Submit a command once the session is ready (spec §4.3 `ready |
    /// write -> ready`). Returns the raw response frame — callers use the
    /// matching operation's `decode` function to turn it into a typed
    /// response and uniform error code (spec §4.6); this layer only ever
    /// fails the future for transport/session-level reasons (timeout,
    /// cancellation, teardown).
    pub async fn submit(
        self: &Arc<Self>,
        mut frame: Frame,
        deadline: Deadline,
        idempotence: Idempotence,
    ) -> Result<Frame, CouchbaseError> {
        if !self.state().accepts_user_commands() {
            return Err(CouchbaseError::new(ErrorKind::ServiceNotAvailable, "session is not ready"));
        }
        let opaque = self.opaques.next();
        frame.header.opaque = opaque.as_u32();

        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            opaque,
            PendingCommand {
                deadline,
                encoded_frame: encoded.clone().freeze(),
                completion: tx,
                retry: RetryContext { idempotence, attempt: 0 },
            },
        );

        if let Err(e) = self.stream.write_all(&encoded, deadline).await {
            self.pending.complete(opaque, Err(transport_err(e)));
        }

        rx.await.unwrap_or_else(|_| Err(CouchbaseError::new(ErrorKind::RequestCanceled, "session closed before response arrived")))
    }

    fn spawn_read_loop(self: &Arc<Self>) {
        if self.read_loop_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.run_read_loop().await;
        });
    }

    async fn run_read_loop(self: Arc<Self>) {
        let mut buf = BytesMut::new();
        let read_window = Timeout::from_millis(3_600_000);
        loop {
            match Frame::try_decode(&mut buf) {
                Ok(Some(frame)) => self.dispatch_response(frame),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "codec error reading from session stream, tearing down");
                    self.teardown(CouchbaseError::new(ErrorKind::ParsingFailure, e.to_string()));
                    return;
                }
            }
            let mut chunk = [0u8; 16 * 1024];
            match self.stream.read_some(&mut chunk, read_window.deadline_from_now()).await {
                Ok(0) => {
                    self.teardown(CouchbaseError::new(ErrorKind::ServiceNotAvailable, "peer closed the connection"));
                    return;
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    self.teardown(transport_err(e));
                    return;
                }
            }
        }
    }

    fn dispatch_response(&self, frame: Frame) {
        let opaque = frame.header.opaque.into();
        if !self.pending.complete(opaque, Ok(frame)) {
            debug!(%opaque, "response for unknown or already-completed opaque");
        }
    }

    /// Transition to `Stopped` and drain every pending command (spec §3
    /// invariant: teardown drains the table with a not-connected error).
    fn teardown(&self, reason: CouchbaseError) {
        let _ = self.transition(SessionState::Stopped);
        let drained = self.pending.drain_all(|| CouchbaseError::new(ErrorKind::ServiceNotAvailable, "session is tearing down"));
        for (_, command) in drained {
            let message = reason.message().to_string();
            let _ = command.completion.send(Err(CouchbaseError::new(reason.kind(), message)));
        }
    }
}

/// Used only during negotiation (spec §4.3 HELLO/error-map/SASL/select-bucket
/// steps): those exchanges want a plain success-or-fail outcome, unlike
/// `submit`'s user commands, which hand the full frame to the operation
/// layer's `decode` so non-success statuses it knows how to handle (e.g.
/// `NOT_MY_VBUCKET`) aren't collapsed into a generic error first.
fn status_to_result(frame: Frame) -> Result<Bytes, CouchbaseError> {
    if frame.header.status() == Status::SUCCESS {
        Ok(frame.value)
    } else {
        // None of the negotiation exchanges this drives (HELLO, error map,
        // SASL, select-bucket, get-config) carry a CAS precondition.
        Err(CouchbaseError::new(status_to_kind(frame.header.status(), false), format!("server returned status {:#06x}", frame.header.status().0)))
    }
}

fn status_to_kind(status: Status, cas_precondition: bool) -> ErrorKind {
    match status {
        Status::KEY_NOT_FOUND => ErrorKind::DocumentNotFound,
        Status::KEY_EXISTS if cas_precondition => ErrorKind::CasMismatch,
        Status::KEY_EXISTS => ErrorKind::DocumentExists,
        Status::VALUE_TOO_LARGE => ErrorKind::ValueTooLarge,
        Status::INVALID_ARGUMENTS => ErrorKind::InvalidArgument,
        Status::AUTH_ERROR | Status::AUTH_CONTINUE => ErrorKind::AuthenticationFailure,
        Status::LOCKED => ErrorKind::DocumentLocked,
        Status::NOT_SUPPORTED => ErrorKind::FeatureNotAvailable,
        Status::TEMPORARY_FAILURE => ErrorKind::TemporaryFailure,
        Status::UNKNOWN_COLLECTION => ErrorKind::CollectionNotFound,
        Status::NOT_MY_COLLECTION => ErrorKind::CollectionNotFound,
        Status::SUBDOC_PATH_NOT_FOUND => ErrorKind::PathNotFound,
        Status::SUBDOC_PATH_MISMATCH => ErrorKind::PathMismatch,
        Status::SUBDOC_PATH_INVALID => ErrorKind::PathInvalid,
        Status::SUBDOC_PATH_TOO_BIG => ErrorKind::PathTooBig,
        _ => ErrorKind::InternalServerFailure,
    }
}

fn codec_err(e: cb_codec::CodecError) -> CouchbaseError {
    CouchbaseError::new(ErrorKind::DecodingFailure, e.to_string())
}

fn transport_err(e: cb_transport::TransportError) -> CouchbaseError {
    let kind = match e {
        cb_transport::TransportError::TimedOut => ErrorKind::UnambiguousTimeout,
        cb_transport::TransportError::Cancelled => ErrorKind::RequestCanceled,
        _ => ErrorKind::ServiceNotAvailable,
    };
    CouchbaseError::new(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState::*;

    #[test]
    fn status_to_kind_maps_not_my_collection_like_unknown_collection() {
        assert_eq!(status_to_kind(Status::NOT_MY_COLLECTION, false), ErrorKind::CollectionNotFound);
    }

    #[test]
    fn status_to_kind_maps_key_exists_to_cas_mismatch_only_under_a_cas_precondition() {
        assert_eq!(status_to_kind(Status::KEY_EXISTS, true), ErrorKind::CasMismatch);
        assert_eq!(status_to_kind(Status::KEY_EXISTS, false), ErrorKind::DocumentExists);
    }

    #[test]
    fn illegal_transition_is_rejected_without_a_live_stream() {
        // Exercises the transition guard in isolation; `Session` needs a
        // real `Stream` for the async paths, covered by cb-transport's
        // own loopback tests.
        let mut state = Disconnected;
        assert!(!state.can_transition_to(Ready));
        state = Resolving;
        assert!(state.can_transition_to(Connecting));
    }
}
