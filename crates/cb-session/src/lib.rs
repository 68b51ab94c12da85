//! Per-node connection lifecycle (spec §4.3): connect, HELLO, error-map,
//! SASL, select-bucket, get-config, then ready — after which the session
//! demultiplexes in-flight commands by opaque until torn down.

pub mod credentials;
pub mod pending;
pub mod session;
pub mod state;

pub use credentials::Credentials;
pub use pending::{CommandOutcome, PendingCommand, PendingTable};
pub use session::{default_features, Session, SessionOptions};
pub use state::{NegotiationStage, SessionState};
