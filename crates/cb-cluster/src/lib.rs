//! Cluster bootstrap, topology ownership, and HTTP service dispatch
//! (spec §4.5).

pub mod cluster;
pub mod connection_string;
pub mod dns;
pub mod service_router;

pub use cluster::{Cluster, ClusterCredentials, ClusterOptions};
pub use connection_string::{ConnectionOptions, ConnectionString, Host, Network, Scheme};
pub use dns::{SrvResolver, SrvTarget, TrustDnsResolver};
pub use service_router::{Service, ServiceRouter};
