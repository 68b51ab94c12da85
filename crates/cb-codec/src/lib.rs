//! Wire codec (spec §4.1): bit-exact encode/decode of the binary
//! memcached-style key/value frames, sub-document specs, SASL/HELLO
//! messages, and the HTTP/JSON envelopes used by the query family of
//! services. Every function here is pure — no I/O, no retry, no
//! connection state — so it can be exercised and fuzzed in isolation; the
//! stateful pieces (who we send frames to, when) live in `cb-session` and
//! `cb-cluster`.

pub mod http;
pub mod kv;
pub mod sasl;

pub use kv::error::CodecError;
