//! The binary key/value codec.

pub mod error;
pub mod errormap;
pub mod frame;
pub mod framing;
pub mod header;
pub mod hello;
pub mod mutate;
pub mod opcode;
pub mod subdoc;

pub use error::{CodecError, CodecResult};
pub use frame::Frame;
pub use header::Header;
pub use opcode::{Opcode, Status};
