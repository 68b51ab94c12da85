//! Codec-local error type. Deliberately separate from
//! [`cb_core::CouchbaseError`]: callers in `cb-session` map a `CodecError`
//! onto the appropriate `ErrorKind` (almost always `ParsingFailure`,
//! `DecodingFailure` or `EncodingFailure`) once they know which operation
//! was in flight, since the same malformed-frame condition can mean
//! different things to different callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame magic byte {0:#04x} is not a recognised request/response magic")]
    InvalidMagic(u8),

    #[error("frame body length {declared} exceeds the {limit} byte safety ceiling")]
    BodyTooLarge { declared: u32, limit: u32 },

    #[error("buffer holds {have} bytes, need at least {need} for this frame")]
    Truncated { have: usize, need: usize },

    #[error("key length {0} exceeds the 250 byte protocol limit")]
    KeyTooLong(usize),

    #[error("sub-document spec is malformed: {0}")]
    MalformedSubdoc(&'static str),

    #[error("snappy decompression failed: {0}")]
    Snappy(#[from] snap::Error),

    #[error("JSON body could not be decoded: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 validation failed: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

pub type CodecResult<T> = Result<T, CodecError>;
