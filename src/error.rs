//! Error types for record building, ring coordination, and file writing.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, HipoError>;

/// Errors surfaced by the writer stack.
///
/// Every variant is `Clone`: worker threads store the first fatal error and
/// later producer-side API calls re-raise it, so I/O and codec failures carry
/// their message as an owned string rather than a live `std::io::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HipoError {
    /// Header magic word matches neither byte order.
    #[error("bad magic word 0x{0:08x}, expected 0xc0da0100 in either byte order")]
    BadMagic(u32),

    /// Header length fields are inconsistent with the containing buffer.
    #[error("bad record length: {0}")]
    BadLength(String),

    /// Header version field is not 6.
    #[error("unsupported format version {0}, expected 6")]
    UnsupportedVersion(u32),

    /// Compression code outside 0..=3.
    #[error("unsupported compression code {0}")]
    UnsupportedCompression(u32),

    /// A caller-provided output buffer cannot hold the worst-case output.
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// The underlying compressor or decompressor signaled failure.
    #[error("codec failure: {0}")]
    Codec(String),

    /// File open/write/seek/sync/close failure.
    #[error("i/o failure: {0}")]
    Io(String),

    /// A blocking ring operation was woken by `error_alert()`.
    #[error("ring operation cancelled")]
    Cancelled,

    /// An operation was invoked in a state that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for HipoError {
    fn from(err: std::io::Error) -> Self {
        HipoError::Io(err.to_string())
    }
}
