//! Error types for the LIFX wire protocol

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Codec error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Structural violation found while decoding a datagram
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A field does not fit its allotted width on the wire
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Every sequence number in [1, 255] is currently outstanding
    #[error("sequence numbers exhausted: 255 requests outstanding")]
    SequenceExhausted,

    /// Hardware address text could not be parsed
    #[error("invalid hardware address: {0}")]
    InvalidHardwareAddress(String),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedFrame(msg.into())
    }

    pub(crate) fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }
}
