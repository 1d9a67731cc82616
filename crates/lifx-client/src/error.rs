//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Outcome delivered to a request callback when no usable response arrived
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("no response from device")]
    NoResponse,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("sequence numbers exhausted")]
    SequenceExhausted,

    #[error("device evicted")]
    DeviceEvicted,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("unexpected response type {0}")]
    UnexpectedResponse(u16),
}

impl From<lifx_core::Error> for RequestError {
    fn from(e: lifx_core::Error) -> Self {
        match e {
            lifx_core::Error::MalformedFrame(msg) => RequestError::MalformedFrame(msg),
            lifx_core::Error::Encoding(msg) => RequestError::Encoding(msg),
            lifx_core::Error::SequenceExhausted => RequestError::SequenceExhausted,
            lifx_core::Error::InvalidHardwareAddress(msg) => RequestError::Encoding(msg),
        }
    }
}

impl From<lifx_transport::TransportError> for RequestError {
    fn from(e: lifx_transport::TransportError) -> Self {
        RequestError::Transport(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
