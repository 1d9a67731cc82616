//! Discovery error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("invalid IPv6 prefix {prefix:?}: {reason}")]
    InvalidIpv6Prefix { prefix: String, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] lifx_client::ClientError),

    #[error("transport error: {0}")]
    Transport(#[from] lifx_transport::TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] lifx_core::Error),

    #[error("discovery service stopped")]
    Stopped,
}
