//! Transport error types

use std::net::SocketAddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("no socket for address family of {0}")]
    NoRoute(SocketAddr),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
