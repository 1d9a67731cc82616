//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// Events produced by a receive task
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Datagram received
    Data(Bytes),
    /// Receive error; the socket stays usable
    Error(String),
}

/// Anything that can put a datagram on the wire.
///
/// Device sessions only ever send through this trait, so tests can swap the
/// socket for a recorder.
#[async_trait]
pub trait DatagramSender: Send + Sync {
    /// Send one datagram to `target`
    async fn send_to(&self, data: Bytes, target: SocketAddr) -> Result<()>;
}
