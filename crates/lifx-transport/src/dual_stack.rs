//! IPv4 + optional IPv6 sending

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{Result, TransportError};
use crate::traits::DatagramSender;
use crate::udp::UdpTransport;

/// Routes each datagram to the socket matching the target's address family
#[derive(Clone)]
pub struct DualStackTransport {
    v4: Arc<UdpTransport>,
    v6: Option<Arc<UdpTransport>>,
}

impl DualStackTransport {
    pub fn new(v4: Arc<UdpTransport>, v6: Option<Arc<UdpTransport>>) -> Self {
        Self { v4, v6 }
    }

    fn route(&self, target: SocketAddr) -> Result<&UdpTransport> {
        match target {
            SocketAddr::V4(_) => Ok(&self.v4),
            SocketAddr::V6(_) => self.v6.as_deref().ok_or(TransportError::NoRoute(target)),
        }
    }
}

#[async_trait]
impl DatagramSender for DualStackTransport {
    async fn send_to(&self, data: Bytes, target: SocketAddr) -> Result<()> {
        self.route(target)?.send_to(&data, target).await
    }
}
