//! UDP transport implementation

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{DatagramSender, TransportEvent};

/// UDP configuration
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Kernel receive buffer size (applied by [`UdpTransport::bind_reusable`])
    pub recv_buffer_size: usize,
    /// Maximum datagram size accepted by the receive task
    pub max_packet_size: usize,
    /// Capacity of the channel between receive task and consumer
    pub channel_capacity: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 65536,
            max_packet_size: 65507, // Max UDP payload
            channel_capacity: 256,
        }
    }
}

/// UDP transport (connectionless)
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    config: UdpConfig,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_config(addr, UdpConfig::default()).await
    }

    /// Bind with config
    pub async fn bind_with_config(addr: SocketAddr, config: UdpConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed { addr, source })?;

        info!("UDP bound to {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            config,
        })
    }

    /// Bind with SO_REUSEADDR (and SO_REUSEPORT on unix) so other listeners
    /// on the well-known port keep working.
    pub async fn bind_reusable(addr: SocketAddr, config: UdpConfig) -> Result<Self> {
        let socket = Self::reusable_socket(addr, &config)
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        let socket = UdpSocket::from_std(socket)?;

        info!("UDP bound (reusable) to {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            config,
        })
    }

    fn reusable_socket(
        addr: SocketAddr,
        config: &UdpConfig,
    ) -> std::io::Result<std::net::UdpSocket> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

        socket.set_reuse_address(true)?;

        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        socket.set_recv_buffer_size(config.recv_buffer_size)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        Ok(socket.into())
    }

    /// Get local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    /// Enable broadcast
    pub fn set_broadcast(&self, enable: bool) -> Result<()> {
        self.socket.set_broadcast(enable).map_err(TransportError::Io)
    }

    /// Send to a specific address
    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        self.socket
            .send_to(data, target)
            .await
            .map_err(|e| TransportError::SendFailed(format!("{}: {}", target, e)))?;
        Ok(())
    }

    /// Start receiving packets. The receive task stops when the returned
    /// receiver is dropped.
    pub fn start_receiver(&self) -> UdpReceiver {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let socket = self.socket.clone();
        let max_size = self.config.max_packet_size;

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; max_size];

            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        debug!("UDP received {} bytes from {}", len, from);
                        let data = Bytes::copy_from_slice(&buf[..len]);
                        if tx.send((TransportEvent::Data(data), from)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // ICMP port-unreachable surfaces here on some platforms
                        error!("UDP receive error: {}", e);
                        let unspecified = SocketAddr::from(([0, 0, 0, 0], 0));
                        if tx
                            .send((TransportEvent::Error(e.to_string()), unspecified))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        UdpReceiver { rx, task }
    }
}

#[async_trait]
impl DatagramSender for UdpTransport {
    async fn send_to(&self, data: Bytes, target: SocketAddr) -> Result<()> {
        UdpTransport::send_to(self, &data, target).await
    }
}

/// UDP receiver
pub struct UdpReceiver {
    rx: mpsc::Receiver<(TransportEvent, SocketAddr)>,
    task: JoinHandle<()>,
}

impl UdpReceiver {
    /// Receive the next event with source address
    pub async fn recv_from(&mut self) -> Option<(TransportEvent, SocketAddr)> {
        self.rx.recv().await
    }
}

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
