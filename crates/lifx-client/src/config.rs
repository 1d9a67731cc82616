//! LAN engine configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Configuration shared by the discovery service and every device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanConfig {
    /// Local address of the listening socket
    pub bind_address: SocketAddr,
    /// Where GetService probes are broadcast
    pub broadcast_address: SocketAddr,
    /// Cadence of discovery probes and the eviction sweep
    pub probe_interval: Duration,
    /// Silence after which a device is evicted
    pub liveness_timeout: Duration,
    /// Resends before a request fails with `NoResponse`
    pub max_retries: u8,
    /// Wait between a send and its resend
    pub retry_interval: Duration,
    /// Prefix for IPv6 device addresses derived from hardware addresses
    pub ipv6_prefix: Option<String>,
    /// Source identifier stamped on every frame; random when unset
    pub source_id: Option<u32>,
    /// Largest datagram accepted by the receive path
    pub max_packet_size: usize,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            broadcast_address: SocketAddr::from(([255, 255, 255, 255], lifx_core::DEFAULT_PORT)),
            probe_interval: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
            ipv6_prefix: None,
            source_id: None,
            max_packet_size: 4096,
        }
    }
}

impl LanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_broadcast_address(mut self, addr: SocketAddr) -> Self {
        self.broadcast_address = addr;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_ipv6_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ipv6_prefix = Some(prefix.into());
        self
    }

    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "probe_interval must be non-zero".into(),
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "retry_interval must be non-zero".into(),
            ));
        }
        if self.liveness_timeout < self.probe_interval {
            return Err(ClientError::InvalidConfig(format!(
                "liveness_timeout {:?} is shorter than probe_interval {:?}",
                self.liveness_timeout, self.probe_interval
            )));
        }
        // Source 0 asks devices to broadcast their replies
        if self.source_id == Some(0) {
            return Err(ClientError::InvalidConfig("source_id must be non-zero".into()));
        }
        if self.max_packet_size < lifx_core::HEADER_SIZE {
            return Err(ClientError::InvalidConfig(format!(
                "max_packet_size {} is smaller than a frame header",
                self.max_packet_size
            )));
        }
        Ok(())
    }
}
