//! Send options and pending request bookkeeping

use bytes::Bytes;
use lifx_core::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::config::LanConfig;
use crate::device::Device;
use crate::error::RequestError;

/// What a request callback receives
pub type RequestResult = std::result::Result<Frame, RequestError>;

pub(crate) type Callback = Box<dyn FnOnce(&Arc<Device>, RequestResult) + Send + 'static>;

/// Per-send options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Ask the device for an Acknowledgement
    pub require_ack: bool,
    /// Ask the device for a state reply; acknowledgements are then absorbed
    pub response_required: bool,
    /// Overrides the configured retry count
    pub max_retries: Option<u8>,
    /// Overrides the configured retry interval
    pub retry_interval: Option<Duration>,
    /// Send with sequence 0 and track nothing
    pub no_response_expected: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            require_ack: true,
            response_required: false,
            max_retries: None,
            retry_interval: None,
            no_response_expected: false,
        }
    }
}

impl SendOptions {
    /// Acknowledged send, the default for Set messages
    pub fn ack() -> Self {
        Self::default()
    }

    /// Wait for a state reply, the usual shape of Get messages
    pub fn response() -> Self {
        Self {
            require_ack: false,
            response_required: true,
            ..Self::default()
        }
    }

    /// Untracked send with sequence 0
    pub fn fire_and_forget() -> Self {
        Self {
            require_ack: false,
            response_required: false,
            no_response_expected: true,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    pub(crate) fn retries(&self, config: &LanConfig) -> u8 {
        self.max_retries.unwrap_or(config.max_retries)
    }

    pub(crate) fn interval(&self, config: &LanConfig) -> Duration {
        self.retry_interval.unwrap_or(config.retry_interval)
    }
}

/// A request awaiting its acknowledgement or reply
pub(crate) struct PendingRequest {
    pub id: u64,
    pub sent_at: Instant,
    pub retries_remaining: u8,
    pub response_required: bool,
    /// Exact bytes resent on retry
    pub encoded: Bytes,
    pub callback: Callback,
    pub timer: Option<AbortHandle>,
}

impl PendingRequest {
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
