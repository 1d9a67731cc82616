//! Shared engine context

use lifx_transport::DatagramSender;
use rand::Rng;
use std::sync::Arc;

use crate::config::LanConfig;

/// State shared by every device: the send path, configuration and the source
/// identifier this engine stamps on its frames
pub struct LanContext {
    transport: Arc<dyn DatagramSender>,
    config: LanConfig,
    source_id: u32,
}

impl LanContext {
    /// Build a context; a random non-zero source id is drawn when the
    /// configuration does not fix one.
    pub fn new(transport: Arc<dyn DatagramSender>, config: LanConfig) -> Self {
        let source_id = config
            .source_id
            .filter(|id| *id != 0)
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..=u32::MAX));

        Self {
            transport,
            config,
            source_id,
        }
    }

    pub fn transport(&self) -> &Arc<dyn DatagramSender> {
        &self.transport
    }

    pub fn config(&self) -> &LanConfig {
        &self.config
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }
}

impl std::fmt::Debug for LanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanContext")
            .field("config", &self.config)
            .field("source_id", &self.source_id)
            .finish_non_exhaustive()
    }
}
