//! Registration callbacks for discovered devices

use lifx_client::Device;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Told when a device joins or leaves the registry.
///
/// Called from the discovery event loop; implementations must not block.
/// `unregister` is called exactly once per registered device.
pub trait Registrar: Send + Sync + 'static {
    fn register(&self, device: &Arc<Device>);
    fn unregister(&self, device: &Arc<Device>);
}

/// Discovery event
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Device discovered
    Found(Arc<Device>),
    /// Device evicted
    Lost(Arc<Device>),
}

impl Registrar for mpsc::UnboundedSender<DiscoveryEvent> {
    fn register(&self, device: &Arc<Device>) {
        let _ = self.send(DiscoveryEvent::Found(Arc::clone(device)));
    }

    fn unregister(&self, device: &Arc<Device>) {
        let _ = self.send(DiscoveryEvent::Lost(Arc::clone(device)));
    }
}

/// Registrar built from two closures
pub struct FnRegistrar<R, U> {
    on_register: R,
    on_unregister: U,
}

impl<R, U> FnRegistrar<R, U>
where
    R: Fn(&Arc<Device>) + Send + Sync + 'static,
    U: Fn(&Arc<Device>) + Send + Sync + 'static,
{
    pub fn new(on_register: R, on_unregister: U) -> Self {
        Self {
            on_register,
            on_unregister,
        }
    }
}

impl<R, U> Registrar for FnRegistrar<R, U>
where
    R: Fn(&Arc<Device>) + Send + Sync + 'static,
    U: Fn(&Arc<Device>) + Send + Sync + 'static,
{
    fn register(&self, device: &Arc<Device>) {
        (self.on_register)(device)
    }

    fn unregister(&self, device: &Arc<Device>) {
        (self.on_unregister)(device)
    }
}
