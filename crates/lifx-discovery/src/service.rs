//! Discovery service and its event loop
//!
//! One task owns the listening sockets and the registry. On every tick it
//! broadcasts a GetService probe and sweeps out devices that have gone
//! silent. Between ticks it decodes inbound datagrams: service replies feed
//! the registry, everything else is handed to the session of the device that
//! sent it.

use bytes::Bytes;
use dashmap::DashMap;
use lifx_client::{Device, LanConfig, LanContext, Liveness};
use lifx_core::{
    message_type, Frame, FrameHeader, HardwareAddress, Message, DEFAULT_PORT, NO_SEQUENCE,
    SERVICE_UDP,
};
use lifx_transport::{DualStackTransport, TransportEvent, UdpConfig, UdpReceiver, UdpTransport};
use std::net::{SocketAddr, SocketAddrV6};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{DiscoveryError, Result};
use crate::ipv6::derive_ipv6;
use crate::registrar::Registrar;

type Registry = Arc<DashMap<HardwareAddress, Arc<Device>>>;

enum Command {
    Probe,
    Shutdown(oneshot::Sender<()>),
}

/// Entry point for LAN discovery
pub struct DiscoveryService;

impl DiscoveryService {
    /// Bind the listening socket(s) and start probing.
    ///
    /// Fails if the configuration is invalid or a socket cannot be bound;
    /// nothing is left running in that case.
    pub async fn start<R: Registrar>(config: LanConfig, registrar: R) -> Result<DiscoveryHandle> {
        config.validate()?;
        if let Some(prefix) = &config.ipv6_prefix {
            derive_ipv6(prefix, HardwareAddress::BROADCAST)?;
        }

        let udp_config = UdpConfig {
            max_packet_size: config.max_packet_size,
            ..UdpConfig::default()
        };

        let v4 = if config.bind_address.port() == 0 {
            UdpTransport::bind_with_config(config.bind_address, udp_config.clone()).await?
        } else {
            UdpTransport::bind_reusable(config.bind_address, udp_config.clone()).await?
        };
        v4.set_broadcast(true)?;
        let local_addr = v4.local_addr()?;

        let v6 = match config.ipv6_prefix {
            Some(_) => {
                let any = SocketAddr::from(SocketAddrV6::new(std::net::Ipv6Addr::UNSPECIFIED, 0, 0, 0));
                Some(Arc::new(UdpTransport::bind_with_config(any, udp_config).await?))
            }
            None => None,
        };

        let v4 = Arc::new(v4);
        let v4_receiver = v4.start_receiver();
        let v6_receiver = v6.as_ref().map(|transport| transport.start_receiver());

        let transport = DualStackTransport::new(v4, v6);
        let context = Arc::new(LanContext::new(Arc::new(transport), config));

        let probe = Frame::new(
            FrameHeader::new(message_type::GET_SERVICE)
                .with_source(context.source_id())
                .with_response_required(true),
            Bytes::new(),
        )
        .encode()?;

        info!(
            "Discovery listening on {} (source {:#010x}), probing {} every {:?}",
            local_addr,
            context.source_id(),
            context.config().broadcast_address,
            context.config().probe_interval
        );

        let registry: Registry = Arc::new(DashMap::new());
        let (commands, command_rx) = mpsc::unbounded_channel();

        let event_loop = EventLoop {
            context: context.clone(),
            registry: registry.clone(),
            registrar: Arc::new(registrar),
            probe,
        };
        let task = tokio::spawn(event_loop.run(v4_receiver, v6_receiver, command_rx));

        Ok(DiscoveryHandle {
            context,
            registry,
            commands,
            task,
            local_addr,
        })
    }
}

/// Control handle for a running discovery service.
///
/// Dropping the handle shuts the service down the same way
/// [`DiscoveryHandle::shutdown`] does, without waiting for it.
pub struct DiscoveryHandle {
    context: Arc<LanContext>,
    registry: Registry,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl DiscoveryHandle {
    /// Registered devices, ordered by hardware address
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = self
            .registry
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        devices.sort_by_key(|device| device.hardware_address());
        devices
    }

    pub fn get(&self, hw: HardwareAddress) -> Option<Arc<Device>> {
        self.registry.get(&hw).map(|entry| Arc::clone(entry.value()))
    }

    /// Broadcast a probe now instead of waiting for the next tick
    pub fn probe_now(&self) -> Result<()> {
        self.commands
            .send(Command::Probe)
            .map_err(|_| DiscoveryError::Stopped)
    }

    /// Address of the IPv4 listening socket
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<LanContext> {
        &self.context
    }

    /// Evict and unregister every device, then stop the event loop
    pub async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let _ = self.task.await;
    }
}

struct EventLoop {
    context: Arc<LanContext>,
    registry: Registry,
    registrar: Arc<dyn Registrar>,
    probe: Bytes,
}

impl EventLoop {
    async fn run(
        self,
        mut v4: UdpReceiver,
        mut v6: Option<UdpReceiver>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut ticker = tokio::time::interval(self.context.config().probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe().await;
                    self.sweep(Instant::now());
                }
                Some((event, from)) = v4.recv_from() => self.on_event(event, from),
                Some((event, from)) = recv_optional(&mut v6) => self.on_event(event, from),
                command = commands.recv() => match command {
                    Some(Command::Probe) => self.probe().await,
                    Some(Command::Shutdown(done)) => {
                        self.evict_all();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.evict_all();
                        break;
                    }
                },
            }
        }

        info!("Discovery stopped");
    }

    async fn probe(&self) {
        let target = self.context.config().broadcast_address;
        debug!("Broadcasting GetService to {}", target);

        if let Err(e) = self.context.transport().send_to(self.probe.clone(), target).await {
            warn!("Discovery broadcast to {} failed: {}", target, e);
        }
    }

    fn on_event(&self, event: TransportEvent, from: SocketAddr) {
        match event {
            TransportEvent::Data(data) => self.on_datagram(&data, from),
            TransportEvent::Error(e) => debug!("Receive error: {}", e),
        }
    }

    fn on_datagram(&self, data: &[u8], from: SocketAddr) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.on_malformed(data, from, e);
                return;
            }
        };

        let hw = frame.header.target;
        if hw.is_broadcast() {
            debug!(
                "Ignoring type {} with broadcast target from {}",
                frame.header.message_type, from
            );
            return;
        }

        match frame.header.message_type {
            message_type::STATE_SERVICE => self.on_service_reply(frame, from),
            message_type::LIGHT_STATE if !self.registry.contains_key(&hw) => {
                // Bulbs announce themselves with a LightState after boot
                if let Some(device) = self.register(hw, from, DEFAULT_PORT) {
                    device.handle_frame(frame);
                }
            }
            _ => self.route(frame, from),
        }
    }

    fn on_service_reply(&self, frame: Frame, from: SocketAddr) {
        let service = match frame.message() {
            Ok(Message::StateService(service)) => service,
            Ok(_) => return,
            Err(e) => {
                debug!("Dropping service reply from {}: {}", from, e);
                return;
            }
        };

        if service.service != SERVICE_UDP {
            debug!("Ignoring service {} from {}", service.service, from);
            return;
        }
        let Ok(port) = u16::try_from(service.port) else {
            debug!("Ignoring service port {} from {}", service.port, from);
            return;
        };

        let hw = frame.header.target;
        match self.lookup(hw) {
            Some(device) => {
                match self.device_address(hw, from, port) {
                    Ok(address) => {
                        device.refresh_address(address);
                    }
                    Err(e) => warn!("No address for {}: {}", hw, e),
                }
                // A reply to an explicit GetService also completes that request
                if frame.header.sequence != NO_SEQUENCE {
                    device.handle_frame(frame);
                }
            }
            None => {
                self.register(hw, from, port);
            }
        }
    }

    fn register(&self, hw: HardwareAddress, from: SocketAddr, port: u16) -> Option<Arc<Device>> {
        let address = match self.device_address(hw, from, port) {
            Ok(address) => address,
            Err(e) => {
                warn!("Not registering {}: {}", hw, e);
                return None;
            }
        };

        let device = Device::new(hw, address, self.context.clone());
        self.registry.insert(hw, device.clone());
        info!("Discovered device {} at {}", hw, address);

        self.registrar.register(&device);
        Some(device)
    }

    fn device_address(&self, hw: HardwareAddress, from: SocketAddr, port: u16) -> Result<SocketAddr> {
        match &self.context.config().ipv6_prefix {
            Some(prefix) => Ok(SocketAddr::from(SocketAddrV6::new(
                derive_ipv6(prefix, hw)?,
                port,
                0,
                0,
            ))),
            None => Ok(SocketAddr::new(from.ip(), port)),
        }
    }

    fn lookup(&self, hw: HardwareAddress) -> Option<Arc<Device>> {
        self.registry.get(&hw).map(|entry| Arc::clone(entry.value()))
    }

    fn route(&self, frame: Frame, from: SocketAddr) {
        let hw = frame.header.target;
        let Some(device) = self.lookup(hw) else {
            debug!(
                "Type {} from unregistered device {} at {}",
                frame.header.message_type, hw, from
            );
            return;
        };

        // Derived IPv6 addresses are never replaced by an IPv4 source
        if from.is_ipv4() == device.network_address().is_ipv4() {
            device.refresh_address(from);
        }
        device.handle_frame(frame);
    }

    fn on_malformed(&self, data: &[u8], from: SocketAddr, error: lifx_core::Error) {
        let header = match Frame::peek_header(data) {
            Ok(header) => header,
            Err(_) => {
                debug!("Dropping {} byte datagram from {}: {}", data.len(), from, error);
                return;
            }
        };

        let Some(device) = self.lookup(header.target) else {
            debug!("Dropping malformed frame from {}: {}", from, error);
            return;
        };

        debug!(
            "Malformed type {} from {} (seq {}): {}",
            header.message_type, header.target, header.sequence, error
        );
        device.handle_malformed(&header, error);
    }

    fn sweep(&self, now: Instant) {
        let expired: Vec<Arc<Device>> = self
            .registry
            .iter()
            .filter(|entry| entry.value().check_liveness(now) == Liveness::Expired)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for device in expired {
            info!(
                "Device {} silent past liveness timeout",
                device.hardware_address()
            );
            self.evict(&device);
        }
    }

    fn evict(&self, device: &Arc<Device>) {
        device.evict();
        if self.registry.remove(&device.hardware_address()).is_some() {
            self.registrar.unregister(device);
        }
    }

    fn evict_all(&self) {
        let devices: Vec<Arc<Device>> = self
            .registry
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for device in devices {
            self.evict(&device);
        }
    }
}

async fn recv_optional(receiver: &mut Option<UdpReceiver>) -> Option<(TransportEvent, SocketAddr)> {
    match receiver {
        Some(receiver) => receiver.recv_from().await,
        None => std::future::pending().await,
    }
}
