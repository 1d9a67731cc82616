//! Fake bulb: a loopback UDP responder that answers like a LIFX device

use bytes::Bytes;
use lifx_core::message::{LightState, StateService, StateVersion};
use lifx_core::{Frame, FrameHeader, HardwareAddress, Hsbk, Label, Message, SERVICE_UDP};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::debug;

struct BulbState {
    muted: AtomicBool,
    corrupt: AtomicBool,
    received: AtomicU32,
    service_port: AtomicU32,
    power: AtomicU16,
    label: Mutex<Label>,
    color: Mutex<Hsbk>,
    headers: Mutex<Vec<FrameHeader>>,
}

/// Answers GetService, acknowledgements, power, label, color, version and
/// echo requests. Can be muted, made to send corrupt replies, and told to
/// push unsolicited frames.
pub struct FakeBulb {
    hardware_address: HardwareAddress,
    addr: SocketAddr,
    socket: Arc<UdpSocket>,
    state: Arc<BulbState>,
    task: JoinHandle<()>,
}

impl FakeBulb {
    /// Start a bulb on an ephemeral loopback port
    pub async fn start(hardware_address: HardwareAddress) -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
        let addr = socket.local_addr()?;

        let state = Arc::new(BulbState {
            muted: AtomicBool::new(false),
            corrupt: AtomicBool::new(false),
            received: AtomicU32::new(0),
            service_port: AtomicU32::new(u32::from(addr.port())),
            power: AtomicU16::new(0),
            label: Mutex::new(Label::new("Fake Bulb")),
            color: Mutex::new(Hsbk::new(0, 0, 65535, 3500)),
            headers: Mutex::new(Vec::new()),
        });

        let task = tokio::spawn(serve(socket.clone(), hardware_address, state.clone()));

        Ok(Self {
            hardware_address,
            addr,
            socket,
            state,
            task,
        })
    }

    pub fn hardware_address(&self) -> HardwareAddress {
        self.hardware_address
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop answering (datagrams are still counted)
    pub fn set_muted(&self, muted: bool) {
        self.state.muted.store(muted, Ordering::SeqCst);
    }

    /// Truncate every reply by one byte so it fails to decode
    pub fn set_corrupt(&self, corrupt: bool) {
        self.state.corrupt.store(corrupt, Ordering::SeqCst);
    }

    /// Port advertised in StateService replies
    pub fn set_service_port(&self, port: u16) {
        self.state.service_port.store(u32::from(port), Ordering::SeqCst);
    }

    /// Datagrams received so far
    pub fn received(&self) -> u32 {
        self.state.received.load(Ordering::SeqCst)
    }

    pub fn received_counter(&self) -> &AtomicU32 {
        &self.state.received
    }

    /// Headers of every decodable frame received
    pub fn headers(&self) -> Vec<FrameHeader> {
        self.state.headers.lock().clone()
    }

    pub fn power(&self) -> u16 {
        self.state.power.load(Ordering::SeqCst)
    }

    pub fn label(&self) -> String {
        self.state.label.lock().text()
    }

    /// Send `message` unprompted (source 0, sequence 0)
    pub async fn push(&self, message: &Message, to: SocketAddr) -> anyhow::Result<()> {
        let header = FrameHeader::new(0).with_target(self.hardware_address);
        let frame = Frame::with_message(header, message);
        self.socket.send_to(&frame.encode()?, to).await?;
        Ok(())
    }

    /// Send raw bytes from the bulb's socket
    pub async fn send_raw(&self, data: &[u8], to: SocketAddr) -> anyhow::Result<()> {
        self.socket.send_to(data, to).await?;
        Ok(())
    }
}

impl Drop for FakeBulb {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: Arc<UdpSocket>, hw: HardwareAddress, state: Arc<BulbState>) {
    let mut buf = vec![0u8; 2048];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!("Fake bulb receive error: {}", e);
                continue;
            }
        };
        state.received.fetch_add(1, Ordering::SeqCst);

        let Ok(frame) = Frame::decode(&buf[..len]) else {
            continue;
        };
        state.headers.lock().push(frame.header);

        if state.muted.load(Ordering::SeqCst) {
            continue;
        }

        for reply in replies(&frame, &state) {
            let header = FrameHeader::new(0)
                .with_source(frame.header.source)
                .with_target(hw)
                .with_sequence(frame.header.sequence);
            let Ok(mut encoded) = Frame::with_message(header, &reply).encode() else {
                continue;
            };
            if state.corrupt.load(Ordering::SeqCst) {
                encoded = Bytes::copy_from_slice(&encoded[..encoded.len() - 1]);
            }
            let _ = socket.send_to(&encoded, from).await;
        }
    }
}

fn replies(frame: &Frame, state: &BulbState) -> Vec<Message> {
    let mut out = Vec::new();
    if frame.header.ack_required {
        out.push(Message::Acknowledgement);
    }

    let Ok(message) = frame.message() else {
        return out;
    };

    let light_state = || {
        Message::LightState(LightState {
            color: *state.color.lock(),
            power: state.power.load(Ordering::SeqCst),
            label: *state.label.lock(),
        })
    };

    match message {
        Message::GetService => out.push(Message::StateService(StateService {
            service: SERVICE_UDP,
            port: state.service_port.load(Ordering::SeqCst),
        })),
        Message::GetPower => out.push(Message::StatePower {
            level: state.power.load(Ordering::SeqCst),
        }),
        Message::SetPower { level } => {
            state.power.store(level, Ordering::SeqCst);
            if frame.header.response_required {
                out.push(Message::StatePower { level });
            }
        }
        Message::GetLabel => out.push(Message::StateLabel(*state.label.lock())),
        Message::SetLabel(label) => {
            *state.label.lock() = label;
            if frame.header.response_required {
                out.push(Message::StateLabel(label));
            }
        }
        Message::GetVersion => out.push(Message::StateVersion(StateVersion {
            vendor: 1,
            product: 27,
            version: 0,
        })),
        Message::LightGet => out.push(light_state()),
        Message::LightSetColor(set) => {
            *state.color.lock() = set.color;
            if frame.header.response_required {
                out.push(light_state());
            }
        }
        Message::EchoRequest(payload) => out.push(Message::EchoResponse(payload)),
        _ => {}
    }

    out
}
