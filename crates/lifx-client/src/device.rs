//! Device sessions
//!
//! A [`Device`] is the unicast conversation with one bulb. It owns the
//! bulb's sequence numbers and the table of requests still waiting for an
//! answer. Each pending request has its own retry timer task; the timer only
//! touches the entry it was spawned for (matched by request id), so a request
//! that was answered, cancelled or drained by eviction is never retried or
//! reported twice.
//!
//! Callbacks always run with the session lock released.

use bytes::Bytes;
use lifx_core::{
    message_type, Frame, FrameHeader, HardwareAddress, Message, SequenceAllocator, NO_SEQUENCE,
};
use lifx_transport::DatagramSender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::context::LanContext;
use crate::error::RequestError;
use crate::request::{Callback, PendingRequest, RequestResult, SendOptions};

/// Gap between repeats of a fire-and-forget frame. Bulbs drop traffic above
/// roughly 20 messages per second.
pub const FIRE_AND_FORGET_SPACING: Duration = Duration::from_millis(50);

/// Handler for frames that answer no pending request
pub type UnsolicitedHandler = Arc<dyn Fn(&Arc<Device>, &Frame) + Send + Sync>;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Registered, nothing heard since
    Discovered,
    /// Heard from within the last probe interval
    Active,
    /// Silent for more than one probe interval
    Stale,
    /// Removed; terminal
    Evicted,
}

/// Result of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Stale,
    /// Past the liveness timeout; the device should be evicted
    Expired,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub hardware_address: HardwareAddress,
    pub network_address: SocketAddr,
    pub state: DeviceState,
    pub outstanding: usize,
    pub silent_for: Duration,
}

struct Session {
    network_address: SocketAddr,
    last_seen: Instant,
    state: DeviceState,
    outstanding: HashMap<u8, PendingRequest>,
    sequence: SequenceAllocator,
    send_failures: u32,
    /// Released on eviction
    sender: Option<Arc<dyn DatagramSender>>,
    unsolicited: Option<UnsolicitedHandler>,
}

/// A frame ready to go out, produced under the lock and sent without it
struct Outgoing {
    sequence: u8,
    request_id: Option<u64>,
    encoded: Bytes,
    target: SocketAddr,
    sender: Arc<dyn DatagramSender>,
    /// Kept only for untracked sends, so a transport failure can still be reported
    callback: Option<Callback>,
}

enum RetryStep {
    Resend(Arc<dyn DatagramSender>, Bytes, SocketAddr),
    Exhausted(PendingRequest),
    Stop,
}

/// Session with a single bulb
pub struct Device {
    hardware_address: HardwareAddress,
    context: Arc<LanContext>,
    session: Mutex<Session>,
    next_request_id: AtomicU64,
}

impl Device {
    pub fn new(
        hardware_address: HardwareAddress,
        network_address: SocketAddr,
        context: Arc<LanContext>,
    ) -> Arc<Self> {
        let sender = Arc::clone(context.transport());

        Arc::new(Self {
            hardware_address,
            context,
            session: Mutex::new(Session {
                network_address,
                last_seen: Instant::now(),
                state: DeviceState::Discovered,
                outstanding: HashMap::new(),
                sequence: SequenceAllocator::new(),
                send_failures: 0,
                sender: Some(sender),
                unsolicited: None,
            }),
            next_request_id: AtomicU64::new(1),
        })
    }

    pub fn hardware_address(&self) -> HardwareAddress {
        self.hardware_address
    }

    pub fn network_address(&self) -> SocketAddr {
        self.session.lock().network_address
    }

    pub fn context(&self) -> &Arc<LanContext> {
        &self.context
    }

    pub fn state(&self) -> DeviceState {
        self.session.lock().state
    }

    pub fn last_seen(&self) -> Instant {
        self.session.lock().last_seen
    }

    pub fn is_evicted(&self) -> bool {
        self.state() == DeviceState::Evicted
    }

    /// Number of requests waiting for an answer
    pub fn outstanding_count(&self) -> usize {
        self.session.lock().outstanding.len()
    }

    /// Sequence numbers of the requests waiting for an answer, ascending
    pub fn outstanding_sequences(&self) -> Vec<u8> {
        let mut sequences: Vec<u8> = self.session.lock().outstanding.keys().copied().collect();
        sequences.sort_unstable();
        sequences
    }

    pub fn send_failures(&self) -> u32 {
        self.session.lock().send_failures
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let session = self.session.lock();
        DeviceSnapshot {
            hardware_address: self.hardware_address,
            network_address: session.network_address,
            state: session.state,
            outstanding: session.outstanding.len(),
            silent_for: session.last_seen.elapsed(),
        }
    }

    /// Install the handler for frames that answer no pending request
    pub fn set_unsolicited_handler<F>(&self, handler: F)
    where
        F: Fn(&Arc<Device>, &Frame) + Send + Sync + 'static,
    {
        self.session.lock().unsolicited = Some(Arc::new(handler));
    }

    pub fn clear_unsolicited_handler(&self) {
        self.session.lock().unsolicited = None;
    }

    /// Record traffic from the device at `address`. Returns true when the
    /// address changed.
    pub fn refresh_address(&self, address: SocketAddr) -> bool {
        let mut session = self.session.lock();
        Self::note_traffic(&mut session);

        if session.network_address == address {
            return false;
        }
        info!(
            "Device {} moved from {} to {}",
            self.hardware_address, session.network_address, address
        );
        session.network_address = address;
        true
    }

    fn note_traffic(session: &mut Session) {
        session.last_seen = Instant::now();
        session.send_failures = 0;
        if session.state != DeviceState::Evicted {
            session.state = DeviceState::Active;
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send `payload` as a `message_type` frame to this device.
    ///
    /// `callback` receives the matching acknowledgement or reply, or the
    /// reason none will arrive. For `no_response_expected` sends it is only
    /// called if the frame could not be sent at all.
    pub async fn send<F>(
        self: &Arc<Self>,
        message_type: u16,
        payload: impl Into<Bytes>,
        callback: F,
        opts: SendOptions,
    ) where
        F: FnOnce(&Arc<Device>, RequestResult) + Send + 'static,
    {
        let outgoing = match self.enqueue(message_type, payload.into(), Box::new(callback), &opts)
        {
            Ok(outgoing) => outgoing,
            Err((callback, error)) => {
                debug!(
                    "Send of type {} to {} rejected: {}",
                    message_type, self.hardware_address, error
                );
                callback(self, Err(error));
                return;
            }
        };

        self.transmit(outgoing).await;
    }

    /// Send a typed message
    pub async fn send_message<F>(self: &Arc<Self>, message: &Message, callback: F, opts: SendOptions)
    where
        F: FnOnce(&Arc<Device>, RequestResult) + Send + 'static,
    {
        self.send(message.message_type(), message.encode_payload(), callback, opts)
            .await;
    }

    /// Send `message` and wait for its acknowledgement or reply.
    ///
    /// `no_response_expected` is ignored; a cancelled request resolves to
    /// [`RequestError::Cancelled`].
    pub async fn request(self: &Arc<Self>, message: &Message, opts: SendOptions) -> RequestResult {
        let (tx, rx) = oneshot::channel();
        let opts = SendOptions {
            no_response_expected: false,
            ..opts
        };

        self.send_message(
            message,
            move |_, result| {
                let _ = tx.send(result);
            },
            opts,
        )
        .await;

        rx.await.unwrap_or(Err(RequestError::Cancelled))
    }

    /// Send the same sequence-0 frame `repeats` times, 50 ms apart.
    ///
    /// Nothing is tracked; failures are only logged.
    pub fn fire_and_forget(
        self: &Arc<Self>,
        message_type: u16,
        payload: impl Into<Bytes>,
        repeats: usize,
    ) -> JoinHandle<()> {
        let device = Arc::clone(self);
        let payload = payload.into();

        tokio::spawn(async move {
            for attempt in 0..repeats.max(1) {
                if attempt > 0 {
                    tokio::time::sleep(FIRE_AND_FORGET_SPACING).await;
                }
                device
                    .send(
                        message_type,
                        payload.clone(),
                        |device: &Arc<Device>, result: RequestResult| {
                            if let Err(e) = result {
                                warn!(
                                    "Fire-and-forget to {} failed: {}",
                                    device.hardware_address(),
                                    e
                                );
                            }
                        },
                        SendOptions::fire_and_forget(),
                    )
                    .await;
            }
        })
    }

    /// Drop a pending request without invoking its callback. Returns false if
    /// nothing was pending under `sequence`.
    pub fn cancel(&self, sequence: u8) -> bool {
        let removed = self.session.lock().outstanding.remove(&sequence);
        match removed {
            Some(mut pending) => {
                pending.cancel_timer();
                debug!("Cancelled seq {} to {}", sequence, self.hardware_address);
                true
            }
            None => false,
        }
    }

    fn enqueue(
        self: &Arc<Self>,
        message_type: u16,
        payload: Bytes,
        callback: Callback,
        opts: &SendOptions,
    ) -> std::result::Result<Outgoing, (Callback, RequestError)> {
        let config = self.context.config();
        let mut guard = self.session.lock();
        let session = &mut *guard;

        if session.state == DeviceState::Evicted {
            return Err((callback, RequestError::DeviceEvicted));
        }
        let Some(sender) = session.sender.clone() else {
            return Err((callback, RequestError::DeviceEvicted));
        };

        let tracked = !opts.no_response_expected;
        let sequence = if tracked {
            let outstanding = &session.outstanding;
            match session.sequence.next(|seq| outstanding.contains_key(&seq)) {
                Ok(seq) => seq,
                Err(e) => return Err((callback, e.into())),
            }
        } else {
            NO_SEQUENCE
        };

        let header = FrameHeader::new(message_type)
            .with_source(self.context.source_id())
            .with_target(self.hardware_address)
            .with_sequence(sequence)
            .with_ack_required(tracked && opts.require_ack)
            .with_response_required(tracked && opts.response_required);

        let encoded = match Frame::new(header, payload).encode() {
            Ok(encoded) => encoded,
            Err(e) => return Err((callback, e.into())),
        };

        let target = session.network_address;

        if !tracked {
            return Ok(Outgoing {
                sequence,
                request_id: None,
                encoded,
                target,
                sender,
                callback: Some(callback),
            });
        }

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let timer = self.spawn_retry_timer(sequence, id, opts.interval(config));

        session.outstanding.insert(
            sequence,
            PendingRequest {
                id,
                sent_at: Instant::now(),
                retries_remaining: opts.retries(config),
                response_required: opts.response_required,
                encoded: encoded.clone(),
                callback,
                timer: Some(timer),
            },
        );

        Ok(Outgoing {
            sequence,
            request_id: Some(id),
            encoded,
            target,
            sender,
            callback: None,
        })
    }

    async fn transmit(self: &Arc<Self>, outgoing: Outgoing) {
        let Outgoing {
            sequence,
            request_id,
            encoded,
            target,
            sender,
            callback,
        } = outgoing;

        match sender.send_to(encoded, target).await {
            Ok(()) => {
                trace!("Sent seq {} to {} ({})", sequence, self.hardware_address, target);
                let mut session = self.session.lock();
                session.last_seen = Instant::now();
                if session.state != DeviceState::Evicted {
                    session.state = DeviceState::Active;
                }
            }
            Err(e) => {
                warn!(
                    "Send to {} ({}) failed: {}",
                    self.hardware_address, target, e
                );
                self.record_send_failure();

                // Tracked requests stay pending; the retry timer resends them
                if let Some(callback) = callback {
                    callback(self, Err(e.into()));
                } else if let Some(id) = request_id {
                    debug!(
                        "Seq {} (request {}) to {} left for retry",
                        sequence, id, self.hardware_address
                    );
                }
            }
        }
    }

    fn record_send_failure(&self) {
        self.session.lock().send_failures += 1;
    }

    // ========================================================================
    // Retries
    // ========================================================================

    fn spawn_retry_timer(self: &Arc<Self>, sequence: u8, id: u64, interval: Duration) -> AbortHandle {
        let weak = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(device) = weak.upgrade() else {
                    break;
                };
                if !device.on_retry_timer(sequence, id).await {
                    break;
                }
            }
        })
        .abort_handle()
    }

    /// Returns true while the request stays pending
    async fn on_retry_timer(self: &Arc<Self>, sequence: u8, id: u64) -> bool {
        let step = {
            let mut guard = self.session.lock();
            let session = &mut *guard;

            match session.outstanding.get_mut(&sequence) {
                Some(pending) if pending.id == id => {
                    if pending.retries_remaining > 0 {
                        pending.retries_remaining -= 1;
                        debug!(
                            "Resending seq {} to {} ({} retries left)",
                            sequence, self.hardware_address, pending.retries_remaining
                        );
                        match session.sender.clone() {
                            Some(sender) => RetryStep::Resend(
                                sender,
                                pending.encoded.clone(),
                                session.network_address,
                            ),
                            None => RetryStep::Stop,
                        }
                    } else {
                        match session.outstanding.remove(&sequence) {
                            Some(pending) => RetryStep::Exhausted(pending),
                            None => RetryStep::Stop,
                        }
                    }
                }
                _ => RetryStep::Stop,
            }
        };

        match step {
            RetryStep::Resend(sender, encoded, target) => {
                if let Err(e) = sender.send_to(encoded, target).await {
                    warn!("Resend to {} ({}) failed: {}", self.hardware_address, target, e);
                    self.record_send_failure();
                }
                true
            }
            RetryStep::Exhausted(pending) => {
                debug!(
                    "No response from {} to seq {} after {:?}",
                    self.hardware_address,
                    sequence,
                    pending.sent_at.elapsed()
                );
                (pending.callback)(self, Err(RequestError::NoResponse));
                false
            }
            RetryStep::Stop => false,
        }
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Deliver a frame received from this device.
    ///
    /// A frame carrying this engine's source id and the sequence of a pending
    /// request completes it; an Acknowledgement is absorbed instead when the
    /// request asked for a reply. Everything else goes to the unsolicited
    /// handler.
    pub fn handle_frame(self: &Arc<Self>, frame: Frame) {
        let header = frame.header;

        let (completed, handler) = {
            let mut guard = self.session.lock();
            let session = &mut *guard;

            Self::note_traffic(session);

            let ours = header.source == self.context.source_id() && header.sequence != NO_SEQUENCE;
            match session.outstanding.get(&header.sequence) {
                Some(pending)
                    if ours
                        && pending.response_required
                        && header.message_type == message_type::ACKNOWLEDGEMENT =>
                {
                    trace!(
                        "Ack for seq {} from {} absorbed, waiting for reply",
                        header.sequence,
                        self.hardware_address
                    );
                    return;
                }
                Some(_) if ours => {
                    let pending = session.outstanding.remove(&header.sequence);
                    (pending, None)
                }
                _ => (None, session.unsolicited.clone()),
            }
        };

        if let Some(mut pending) = completed {
            pending.cancel_timer();
            trace!(
                "Seq {} to {} answered by type {} after {:?}",
                header.sequence,
                self.hardware_address,
                header.message_type,
                pending.sent_at.elapsed()
            );
            (pending.callback)(self, Ok(frame));
            return;
        }

        match handler {
            Some(handler) => handler(self, &frame),
            None => trace!(
                "Unsolicited type {} from {} dropped",
                header.message_type,
                self.hardware_address
            ),
        }
    }

    /// Attribute an undecodable datagram to the pending request named in its
    /// header. Returns true if a request was failed.
    pub fn handle_malformed(self: &Arc<Self>, header: &FrameHeader, error: lifx_core::Error) -> bool {
        let pending = {
            let mut session = self.session.lock();
            Self::note_traffic(&mut session);

            if header.source != self.context.source_id() || header.sequence == NO_SEQUENCE {
                None
            } else {
                session.outstanding.remove(&header.sequence)
            }
        };

        match pending {
            Some(mut pending) => {
                pending.cancel_timer();
                (pending.callback)(self, Err(error.into()));
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Classify the device's silence at `now`, marking it stale when it has
    /// missed a probe interval. Transport failures shorten the timeout.
    pub fn check_liveness(&self, now: Instant) -> Liveness {
        let config = self.context.config();
        let mut session = self.session.lock();

        if session.state == DeviceState::Evicted {
            return Liveness::Expired;
        }

        let silent = now.saturating_duration_since(session.last_seen);
        let timeout = config.liveness_timeout / session.send_failures.saturating_add(1);

        if silent > timeout {
            Liveness::Expired
        } else if silent > config.probe_interval {
            if session.state != DeviceState::Stale {
                debug!("Device {} silent for {:?}", self.hardware_address, silent);
                session.state = DeviceState::Stale;
            }
            Liveness::Stale
        } else {
            Liveness::Alive
        }
    }

    /// Fail every pending request with `DeviceEvicted`, then release the send
    /// path. Returns false if the device was already evicted.
    pub fn evict(self: &Arc<Self>) -> bool {
        let drained = {
            let mut session = self.session.lock();
            if session.state == DeviceState::Evicted {
                return false;
            }
            session.state = DeviceState::Evicted;

            let mut drained: Vec<PendingRequest> =
                session.outstanding.drain().map(|(_, pending)| pending).collect();
            drained.sort_by_key(|pending| pending.id);
            drained
        };

        info!(
            "Evicting device {} ({} pending)",
            self.hardware_address,
            drained.len()
        );

        for mut pending in drained {
            pending.cancel_timer();
            (pending.callback)(self, Err(RequestError::DeviceEvicted));
        }

        self.session.lock().sender = None;
        true
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.session.lock();
        f.debug_struct("Device")
            .field("hardware_address", &self.hardware_address)
            .field("network_address", &session.network_address)
            .field("state", &session.state)
            .field("outstanding", &session.outstanding.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanConfig;
    use async_trait::async_trait;
    use lifx_transport::{Result as TransportResult, TransportError};
    use std::sync::atomic::AtomicUsize;

    /// Records datagrams instead of sending them
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Bytes, SocketAddr)>>,
        fail: std::sync::atomic::AtomicBool,
        /// Fail this many sends before succeeding again
        fail_next: AtomicUsize,
    }

    #[async_trait]
    impl DatagramSender for Recorder {
        async fn send_to(&self, data: Bytes, target: SocketAddr) -> TransportResult<()> {
            let failing = self.fail.load(Ordering::SeqCst)
                || self
                    .fail_next
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if failing {
                return Err(TransportError::SendFailed("unreachable".into()));
            }
            self.sent.lock().push((data, target));
            Ok(())
        }
    }

    const SOURCE: u32 = 0x1234_5678;

    fn hw() -> HardwareAddress {
        HardwareAddress::new([0xd0, 0x73, 0xd5, 0x12, 0x34, 0x56])
    }

    fn addr() -> SocketAddr {
        "192.168.1.40:56700".parse().unwrap()
    }

    fn device_with(recorder: Arc<Recorder>, config: LanConfig) -> Arc<Device> {
        let context = LanContext::new(recorder, config.with_source_id(SOURCE));
        Device::new(hw(), addr(), Arc::new(context))
    }

    fn slow_retries() -> LanConfig {
        LanConfig::default().with_retry_interval(Duration::from_secs(60))
    }

    fn reply(sequence: u8, message: &Message) -> Frame {
        Frame::with_message(
            FrameHeader::new(0)
                .with_source(SOURCE)
                .with_target(hw())
                .with_sequence(sequence),
            message,
        )
    }

    #[tokio::test]
    async fn test_send_stamps_header() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder.clone(), slow_retries());

        device
            .send(message_type::GET_POWER, Bytes::new(), |_, _| {}, SendOptions::response())
            .await;

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, addr());

        let frame = Frame::decode(&sent[0].0).unwrap();
        assert_eq!(frame.header.source, SOURCE);
        assert_eq!(frame.header.target, hw());
        assert!(!frame.header.tagged);
        assert!(frame.header.response_required);
        assert!(!frame.header.ack_required);
        assert_eq!(frame.header.sequence, 1);
        assert_eq!(device.outstanding_sequences(), vec![1]);
    }

    #[tokio::test]
    async fn test_sequences_unique_while_outstanding() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        for _ in 0..10 {
            device
                .send(message_type::GET_POWER, Bytes::new(), |_, _| {}, SendOptions::ack())
                .await;
        }

        assert_eq!(device.outstanding_sequences(), (1..=10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_sequence_exhaustion_reaches_callback() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        for _ in 0..255 {
            device
                .send(message_type::GET_POWER, Bytes::new(), |_, _| {}, SendOptions::ack())
                .await;
        }

        let result = device
            .request(&Message::GetPower, SendOptions::response())
            .await;
        assert_eq!(result, Err(RequestError::SequenceExhausted));
    }

    #[tokio::test]
    async fn test_encoding_error_reaches_callback() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder.clone(), slow_retries());

        let (tx, rx) = oneshot::channel();
        device
            .send(
                message_type::SET_POWER,
                vec![1u8, 2, 3],
                move |_, result| {
                    let _ = tx.send(result);
                },
                SendOptions::ack(),
            )
            .await;

        assert!(matches!(rx.await.unwrap(), Err(RequestError::Encoding(_))));
        assert!(recorder.sent.lock().is_empty());
        assert_eq!(device.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn test_matching_response_completes_request() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        let (tx, rx) = oneshot::channel();
        device
            .send_message(
                &Message::GetPower,
                move |_, result| {
                    let _ = tx.send(result);
                },
                SendOptions::response(),
            )
            .await;

        device.handle_frame(reply(1, &Message::StatePower { level: 65535 }));

        let frame = rx.await.unwrap().unwrap();
        assert_eq!(frame.message().unwrap(), Message::StatePower { level: 65535 });
        assert_eq!(device.outstanding_count(), 0);
        assert_eq!(device.state(), DeviceState::Active);
    }

    #[tokio::test]
    async fn test_ack_absorbed_when_response_required() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        device
            .send_message(
                &Message::GetPower,
                move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                SendOptions::response(),
            )
            .await;

        device.handle_frame(reply(1, &Message::Acknowledgement));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(device.outstanding_count(), 1);

        device.handle_frame(reply(1, &Message::StatePower { level: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(device.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn test_foreign_source_is_unsolicited() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        let pushes = Arc::new(AtomicUsize::new(0));
        let counter = pushes.clone();
        device.set_unsolicited_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        device
            .send_message(&Message::GetPower, |_, _| {}, SendOptions::response())
            .await;

        let mut frame = reply(1, &Message::StatePower { level: 0 });
        frame.header.source = SOURCE + 1;
        device.handle_frame(frame);

        assert_eq!(pushes.load(Ordering::SeqCst), 1);
        assert_eq!(device.outstanding_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_never_invokes_callback() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        let request = {
            let device = device.clone();
            tokio::spawn(async move { device.request(&Message::GetLabel, SendOptions::response()).await })
        };

        while device.outstanding_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(device.cancel(1));
        assert!(!device.cancel(1));

        assert_eq!(request.await.unwrap(), Err(RequestError::Cancelled));
    }

    #[tokio::test]
    async fn test_fire_and_forget_uses_sequence_zero() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder.clone(), slow_retries());

        device
            .fire_and_forget(message_type::SET_POWER, vec![0xffu8, 0xff], 3)
            .await
            .unwrap();

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 3);
        for (data, _) in sent.iter() {
            let frame = Frame::decode(data).unwrap();
            assert_eq!(frame.header.sequence, NO_SEQUENCE);
            assert!(!frame.header.ack_required);
        }
        assert_eq!(device.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_first_send_is_retried() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail_next.store(1, Ordering::SeqCst);
        let config = LanConfig::default().with_retry_interval(Duration::from_millis(20));
        let device = device_with(recorder.clone(), config);

        let request = {
            let device = device.clone();
            tokio::spawn(async move { device.request(&Message::GetPower, SendOptions::response()).await })
        };

        while recorder.sent.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(device.send_failures(), 1);
        assert_eq!(device.outstanding_sequences(), vec![1]);

        let resent = Frame::decode(&recorder.sent.lock()[0].0).unwrap();
        assert_eq!(resent.header.sequence, 1);

        device.handle_frame(reply(1, &Message::StatePower { level: 65535 }));

        let frame = request.await.unwrap().unwrap();
        assert_eq!(frame.message().unwrap(), Message::StatePower { level: 65535 });
        assert_eq!(device.send_failures(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_device_runs_out_of_retries() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail.store(true, Ordering::SeqCst);
        let config = LanConfig::default()
            .with_retry_interval(Duration::from_millis(10))
            .with_max_retries(1);
        let device = device_with(recorder, config);

        let result = device.request(&Message::GetPower, SendOptions::response()).await;

        assert_eq!(result, Err(RequestError::NoResponse));
        assert_eq!(device.outstanding_count(), 0);
        assert_eq!(device.send_failures(), 2);
    }

    #[tokio::test]
    async fn test_untracked_transport_failure_reaches_callback() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail.store(true, Ordering::SeqCst);
        let device = device_with(recorder, slow_retries());

        let (tx, rx) = oneshot::channel();
        device
            .send(
                message_type::SET_POWER,
                vec![0xffu8, 0xff],
                move |_, result| {
                    let _ = tx.send(result);
                },
                SendOptions::fire_and_forget(),
            )
            .await;

        assert!(matches!(rx.await.unwrap(), Err(RequestError::Transport(_))));
        assert_eq!(device.send_failures(), 1);
    }

    #[tokio::test]
    async fn test_successful_send_revives_stale_device() {
        let recorder = Arc::new(Recorder::default());
        let config = slow_retries()
            .with_probe_interval(Duration::from_secs(10))
            .with_liveness_timeout(Duration::from_secs(30));
        let device = device_with(recorder, config);

        let later = device.last_seen() + Duration::from_secs(20);
        assert_eq!(device.check_liveness(later), Liveness::Stale);
        assert_eq!(device.state(), DeviceState::Stale);

        device
            .send(message_type::GET_POWER, Bytes::new(), |_, _| {}, SendOptions::fire_and_forget())
            .await;

        assert_eq!(device.state(), DeviceState::Active);
        assert_eq!(device.check_liveness(Instant::now()), Liveness::Alive);
    }

    #[tokio::test]
    async fn test_cleared_handler_drops_unsolicited() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        let pushes = Arc::new(AtomicUsize::new(0));
        let counter = pushes.clone();
        device.set_unsolicited_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        device.handle_frame(reply(7, &Message::StatePower { level: 0 }));
        assert_eq!(pushes.load(Ordering::SeqCst), 1);

        device.clear_unsolicited_handler();
        device.handle_frame(reply(7, &Message::StatePower { level: 0 }));
        assert_eq!(pushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_failures_shorten_liveness() {
        let recorder = Arc::new(Recorder::default());
        let config = slow_retries()
            .with_probe_interval(Duration::from_secs(10))
            .with_liveness_timeout(Duration::from_secs(30));
        let device = device_with(recorder.clone(), config);

        let later = device.last_seen() + Duration::from_secs(20);
        assert_eq!(device.check_liveness(later), Liveness::Stale);
        assert_eq!(device.state(), DeviceState::Stale);

        recorder.fail.store(true, Ordering::SeqCst);
        device
            .send(message_type::GET_POWER, Bytes::new(), |_, _| {}, SendOptions::fire_and_forget())
            .await;

        // 30s / (1 + 1) = 15s
        assert_eq!(device.check_liveness(later), Liveness::Expired);
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        let json = serde_json::to_value(device.snapshot()).unwrap();
        assert_eq!(json["hardware_address"], "d0:73:d5:12:34:56");
        assert_eq!(json["network_address"], "192.168.1.40:56700");
        assert_eq!(json["state"], "discovered");
        assert_eq!(json["outstanding"], 0);
    }

    #[tokio::test]
    async fn test_evict_fails_pending_then_rejects_sends() {
        let recorder = Arc::new(Recorder::default());
        let device = device_with(recorder, slow_retries());

        let pending = {
            let device = device.clone();
            tokio::spawn(async move { device.request(&Message::GetPower, SendOptions::response()).await })
        };
        while device.outstanding_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(device.evict());
        assert!(!device.evict());
        assert_eq!(pending.await.unwrap(), Err(RequestError::DeviceEvicted));

        let after = device.request(&Message::GetPower, SendOptions::response()).await;
        assert_eq!(after, Err(RequestError::DeviceEvicted));
        assert_eq!(device.check_liveness(Instant::now()), Liveness::Expired);
    }
}
