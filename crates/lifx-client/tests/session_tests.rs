//! Device session tests against a fake bulb on loopback

use lifx_client::{Device, LanConfig, LanContext, RequestError, SendOptions};
use lifx_core::{message_type, Frame, HardwareAddress, Hsbk, Message};
use lifx_test_utils::{init_tracing, wait_for, wait_for_count, FakeBulb, DEFAULT_CHECK_INTERVAL};
use lifx_transport::{TransportEvent, UdpTransport};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn hw() -> HardwareAddress {
    HardwareAddress::new([0xd0, 0x73, 0xd5, 0x12, 0x34, 0x56])
}

fn fast_config() -> LanConfig {
    LanConfig::default()
        .with_retry_interval(Duration::from_millis(100))
        .with_max_retries(2)
}

struct TestSession {
    device: Arc<Device>,
    local: SocketAddr,
    pump: JoinHandle<()>,
}

impl Drop for TestSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Bind a client socket and feed everything it receives to one device
async fn connect(bulb: &FakeBulb, config: LanConfig) -> TestSession {
    let transport = Arc::new(UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
    let local = transport.local_addr().unwrap();
    let context = Arc::new(LanContext::new(transport.clone(), config));
    let device = Device::new(bulb.hardware_address(), bulb.addr(), context);

    let mut receiver = transport.start_receiver();
    let target = device.clone();
    let pump = tokio::spawn(async move {
        while let Some((event, _)) = receiver.recv_from().await {
            let TransportEvent::Data(data) = event else {
                continue;
            };
            match Frame::decode(&data) {
                Ok(frame) => target.handle_frame(frame),
                Err(e) => {
                    if let Ok(header) = Frame::peek_header(&data) {
                        target.handle_malformed(&header, e);
                    }
                }
            }
        }
    });

    TestSession {
        device,
        local,
        pump,
    }
}

// ============================================================================
// Request / Response
// ============================================================================

#[tokio::test]
async fn test_get_power_round_trip() {
    init_tracing();
    let bulb = FakeBulb::start(hw()).await.unwrap();
    let session = connect(&bulb, fast_config()).await;

    assert_eq!(session.device.get_power().await, Ok(0));
    session.device.set_power(true).await.expect("set_power should be acknowledged");
    assert_eq!(session.device.get_power().await, Ok(65535));
    assert_eq!(bulb.power(), 65535);
    assert_eq!(session.device.outstanding_count(), 0);
}

#[tokio::test]
async fn test_label_and_color() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    let session = connect(&bulb, fast_config()).await;

    session.device.set_label("Kitchen").await.unwrap();
    assert_eq!(bulb.label(), "Kitchen");
    assert_eq!(session.device.get_label().await.unwrap(), "Kitchen");

    let color = Hsbk::new(21845, 65535, 32768, 3500);
    session
        .device
        .set_color(color, Duration::from_millis(500))
        .await
        .unwrap();

    let state = session.device.get_color().await.unwrap();
    assert_eq!(state.color, color);
    assert_eq!(state.label.text(), "Kitchen");
}

#[tokio::test]
async fn test_echo_and_service() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    let session = connect(&bulb, fast_config()).await;

    let echoed = session.device.echo(b"ping").await.unwrap();
    assert_eq!(&echoed[..4], b"ping");
    assert!(echoed[4..].iter().all(|b| *b == 0));

    let service = session.device.get_service().await.unwrap();
    assert_eq!(service.service, lifx_core::SERVICE_UDP);
    assert_eq!(service.port, u32::from(bulb.addr().port()));

    let version = session.device.get_version().await.unwrap();
    assert_eq!(version.vendor, 1);
}

#[tokio::test]
async fn test_response_required_waits_past_ack() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    let session = connect(&bulb, fast_config()).await;

    // Ask for both: the ack arrives first and must not complete the request
    let opts = SendOptions {
        require_ack: true,
        response_required: true,
        ..SendOptions::default()
    };
    let frame = session
        .device
        .request(&Message::SetPower { level: 65535 }, opts)
        .await
        .unwrap();

    assert_eq!(frame.header.message_type, message_type::STATE_POWER);
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_retry_exhaustion_sends_exactly_three_times() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    bulb.set_muted(true);
    let session = connect(&bulb, fast_config()).await;

    let result = session
        .device
        .request(&Message::GetPower, SendOptions::response())
        .await;

    assert_eq!(result, Err(RequestError::NoResponse));
    assert!(
        wait_for_count(bulb.received_counter(), 3, Duration::from_secs(2)).await,
        "First send plus two resends should reach the bulb"
    );

    // Nothing more after exhaustion
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(bulb.received(), 3);

    // Resends carry the same sequence number
    let sequences: Vec<u8> = bulb.headers().iter().map(|h| h.sequence).collect();
    assert_eq!(sequences, vec![1, 1, 1]);
    assert_eq!(session.device.outstanding_count(), 0);
}

#[tokio::test]
async fn test_late_bulb_answers_a_resend() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    bulb.set_muted(true);
    let session = connect(&bulb, fast_config()).await;

    let device = session.device.clone();
    let request = tokio::spawn(async move { device.get_power().await });

    assert!(wait_for_count(bulb.received_counter(), 1, Duration::from_secs(2)).await);
    bulb.set_muted(false);

    assert_eq!(request.await.unwrap(), Ok(0));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_malformed_reply_fails_request() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    bulb.set_corrupt(true);
    let session = connect(&bulb, fast_config()).await;

    let result = session
        .device
        .request(&Message::GetPower, SendOptions::response())
        .await;

    assert!(
        matches!(result, Err(RequestError::MalformedFrame(_))),
        "Expected MalformedFrame, got {:?}",
        result
    );
}

#[tokio::test]
async fn test_evicted_device_rejects_commands() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    let session = connect(&bulb, fast_config()).await;

    assert!(session.device.evict());
    assert_eq!(
        session.device.get_power().await,
        Err(RequestError::DeviceEvicted)
    );
    assert_eq!(bulb.received(), 0);
}

// ============================================================================
// Unsolicited
// ============================================================================

#[tokio::test]
async fn test_unsolicited_push_reaches_handler() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    let session = connect(&bulb, fast_config()).await;

    let pushes = Arc::new(AtomicU32::new(0));
    let counter = pushes.clone();
    session.device.set_unsolicited_handler(move |device, frame| {
        assert_eq!(device.hardware_address(), hw());
        if frame.header.message_type == message_type::STATE_POWER {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let before = session.device.last_seen();
    tokio::time::sleep(Duration::from_millis(20)).await;

    bulb.push(&Message::StatePower { level: 65535 }, session.local)
        .await
        .unwrap();

    assert!(wait_for_count(&pushes, 1, Duration::from_secs(2)).await);
    assert!(session.device.last_seen() > before);
}

#[tokio::test]
async fn test_fire_and_forget_repeats() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    let session = connect(&bulb, fast_config()).await;

    session
        .device
        .fire_and_forget(message_type::SET_POWER, vec![0xffu8, 0xff], 3)
        .await
        .unwrap();

    assert!(
        wait_for(
            || async { bulb.received() >= 3 },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(bulb.power(), 65535);
    assert!(bulb.headers().iter().all(|h| h.sequence == 0 && !h.ack_required));
}

#[tokio::test]
async fn test_rapid_setters_go_out_once_untracked() {
    let bulb = FakeBulb::start(hw()).await.unwrap();
    let session = connect(&bulb, fast_config()).await;

    session.device.set_power_rapid(true).await.unwrap();
    let color = Hsbk::new(43690, 65535, 65535, 4000);
    session
        .device
        .set_color_rapid(color, Duration::from_millis(250))
        .await
        .unwrap();

    assert!(wait_for_count(bulb.received_counter(), 2, Duration::from_secs(2)).await);
    assert_eq!(session.device.outstanding_count(), 0);

    let state = session.device.get_color().await.unwrap();
    assert_eq!(state.power, 65535);
    assert_eq!(state.color, color);

    let headers = bulb.headers();
    assert_eq!(headers[0].message_type, message_type::SET_POWER);
    assert_eq!(headers[1].message_type, message_type::LIGHT_SET_COLOR);
    assert!(headers[..2]
        .iter()
        .all(|h| h.sequence == 0 && !h.ack_required && !h.response_required));
}
