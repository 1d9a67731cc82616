//! UDP Transport Tests (lifx-transport)
//!
//! Tests for the UDP transport implementation including:
//! - Binding, address reuse and broadcast
//! - Send/receive through the DatagramSender seam
//! - Dual-stack routing

use bytes::Bytes;
use lifx_transport::{DatagramSender, DualStackTransport, TransportEvent, UdpConfig, UdpTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

// ============================================================================
// Basic Binding Tests
// ============================================================================

#[tokio::test]
async fn test_udp_set_broadcast() {
    let transport = UdpTransport::bind(loopback())
        .await
        .expect("Bind should succeed");

    transport
        .set_broadcast(true)
        .expect("Enabling broadcast should succeed");
}

#[tokio::test]
async fn test_reusable_bind_shares_port() {
    let first = UdpTransport::bind_reusable(loopback(), UdpConfig::default())
        .await
        .expect("First reusable bind should succeed");
    let port = first.local_addr().unwrap().port();

    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let second = UdpTransport::bind_reusable(addr, UdpConfig::default()).await;

    assert!(
        second.is_ok(),
        "Second reusable bind on port {} should succeed: {:?}",
        port,
        second.err()
    );
}

// ============================================================================
// Send/Receive Tests
// ============================================================================

#[tokio::test]
async fn test_send_through_trait_object() {
    let server = UdpTransport::bind(loopback()).await.unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut receiver = server.start_receiver();

    let client: Arc<dyn DatagramSender> =
        Arc::new(UdpTransport::bind(loopback()).await.unwrap());
    client
        .send_to(Bytes::from_static(b"ping"), server_addr)
        .await
        .expect("Send should succeed");

    let (event, _) = timeout(Duration::from_secs(2), receiver.recv_from())
        .await
        .expect("Should receive within timeout")
        .expect("Channel should be open");

    match event {
        TransportEvent::Data(data) => assert_eq!(data.as_ref(), b"ping"),
        other => panic!("Expected Data event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_datagrams_arrive_in_order_on_loopback() {
    let server = UdpTransport::bind(loopback()).await.unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut receiver = server.start_receiver();
    let client = UdpTransport::bind(loopback()).await.unwrap();

    for i in 0u8..10 {
        client.send_to(&[i], server_addr).await.unwrap();
    }

    for i in 0u8..10 {
        let (event, _) = timeout(Duration::from_secs(2), receiver.recv_from())
            .await
            .expect("Should receive within timeout")
            .expect("Channel should be open");
        match event {
            TransportEvent::Data(data) => assert_eq!(data.as_ref(), &[i]),
            other => panic!("Expected Data event, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_dual_stack_routes_v4() {
    let server = UdpTransport::bind(loopback()).await.unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut receiver = server.start_receiver();

    let v4 = Arc::new(UdpTransport::bind(loopback()).await.unwrap());
    let transport = DualStackTransport::new(v4, None);

    transport
        .send_to(Bytes::from_static(b"v4"), server_addr)
        .await
        .expect("IPv4 send should succeed");

    let (event, _) = timeout(Duration::from_secs(2), receiver.recv_from())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, TransportEvent::Data(d) if d.as_ref() == b"v4"));
}
