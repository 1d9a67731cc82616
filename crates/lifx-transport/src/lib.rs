//! LIFX Transport Layer
//!
//! Thin UDP socket layer shared by discovery and device sessions:
//! - bind (optionally with address reuse), broadcast enable
//! - send-to through the [`DatagramSender`] seam
//! - receive-from via a spawned receive task

pub mod dual_stack;
pub mod error;
pub mod traits;
pub mod udp;

pub use dual_stack::DualStackTransport;
pub use error::{Result, TransportError};
pub use traits::{DatagramSender, TransportEvent};
pub use udp::{UdpConfig, UdpReceiver, UdpTransport};
