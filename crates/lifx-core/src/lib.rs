//! LIFX Core
//!
//! Wire-level primitives for the LIFX LAN protocol.
//!
//! This crate provides:
//! - Binary frame encoding/decoding ([`Frame`], [`FrameHeader`])
//! - Typed message payloads ([`Message`], [`message_type`])
//! - Hardware addresses ([`HardwareAddress`])
//! - Per-device sequence numbers ([`SequenceAllocator`])

pub mod address;
pub mod error;
pub mod frame;
pub mod message;
pub mod sequence;

pub use address::HardwareAddress;
pub use error::{Error, Result};
pub use frame::{Frame, FrameHeader, HEADER_SIZE};
pub use message::{message_type, Hsbk, Label, Message, Waveform};
pub use sequence::SequenceAllocator;

/// Protocol number carried in the low 12 bits of every header
pub const PROTOCOL_NUMBER: u16 = 1024;

/// Default UDP port devices listen on
pub const DEFAULT_PORT: u16 = 56700;

/// Sequence number used for broadcasts and sends that expect nothing back
pub const NO_SEQUENCE: u8 = 0;

/// Service identifier advertised for the UDP service in StateService replies
pub const SERVICE_UDP: u8 = 1;
