//! Binary frame encoding/decoding
//!
//! LIFX frame format (all fields little-endian):
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Bytes 0-1:   Size (header + payload)                            │
//! │ Bytes 2-3:   [11:0] Protocol (1024)                             │
//! │              [12]   Addressable (always 1)                      │
//! │              [13]   Tagged (1 when targeting all devices)       │
//! │              [15:14] Origin (0)                                 │
//! │ Bytes 4-7:   Source identifier                                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Bytes 8-15:  Target (6 byte hardware address + 2 zero bytes)    │
//! │ Bytes 16-21: Reserved                                           │
//! │ Byte 22:     [0] Response required  [1] Ack required           │
//! │ Byte 23:     Sequence                                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Bytes 24-31: Reserved (timestamp)                               │
//! │ Bytes 32-33: Message type                                       │
//! │ Bytes 34-35: Reserved                                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Payload (layout depends on message type)                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::message::{self, Message};
use crate::{Error, HardwareAddress, Result, NO_SEQUENCE, PROTOCOL_NUMBER};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed header size
pub const HEADER_SIZE: usize = 36;

/// Largest frame the 16-bit size field can describe
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

const PROTOCOL_MASK: u16 = 0x0fff;
const ADDRESSABLE_BIT: u16 = 0x1000;
const TAGGED_BIT: u16 = 0x2000;

const RESPONSE_REQUIRED_BIT: u8 = 0x01;
const ACK_REQUIRED_BIT: u8 = 0x02;

/// Header fields of a frame. `size` is derived from the payload and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub protocol: u16,
    pub tagged: bool,
    pub addressable: bool,
    pub source: u32,
    pub target: HardwareAddress,
    pub ack_required: bool,
    pub response_required: bool,
    pub sequence: u8,
    pub message_type: u16,
}

impl FrameHeader {
    /// Header for a broadcast of `message_type` with sequence 0
    pub fn new(message_type: u16) -> Self {
        Self {
            protocol: PROTOCOL_NUMBER,
            tagged: true,
            addressable: true,
            source: 0,
            target: HardwareAddress::BROADCAST,
            ack_required: false,
            response_required: false,
            sequence: NO_SEQUENCE,
            message_type,
        }
    }

    pub fn with_source(mut self, source: u32) -> Self {
        self.source = source;
        self
    }

    /// Set the target; `tagged` follows whether the target is the broadcast address
    pub fn with_target(mut self, target: HardwareAddress) -> Self {
        self.target = target;
        self.tagged = target.is_broadcast();
        self
    }

    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_ack_required(mut self, ack_required: bool) -> Self {
        self.ack_required = ack_required;
        self
    }

    pub fn with_response_required(mut self, response_required: bool) -> Self {
        self.response_required = response_required;
        self
    }

    pub fn with_protocol(mut self, protocol: u16) -> Self {
        self.protocol = protocol;
        self
    }
}

/// A LIFX frame: header plus type-specific payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from a header and raw payload
    pub fn new(header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Create a frame carrying `message`; the header's message type is overwritten
    pub fn with_message(mut header: FrameHeader, message: &Message) -> Self {
        header.message_type = message.message_type();
        Self {
            header,
            payload: message.encode_payload(),
        }
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Parse the payload into a typed message
    pub fn message(&self) -> Result<Message> {
        Message::decode(self.header.message_type, &self.payload)
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<Bytes> {
        let header = &self.header;

        if header.protocol > PROTOCOL_MASK {
            return Err(Error::encoding(format!(
                "protocol {} does not fit in 12 bits",
                header.protocol
            )));
        }

        let size = self.size();
        if size > MAX_FRAME_SIZE {
            return Err(Error::encoding(format!(
                "frame size {} exceeds {}",
                size, MAX_FRAME_SIZE
            )));
        }

        if let Some(expected) = message::payload_len(header.message_type) {
            if expected != self.payload.len() {
                return Err(Error::encoding(format!(
                    "message type {} expects a {} byte payload, got {}",
                    header.message_type,
                    expected,
                    self.payload.len()
                )));
            }
        }

        let mut buf = BytesMut::with_capacity(size);

        // Frame
        buf.put_u16_le(size as u16);
        let mut protocol_bits = header.protocol;
        if header.addressable {
            protocol_bits |= ADDRESSABLE_BIT;
        }
        if header.tagged {
            protocol_bits |= TAGGED_BIT;
        }
        buf.put_u16_le(protocol_bits);
        buf.put_u32_le(header.source);

        // Frame address
        buf.put_slice(&header.target.octets());
        buf.put_bytes(0, 2);
        buf.put_bytes(0, 6);
        let mut flags = 0u8;
        if header.response_required {
            flags |= RESPONSE_REQUIRED_BIT;
        }
        if header.ack_required {
            flags |= ACK_REQUIRED_BIT;
        }
        buf.put_u8(flags);
        buf.put_u8(header.sequence);

        // Protocol header
        buf.put_u64_le(0);
        buf.put_u16_le(header.message_type);
        buf.put_u16_le(0);

        buf.extend_from_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decode a complete datagram
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = Self::peek_header(buf)?;

        let declared = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        if declared != buf.len() {
            return Err(Error::malformed(format!(
                "declared size {} but datagram is {} bytes",
                declared,
                buf.len()
            )));
        }

        let payload = &buf[HEADER_SIZE..];
        if let Some(expected) = message::payload_len(header.message_type) {
            if expected != payload.len() {
                return Err(Error::malformed(format!(
                    "message type {} expects a {} byte payload, got {}",
                    header.message_type,
                    expected,
                    payload.len()
                )));
            }
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Decode only the header, without checking size or payload.
    ///
    /// Used to attribute a malformed datagram to the request it answers.
    pub fn peek_header(buf: &[u8]) -> Result<FrameHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::malformed(format!(
                "need {} header bytes, have {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let mut cur = &buf[..HEADER_SIZE];

        let _size = cur.get_u16_le();
        let protocol_bits = cur.get_u16_le();
        let source = cur.get_u32_le();

        let mut target = [0u8; 6];
        cur.copy_to_slice(&mut target);
        cur.advance(2);
        cur.advance(6);
        let flags = cur.get_u8();
        let sequence = cur.get_u8();

        cur.advance(8);
        let message_type = cur.get_u16_le();

        Ok(FrameHeader {
            protocol: protocol_bits & PROTOCOL_MASK,
            tagged: protocol_bits & TAGGED_BIT != 0,
            addressable: protocol_bits & ADDRESSABLE_BIT != 0,
            source,
            target: HardwareAddress::new(target),
            ack_required: flags & ACK_REQUIRED_BIT != 0,
            response_required: flags & RESPONSE_REQUIRED_BIT != 0,
            sequence,
            message_type,
        })
    }
}
