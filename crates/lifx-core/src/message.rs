//! Typed message payloads
//!
//! Only the message types the engine and its command helpers use are typed.
//! Everything else decodes as [`Message::Unknown`] with the payload passed
//! through untouched.

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Message type numbers
pub mod message_type {
    pub const GET_SERVICE: u16 = 2;
    pub const STATE_SERVICE: u16 = 3;
    pub const GET_WIFI_INFO: u16 = 16;
    pub const STATE_WIFI_INFO: u16 = 17;
    pub const GET_POWER: u16 = 20;
    pub const SET_POWER: u16 = 21;
    pub const STATE_POWER: u16 = 22;
    pub const GET_LABEL: u16 = 23;
    pub const SET_LABEL: u16 = 24;
    pub const STATE_LABEL: u16 = 25;
    pub const GET_VERSION: u16 = 32;
    pub const STATE_VERSION: u16 = 33;
    pub const GET_INFO: u16 = 34;
    pub const STATE_INFO: u16 = 35;
    pub const ACKNOWLEDGEMENT: u16 = 45;
    pub const ECHO_REQUEST: u16 = 58;
    pub const ECHO_RESPONSE: u16 = 59;
    pub const LIGHT_GET: u16 = 101;
    pub const LIGHT_SET_COLOR: u16 = 102;
    pub const LIGHT_SET_WAVEFORM: u16 = 103;
    pub const LIGHT_STATE: u16 = 107;
}

/// Label field width
pub const LABEL_SIZE: usize = 32;

/// Echo payload width
pub const ECHO_SIZE: usize = 64;

/// Expected payload length of a known message type, `None` if unknown
pub fn payload_len(message_type: u16) -> Option<usize> {
    use self::message_type::*;

    match message_type {
        GET_SERVICE | GET_WIFI_INFO | GET_POWER | GET_LABEL | GET_VERSION | GET_INFO
        | ACKNOWLEDGEMENT | LIGHT_GET => Some(0),
        STATE_SERVICE => Some(5),
        STATE_WIFI_INFO => Some(14),
        SET_POWER | STATE_POWER => Some(2),
        SET_LABEL | STATE_LABEL => Some(LABEL_SIZE),
        STATE_VERSION => Some(12),
        STATE_INFO => Some(24),
        ECHO_REQUEST | ECHO_RESPONSE => Some(ECHO_SIZE),
        LIGHT_SET_COLOR => Some(13),
        LIGHT_SET_WAVEFORM => Some(21),
        LIGHT_STATE => Some(52),
        _ => None,
    }
}

/// Hue, saturation, brightness, kelvin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hsbk {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl Hsbk {
    pub fn new(hue: u16, saturation: u16, brightness: u16, kelvin: u16) -> Self {
        Self {
            hue,
            saturation,
            brightness,
            kelvin,
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.hue);
        buf.put_u16_le(self.saturation);
        buf.put_u16_le(self.brightness);
        buf.put_u16_le(self.kelvin);
    }

    fn get(buf: &mut &[u8]) -> Self {
        Self {
            hue: buf.get_u16_le(),
            saturation: buf.get_u16_le(),
            brightness: buf.get_u16_le(),
            kelvin: buf.get_u16_le(),
        }
    }
}

/// Fixed 32 byte, NUL padded label
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label([u8; LABEL_SIZE]);

impl Label {
    /// Build a label, truncating to 32 bytes on a character boundary
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(LABEL_SIZE);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut raw = [0u8; LABEL_SIZE];
        raw[..end].copy_from_slice(&text.as_bytes()[..end]);
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; LABEL_SIZE] {
        &self.0
    }

    /// Text up to the first NUL, lossily decoded
    pub fn text(&self) -> String {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(LABEL_SIZE);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    fn get(buf: &mut &[u8]) -> Self {
        let mut raw = [0u8; LABEL_SIZE];
        buf.copy_to_slice(&mut raw);
        Self(raw)
    }
}

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Label({:?})", self.text())
    }
}

/// Waveform shapes for LightSetWaveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Waveform {
    Saw = 0,
    Sine = 1,
    HalfSine = 2,
    Triangle = 3,
    Pulse = 4,
}

impl Waveform {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Waveform::Saw),
            1 => Some(Waveform::Sine),
            2 => Some(Waveform::HalfSine),
            3 => Some(Waveform::Triangle),
            4 => Some(Waveform::Pulse),
            _ => None,
        }
    }
}

/// StateService payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateService {
    pub service: u8,
    pub port: u32,
}

/// StateWifiInfo payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateWifiInfo {
    /// Signal strength in milliwatts
    pub signal: f32,
    pub tx: u32,
    pub rx: u32,
}

/// StateVersion payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateVersion {
    pub vendor: u32,
    pub product: u32,
    pub version: u32,
}

/// StateInfo payload, all values in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInfo {
    pub time: u64,
    pub uptime: u64,
    pub downtime: u64,
}

/// LightSetColor payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightSetColor {
    pub color: Hsbk,
    /// Transition time in milliseconds
    pub duration: u32,
}

/// LightSetWaveform payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSetWaveform {
    pub transient: bool,
    pub color: Hsbk,
    /// Cycle duration in milliseconds
    pub period: u32,
    pub cycles: f32,
    pub skew_ratio: i16,
    pub waveform: Waveform,
}

/// LightState payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    pub color: Hsbk,
    pub power: u16,
    pub label: Label,
}

/// A decoded message payload
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    GetService,
    StateService(StateService),
    GetWifiInfo,
    StateWifiInfo(StateWifiInfo),
    GetPower,
    SetPower { level: u16 },
    StatePower { level: u16 },
    GetLabel,
    SetLabel(Label),
    StateLabel(Label),
    GetVersion,
    StateVersion(StateVersion),
    GetInfo,
    StateInfo(StateInfo),
    Acknowledgement,
    EchoRequest([u8; ECHO_SIZE]),
    EchoResponse([u8; ECHO_SIZE]),
    LightGet,
    LightSetColor(LightSetColor),
    LightSetWaveform(LightSetWaveform),
    LightState(LightState),
    /// Any type this crate does not model; payload passed through opaque
    Unknown { message_type: u16, payload: Bytes },
}

impl Message {
    pub fn message_type(&self) -> u16 {
        use self::message_type::*;

        match self {
            Message::GetService => GET_SERVICE,
            Message::StateService(_) => STATE_SERVICE,
            Message::GetWifiInfo => GET_WIFI_INFO,
            Message::StateWifiInfo(_) => STATE_WIFI_INFO,
            Message::GetPower => GET_POWER,
            Message::SetPower { .. } => SET_POWER,
            Message::StatePower { .. } => STATE_POWER,
            Message::GetLabel => GET_LABEL,
            Message::SetLabel(_) => SET_LABEL,
            Message::StateLabel(_) => STATE_LABEL,
            Message::GetVersion => GET_VERSION,
            Message::StateVersion(_) => STATE_VERSION,
            Message::GetInfo => GET_INFO,
            Message::StateInfo(_) => STATE_INFO,
            Message::Acknowledgement => ACKNOWLEDGEMENT,
            Message::EchoRequest(_) => ECHO_REQUEST,
            Message::EchoResponse(_) => ECHO_RESPONSE,
            Message::LightGet => LIGHT_GET,
            Message::LightSetColor(_) => LIGHT_SET_COLOR,
            Message::LightSetWaveform(_) => LIGHT_SET_WAVEFORM,
            Message::LightState(_) => LIGHT_STATE,
            Message::Unknown { message_type, .. } => *message_type,
        }
    }

    /// Serialize the payload in wire layout
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(payload_len(self.message_type()).unwrap_or(0));

        match self {
            Message::GetService
            | Message::GetWifiInfo
            | Message::GetPower
            | Message::GetLabel
            | Message::GetVersion
            | Message::GetInfo
            | Message::Acknowledgement
            | Message::LightGet => {}
            Message::StateService(s) => {
                buf.put_u8(s.service);
                buf.put_u32_le(s.port);
            }
            Message::StateWifiInfo(w) => {
                buf.put_f32_le(w.signal);
                buf.put_u32_le(w.tx);
                buf.put_u32_le(w.rx);
                buf.put_i16_le(0);
            }
            Message::SetPower { level } | Message::StatePower { level } => {
                buf.put_u16_le(*level);
            }
            Message::SetLabel(label) | Message::StateLabel(label) => {
                buf.put_slice(label.as_bytes());
            }
            Message::StateVersion(v) => {
                buf.put_u32_le(v.vendor);
                buf.put_u32_le(v.product);
                buf.put_u32_le(v.version);
            }
            Message::StateInfo(i) => {
                buf.put_u64_le(i.time);
                buf.put_u64_le(i.uptime);
                buf.put_u64_le(i.downtime);
            }
            Message::EchoRequest(data) | Message::EchoResponse(data) => {
                buf.put_slice(data);
            }
            Message::LightSetColor(c) => {
                buf.put_u8(0);
                c.color.put(&mut buf);
                buf.put_u32_le(c.duration);
            }
            Message::LightSetWaveform(w) => {
                buf.put_u8(0);
                buf.put_u8(w.transient as u8);
                w.color.put(&mut buf);
                buf.put_u32_le(w.period);
                buf.put_f32_le(w.cycles);
                buf.put_i16_le(w.skew_ratio);
                buf.put_u8(w.waveform as u8);
            }
            Message::LightState(s) => {
                s.color.put(&mut buf);
                buf.put_i16_le(0);
                buf.put_u16_le(s.power);
                buf.put_slice(s.label.as_bytes());
                buf.put_u64_le(0);
            }
            Message::Unknown { payload, .. } => return payload.clone(),
        }

        buf.freeze()
    }

    /// Parse a payload of the given type
    pub fn decode(message_type: u16, payload: &[u8]) -> Result<Self> {
        use self::message_type::*;

        if let Some(expected) = payload_len(message_type) {
            if payload.len() != expected {
                return Err(Error::malformed(format!(
                    "message type {} expects a {} byte payload, got {}",
                    message_type,
                    expected,
                    payload.len()
                )));
            }
        }

        let mut buf = payload;

        let message = match message_type {
            GET_SERVICE => Message::GetService,
            STATE_SERVICE => Message::StateService(StateService {
                service: buf.get_u8(),
                port: buf.get_u32_le(),
            }),
            GET_WIFI_INFO => Message::GetWifiInfo,
            STATE_WIFI_INFO => Message::StateWifiInfo(StateWifiInfo {
                signal: buf.get_f32_le(),
                tx: buf.get_u32_le(),
                rx: buf.get_u32_le(),
            }),
            GET_POWER => Message::GetPower,
            SET_POWER => Message::SetPower {
                level: buf.get_u16_le(),
            },
            STATE_POWER => Message::StatePower {
                level: buf.get_u16_le(),
            },
            GET_LABEL => Message::GetLabel,
            SET_LABEL => Message::SetLabel(Label::get(&mut buf)),
            STATE_LABEL => Message::StateLabel(Label::get(&mut buf)),
            GET_VERSION => Message::GetVersion,
            STATE_VERSION => Message::StateVersion(StateVersion {
                vendor: buf.get_u32_le(),
                product: buf.get_u32_le(),
                version: buf.get_u32_le(),
            }),
            GET_INFO => Message::GetInfo,
            STATE_INFO => Message::StateInfo(StateInfo {
                time: buf.get_u64_le(),
                uptime: buf.get_u64_le(),
                downtime: buf.get_u64_le(),
            }),
            ACKNOWLEDGEMENT => Message::Acknowledgement,
            ECHO_REQUEST | ECHO_RESPONSE => {
                let mut data = [0u8; ECHO_SIZE];
                buf.copy_to_slice(&mut data);
                if message_type == ECHO_REQUEST {
                    Message::EchoRequest(data)
                } else {
                    Message::EchoResponse(data)
                }
            }
            LIGHT_GET => Message::LightGet,
            LIGHT_SET_COLOR => {
                buf.advance(1);
                Message::LightSetColor(LightSetColor {
                    color: Hsbk::get(&mut buf),
                    duration: buf.get_u32_le(),
                })
            }
            LIGHT_SET_WAVEFORM => {
                buf.advance(1);
                let transient = buf.get_u8() != 0;
                let color = Hsbk::get(&mut buf);
                let period = buf.get_u32_le();
                let cycles = buf.get_f32_le();
                let skew_ratio = buf.get_i16_le();
                let raw = buf.get_u8();
                let waveform = Waveform::from_u8(raw)
                    .ok_or_else(|| Error::malformed(format!("unknown waveform {}", raw)))?;
                Message::LightSetWaveform(LightSetWaveform {
                    transient,
                    color,
                    period,
                    cycles,
                    skew_ratio,
                    waveform,
                })
            }
            LIGHT_STATE => {
                let color = Hsbk::get(&mut buf);
                buf.advance(2);
                let power = buf.get_u16_le();
                let label = Label::get(&mut buf);
                Message::LightState(LightState {
                    color,
                    power,
                    label,
                })
            }
            _ => Message::Unknown {
                message_type,
                payload: Bytes::copy_from_slice(payload),
            },
        };

        Ok(message)
    }
}
