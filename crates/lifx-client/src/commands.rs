//! Typed request helpers
//!
//! Get commands ask for a state reply; Set commands wait for the
//! acknowledgement only. The `_rapid` setters go out once with sequence 0
//! and are not tracked.

use lifx_core::message::{
    LightSetColor, LightSetWaveform, LightState, StateInfo, StateService, StateVersion,
    StateWifiInfo, ECHO_SIZE,
};
use lifx_core::{Hsbk, Label, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::device::Device;
use crate::error::RequestError;
use crate::request::SendOptions;

type CommandResult<T> = std::result::Result<T, RequestError>;

impl Device {
    async fn query(self: &Arc<Self>, message: Message) -> CommandResult<Message> {
        let frame = self.request(&message, SendOptions::response()).await?;
        Ok(frame.message()?)
    }

    async fn command(self: &Arc<Self>, message: Message) -> CommandResult<()> {
        self.request(&message, SendOptions::ack()).await?;
        Ok(())
    }

    fn rapid(self: &Arc<Self>, message: Message) -> JoinHandle<()> {
        self.fire_and_forget(message.message_type(), message.encode_payload(), 1)
    }

    pub async fn get_service(self: &Arc<Self>) -> CommandResult<StateService> {
        match self.query(Message::GetService).await? {
            Message::StateService(state) => Ok(state),
            other => Err(RequestError::UnexpectedResponse(other.message_type())),
        }
    }

    /// Power level, 0 (off) or 65535 (on)
    pub async fn get_power(self: &Arc<Self>) -> CommandResult<u16> {
        match self.query(Message::GetPower).await? {
            Message::StatePower { level } => Ok(level),
            other => Err(RequestError::UnexpectedResponse(other.message_type())),
        }
    }

    pub async fn set_power(self: &Arc<Self>, on: bool) -> CommandResult<()> {
        self.command(Message::SetPower { level: power_level(on) }).await
    }

    pub fn set_power_rapid(self: &Arc<Self>, on: bool) -> JoinHandle<()> {
        self.rapid(Message::SetPower { level: power_level(on) })
    }

    pub async fn get_label(self: &Arc<Self>) -> CommandResult<String> {
        match self.query(Message::GetLabel).await? {
            Message::StateLabel(label) => Ok(label.text()),
            other => Err(RequestError::UnexpectedResponse(other.message_type())),
        }
    }

    /// Labels longer than 32 bytes are truncated
    pub async fn set_label(self: &Arc<Self>, label: &str) -> CommandResult<()> {
        self.command(Message::SetLabel(Label::new(label))).await
    }

    pub async fn get_version(self: &Arc<Self>) -> CommandResult<StateVersion> {
        match self.query(Message::GetVersion).await? {
            Message::StateVersion(version) => Ok(version),
            other => Err(RequestError::UnexpectedResponse(other.message_type())),
        }
    }

    pub async fn get_info(self: &Arc<Self>) -> CommandResult<StateInfo> {
        match self.query(Message::GetInfo).await? {
            Message::StateInfo(info) => Ok(info),
            other => Err(RequestError::UnexpectedResponse(other.message_type())),
        }
    }

    pub async fn get_wifi_info(self: &Arc<Self>) -> CommandResult<StateWifiInfo> {
        match self.query(Message::GetWifiInfo).await? {
            Message::StateWifiInfo(info) => Ok(info),
            other => Err(RequestError::UnexpectedResponse(other.message_type())),
        }
    }

    /// Color, power and label in one reply
    pub async fn get_color(self: &Arc<Self>) -> CommandResult<LightState> {
        match self.query(Message::LightGet).await? {
            Message::LightState(state) => Ok(state),
            other => Err(RequestError::UnexpectedResponse(other.message_type())),
        }
    }

    /// Fade to `color` over `duration` (millisecond resolution)
    pub async fn set_color(self: &Arc<Self>, color: Hsbk, duration: Duration) -> CommandResult<()> {
        self.command(Message::LightSetColor(LightSetColor {
            color,
            duration: millis(duration),
        }))
        .await
    }

    pub fn set_color_rapid(self: &Arc<Self>, color: Hsbk, duration: Duration) -> JoinHandle<()> {
        self.rapid(Message::LightSetColor(LightSetColor {
            color,
            duration: millis(duration),
        }))
    }

    pub async fn set_waveform(self: &Arc<Self>, waveform: LightSetWaveform) -> CommandResult<()> {
        self.command(Message::LightSetWaveform(waveform)).await
    }

    pub fn set_waveform_rapid(self: &Arc<Self>, waveform: LightSetWaveform) -> JoinHandle<()> {
        self.rapid(Message::LightSetWaveform(waveform))
    }

    /// Round-trip `data` (up to 64 bytes, zero padded) through the device
    pub async fn echo(self: &Arc<Self>, data: &[u8]) -> CommandResult<[u8; ECHO_SIZE]> {
        let mut payload = [0u8; ECHO_SIZE];
        let len = data.len().min(ECHO_SIZE);
        payload[..len].copy_from_slice(&data[..len]);

        match self.query(Message::EchoRequest(payload)).await? {
            Message::EchoResponse(echoed) => Ok(echoed),
            other => Err(RequestError::UnexpectedResponse(other.message_type())),
        }
    }
}

fn power_level(on: bool) -> u16 {
    if on {
        u16::MAX
    } else {
        0
    }
}

/// Saturates at `u32::MAX` milliseconds
fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
