//! LIFX Client
//!
//! Unicast sessions with individual devices. A [`Device`] allocates sequence
//! numbers, tracks pending requests, resends on timeout and hands each
//! correlated response to the callback that asked for it.
//!
//! Devices are normally created by the discovery service; they share the
//! [`LanContext`] (transport, configuration, source id) it owns.

pub mod commands;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod request;

pub use config::LanConfig;
pub use context::LanContext;
pub use device::{Device, DeviceSnapshot, DeviceState, Liveness, UnsolicitedHandler};
pub use error::{ClientError, RequestError, Result};
pub use request::{RequestResult, SendOptions};
