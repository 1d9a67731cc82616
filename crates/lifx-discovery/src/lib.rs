//! LIFX Discovery
//!
//! Finds bulbs on the local segment and keeps a registry of live ones:
//! - Periodic GetService broadcasts
//! - Registration of every bulb that answers for the UDP service
//! - Demultiplexing of inbound frames to each bulb's session
//! - Eviction of bulbs that stop answering
//!
//! The embedding application is told about bulbs through a [`Registrar`].

pub mod error;
pub mod ipv6;
pub mod registrar;
pub mod service;

pub use error::{DiscoveryError, Result};
pub use ipv6::derive_ipv6;
pub use registrar::{DiscoveryEvent, FnRegistrar, Registrar};
pub use service::{DiscoveryHandle, DiscoveryService};
