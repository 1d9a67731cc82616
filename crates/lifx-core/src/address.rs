//! Device hardware addresses
//!
//! Every bulb is keyed by its 6-byte hardware (MAC) address. On the wire the
//! address fills the first six bytes of the 8-byte target field; an all-zero
//! target addresses every device on the segment.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 6-byte device hardware address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddress([u8; 6]);

impl HardwareAddress {
    /// The all-zero address used as target for broadcasts
    pub const BROADCAST: Self = Self([0; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for HardwareAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for HardwareAddress {
    type Err = Error;

    /// Parse `d0:73:d5:12:34:56` (also `-` separated)
    fn from_str(s: &str) -> Result<Self> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);

        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::InvalidHardwareAddress(s.to_string()))?;
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::InvalidHardwareAddress(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidHardwareAddress(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(Error::InvalidHardwareAddress(s.to_string()));
        }

        Ok(Self(octets))
    }
}

impl Serialize for HardwareAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
