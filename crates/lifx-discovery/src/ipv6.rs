//! IPv6 addresses derived from hardware addresses
//!
//! Experimental. The interface identifier is the modified EUI-64 form of the
//! hardware address (universal/local bit flipped, `ff:fe` inserted in the
//! middle). The prefix is written as the leading groups without a trailing
//! separator, e.g. `fe80:0:0:0` for a 64-bit prefix. A 48-bit prefix takes a
//! trailing colon (`fd00:1:2:`) so the result contains `::`.

use lifx_core::HardwareAddress;
use std::net::Ipv6Addr;

use crate::error::{DiscoveryError, Result};

/// Append the EUI-64 interface identifier of `hw` to `prefix`
pub fn derive_ipv6(prefix: &str, hw: HardwareAddress) -> Result<Ipv6Addr> {
    let [m0, m1, m2, m3, m4, m5] = hw.octets();

    let high2 = ((u16::from(m0) << 8) | u16::from(m1)) ^ 0x0200;
    let low2 = (u16::from(m4) << 8) | u16::from(m5);

    let text = format!("{prefix}:{high2:04x}:{m2:02x}ff:fe{m3:02x}:{low2:04x}");

    text.parse().map_err(|e| DiscoveryError::InvalidIpv6Prefix {
        prefix: prefix.to_string(),
        reason: format!("{text:?} is not an IPv6 address: {e}"),
    })
}
