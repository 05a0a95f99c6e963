//! Subnet key codec
//!
//! Leases are stored under a textual key derived from their subnet. Store
//! keys commonly treat `/` as a path separator, so the CIDR slash is replaced
//! with `-`, and IPv6 addresses are written fully expanded so that every
//! subnet has exactly one key:
//!
//! ```text
//! 10.244.3.0/24     ->  10.244.3.0-24
//! fc00::100/120     ->  fc00:0000:0000:0000:0000:0000:0000:0100-120
//! ```

use crate::ip;
use ipnet::IpNet;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;

/// `10.16.0.0-16`
static V4_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})-(\d{1,3})$")
        .expect("valid IPv4 key regex")
});

/// `0000:0000:0000:0000:0000:0000:0000:0000-127`
static V6_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{1,4}(?::[0-9A-Fa-f]{1,4}){7})-(\d{1,3})$")
        .expect("valid IPv6 key regex")
});

/// Encode a subnet as a store key
pub fn make_subnet_key(subnet: &IpNet) -> String {
    ip::expand_net(subnet).replacen('/', "-", 1)
}

/// Decode a store key back into a subnet
///
/// Returns `None` for anything that is not exactly a key produced by
/// [`make_subnet_key`]: missing separator, extra path segments, a
/// non-numeric or out-of-range prefix, or an invalid address.
pub fn parse_subnet_key(key: &str) -> Option<IpNet> {
    let caps = V4_KEY.captures(key).or_else(|| V6_KEY.captures(key))?;

    let addr: IpAddr = caps.get(1)?.as_str().parse().ok()?;
    let prefix_len: u8 = caps.get(2)?.as_str().parse().ok()?;

    IpNet::new(addr, prefix_len).ok()
}
