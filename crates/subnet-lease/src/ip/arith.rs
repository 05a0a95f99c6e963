//! Integer arithmetic on IPv4 and IPv6 addresses

use super::IpFamily;
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Convert an address to its integer value
pub fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u128::from(u32::from(a)),
        IpAddr::V6(a) => u128::from(a),
    }
}

/// Convert an integer back to an address of the given family
///
/// Returns `None` if the value does not fit the family's width.
pub fn addr_from_u128(family: IpFamily, value: u128) -> Option<IpAddr> {
    match family {
        IpFamily::V4 => u32::try_from(value)
            .ok()
            .map(|v| IpAddr::V4(Ipv4Addr::from(v))),
        IpFamily::V6 => Some(IpAddr::V6(Ipv6Addr::from(value))),
    }
}

/// The address immediately after `addr`
pub fn next_ip(addr: IpAddr) -> Option<IpAddr> {
    offset_ip(addr, 1)
}

/// `addr + n`, or `None` past the end of the address space
pub fn offset_ip(addr: IpAddr, n: u128) -> Option<IpAddr> {
    addr_to_u128(addr)
        .checked_add(n)
        .and_then(|v| addr_from_u128(IpFamily::of_addr(&addr), v))
}

/// `addr - n`, or `None` before the start of the address space
pub fn offset_ip_back(addr: IpAddr, n: u128) -> Option<IpAddr> {
    addr_to_u128(addr)
        .checked_sub(n)
        .and_then(|v| addr_from_u128(IpFamily::of_addr(&addr), v))
}

/// Last address covered by a network
pub fn last_ip(net: &IpNet) -> IpAddr {
    net.broadcast()
}

/// Number of addresses in a subnet of the given prefix length
///
/// `None` when the prefix is longer than the family allows or the size does
/// not fit in 128 bits (a /0 IPv6 network).
pub fn subnet_size(family: IpFamily, prefix_len: u8) -> Option<u128> {
    let host_bits = family.bits().checked_sub(prefix_len)?;
    1u128.checked_shl(u32::from(host_bits))
}

/// Fully expanded text form of an address
///
/// IPv4 uses the dotted quad. IPv6 writes all eight groups with leading
/// zeros and never compresses with `::`.
pub fn expand_ip(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(a) => a.to_string(),
        IpAddr::V6(a) => a
            .segments()
            .iter()
            .map(|s| format!("{:04x}", s))
            .collect::<Vec<_>>()
            .join(":"),
    }
}

/// Fully expanded `address/prefix` form of a network
pub fn expand_net(net: &IpNet) -> String {
    format!("{}/{}", expand_ip(net.addr()), net.prefix_len())
}
