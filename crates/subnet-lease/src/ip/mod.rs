//! Address arithmetic over fixed-width IP addresses
//!
//! Every address is handled as an unsigned integer of its family's width.
//! IPv6 needs the full 128 bits, so all arithmetic is done on `u128` with
//! checked operations: a result that would leave the family's address space
//! is reported as `None` instead of wrapping.

mod arith;
mod family;

pub use arith::{
    addr_from_u128, addr_to_u128, expand_ip, expand_net, last_ip, next_ip, offset_ip,
    offset_ip_back, subnet_size,
};
pub use family::IpFamily;
