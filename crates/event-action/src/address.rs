//! Outbound address safety check.
//!
//! Webhook targets are resolved before connecting so the check applies to
//! the address actually dialed, not just the configured name.

use std::net::Ipv4Addr;

/// Returns true if `addr` must not be used as a delivery target.
///
/// Unsafe ranges, unless `allow_private_networks` is set:
/// `0.0.0.0/8`, multicast and reserved (`224.0.0.0` and above),
/// loopback `127.0.0.0/8`, and the RFC 1918 ranges `10.0.0.0/8`,
/// `172.16.0.0/12` and `192.168.0.0/16`.
pub fn is_address_unsafe(allow_private_networks: bool, addr: Ipv4Addr) -> bool {
    if allow_private_networks {
        return false;
    }
    let [a, b, _, _] = addr.octets();
    a == 0
        || a >= 224
        || a == 127
        || a == 10
        || (a == 172 && (16..32).contains(&b))
        || (a == 192 && b == 168)
}
