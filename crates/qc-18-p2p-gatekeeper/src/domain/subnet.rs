//! Subnet grouping for subnet-flood protection.
//!
//! SECURITY-CRITICAL: many connections from one network prefix are treated as
//! a single actor. IPv4 groups by /24, IPv6 by /48. IPv4-mapped IPv6
//! addresses are folded back to IPv4 so dual-stack listeners cannot be used
//! to dodge the limit.

use std::fmt;
use std::net::IpAddr;

/// Network prefix key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubnetKey {
    /// First three IPv4 octets (/24)
    V4([u8; 3]),
    /// First six IPv6 octets (/48)
    V6([u8; 6]),
}

impl SubnetKey {
    /// Extract the subnet key of an address
    pub fn from_ip(ip: &IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                SubnetKey::V4([o[0], o[1], o[2]])
            }
            IpAddr::V6(v6) => {
                let o = v6.octets();
                SubnetKey::V6([o[0], o[1], o[2], o[3], o[4], o[5]])
            }
        }
    }

    /// Whether `ip` falls inside this subnet
    pub fn contains(&self, ip: &IpAddr) -> bool {
        SubnetKey::from_ip(ip) == *self
    }
}

impl fmt::Display for SubnetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetKey::V4([a, b, c]) => write!(f, "{}.{}.{}.0/24", a, b, c),
            SubnetKey::V6(o) => write!(
                f,
                "{:x}:{:x}:{:x}::/48",
                u16::from_be_bytes([o[0], o[1]]),
                u16::from_be_bytes([o[2], o[3]]),
                u16::from_be_bytes([o[4], o[5]])
            ),
        }
    }
}
