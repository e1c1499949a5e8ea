//! Network addresses as fixed-size, alen-qualified buffers.
//!
//! Mirrors the original's `npf_addr_t` convention: the buffer is always 16
//! bytes wide, but only the first `alen` bytes (4 or 16) are meaningful. The
//! `alen` is carried alongside the address everywhere it is stored, never
//! inferred from the bytes themselves.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const ALEN_INET: u8 = 4;
pub const ALEN_INET6: u8 = 16;

/// A 16-byte address buffer, valid up to `alen` bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Addr(pub [u8; 16]);

impl Addr {
    pub const ZERO: Addr = Addr([0u8; 16]);

    pub fn from_ipv4(ip: Ipv4Addr) -> Self {
        let mut buf = [0u8; 16];
        buf[..4].copy_from_slice(&ip.octets());
        Addr(buf)
    }

    pub fn from_ipv6(ip: Ipv6Addr) -> Self {
        Addr(ip.octets())
    }

    pub fn from_ip(ip: IpAddr) -> (Self, u8) {
        match ip {
            IpAddr::V4(v4) => (Self::from_ipv4(v4), ALEN_INET),
            IpAddr::V6(v6) => (Self::from_ipv6(v6), ALEN_INET6),
        }
    }

    /// The meaningful prefix of the buffer, given its address length.
    pub fn as_slice(&self, alen: u8) -> &[u8] {
        &self.0[..alen as usize]
    }

    pub fn to_ip(self, alen: u8) -> Option<IpAddr> {
        match alen {
            ALEN_INET => {
                let mut o = [0u8; 4];
                o.copy_from_slice(&self.0[..4]);
                Some(IpAddr::V4(Ipv4Addr::from(o)))
            }
            ALEN_INET6 => Some(IpAddr::V6(Ipv6Addr::from(self.0))),
            _ => None,
        }
    }

    /// Compares only the meaningful prefix for the given address length.
    pub fn eq_with_alen(&self, other: &Addr, alen: u8) -> bool {
        self.as_slice(alen) == other.as_slice(alen)
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Best-effort debug rendering; callers that know alen should use
        // `to_ip` for a faithful representation.
        if self.0[4..].iter().all(|&b| b == 0) {
            write!(f, "{:?}", Ipv4Addr::from([self.0[0], self.0[1], self.0[2], self.0[3]]))
        } else {
            write!(f, "{:?}", Ipv6Addr::from(self.0))
        }
    }
}

/// Validates a mask value against `table_cidr_check` semantics (§4.2):
/// `mask <= 32` for 4-byte addresses, `<= 128` for 16-byte addresses, or the
/// no-mask sentinel (`255`) for a bare host address.
pub const NO_MASK: u8 = 255;

pub fn table_cidr_check(alen: u8, mask: u8) -> bool {
    if mask == NO_MASK {
        return true;
    }
    match alen {
        ALEN_INET => mask <= 32,
        ALEN_INET6 => mask <= 128,
        _ => false,
    }
}
