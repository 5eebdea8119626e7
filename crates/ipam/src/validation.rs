//! Address and network validation
//!
//! Parsing, normalization and the sanity checks applied to administratively
//! supplied networks before they are carved into blocks.

use crate::models::AddressFamily;
use crate::{Error, Result};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IPv4 ranges that are never handed out
const V4_NON_UNICAST: [(Ipv4Net, &str); 4] = [
    (Ipv4Net::new_assert(Ipv4Addr::new(127, 0, 0, 0), 8), "loopback"),
    (Ipv4Net::new_assert(Ipv4Addr::new(169, 254, 0, 0), 16), "link-local"),
    (Ipv4Net::new_assert(Ipv4Addr::new(224, 0, 0, 0), 4), "multicast"),
    (Ipv4Net::new_assert(Ipv4Addr::new(240, 0, 0, 0), 4), "reserved"),
];

/// IPv6 ranges that are never handed out
///
/// The reserved entries cover IETF-reserved space outside the global unicast
/// (2000::/3) and unique-local (fc00::/7) blocks.
const V6_NON_UNICAST: [(Ipv6Net, &str); 18] = [
    (Ipv6Net::new_assert(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1), 128), "loopback"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10), "link-local"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8), "multicast"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 8), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0x0100, 0, 0, 0, 0, 0, 0, 0), 8), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0x0200, 0, 0, 0, 0, 0, 0, 0), 7), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0x0400, 0, 0, 0, 0, 0, 0, 0), 6), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0x0800, 0, 0, 0, 0, 0, 0, 0), 5), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0x1000, 0, 0, 0, 0, 0, 0, 0), 4), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0x4000, 0, 0, 0, 0, 0, 0, 0), 3), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0x6000, 0, 0, 0, 0, 0, 0, 0), 3), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0x8000, 0, 0, 0, 0, 0, 0, 0), 3), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0xa000, 0, 0, 0, 0, 0, 0, 0), 3), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0xc000, 0, 0, 0, 0, 0, 0, 0), 3), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0xe000, 0, 0, 0, 0, 0, 0, 0), 4), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0xf000, 0, 0, 0, 0, 0, 0, 0), 5), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0xf800, 0, 0, 0, 0, 0, 0, 0), 6), "reserved"),
    (Ipv6Net::new_assert(Ipv6Addr::new(0xfe00, 0, 0, 0, 0, 0, 0, 0), 9), "reserved"),
];

/// Parse and canonicalize an address string
pub fn normalize_address(input: &str) -> Result<IpAddr> {
    input
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| Error::InvalidArgument(format!("'{}' is not a valid IP address", input)))
}

/// Parse a CIDR string, rejecting networks with host bits set
pub fn parse_network(input: &str) -> Result<IpNet> {
    let net = input
        .trim()
        .parse::<IpNet>()
        .map_err(|_| Error::InvalidArgument(format!("'{}' is not a valid CIDR", input)))?;
    ensure_strict(&net)?;
    Ok(net)
}

/// Reject a network whose address has bits set beyond its prefix
pub fn ensure_strict(net: &IpNet) -> Result<()> {
    if net.trunc() != *net {
        return Err(Error::InvalidArgument(format!(
            "{} has host bits set (did you mean {}?)",
            net,
            net.trunc()
        )));
    }
    Ok(())
}

/// Require `addr` to be of the given family
pub fn ensure_family(addr: &IpAddr, family: AddressFamily) -> Result<()> {
    if AddressFamily::of(addr) != family {
        return Err(Error::InvalidArgument(format!(
            "{} is not an {} address",
            addr, family
        )));
    }
    Ok(())
}

/// Confirm a network is usable for unicast assignment
///
/// Rejects networks that overlap loopback, link-local, multicast or reserved
/// space, and networks starting at the unspecified address.
pub fn validate_unicast(net: &IpNet) -> Result<()> {
    if net.network().is_unspecified() {
        return Err(Error::InvalidArgument(format!(
            "will not use unspecified address space {}",
            net
        )));
    }

    let violation = match net {
        IpNet::V4(v4) => V4_NON_UNICAST
            .iter()
            .find(|(range, _)| overlaps_v4(range, v4))
            .map(|(_, kind)| *kind),
        IpNet::V6(v6) => V6_NON_UNICAST
            .iter()
            .find(|(range, _)| overlaps_v6(range, v6))
            .map(|(_, kind)| *kind),
    };

    match violation {
        Some(kind) => Err(Error::InvalidArgument(format!(
            "will not allocate from {} address space ({})",
            kind, net
        ))),
        None => Ok(()),
    }
}

fn overlaps_v4(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

fn overlaps_v6(a: &Ipv6Net, b: &Ipv6Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Number of values representable with `bits` free bits
///
/// Ranges spanning 2^128 values do not fit the offset space and are rejected.
pub fn span(bits: u8) -> Result<u128> {
    1u128.checked_shl(u32::from(bits)).ok_or_else(|| {
        Error::InvalidArgument(format!("a range of 2^{} entries is not supported", bits))
    })
}

/// Validate an allocation prefix length against a base network
pub fn validate_allocation_prefix(network: &IpNet, allocation_prefix_len: u8) -> Result<()> {
    let width = AddressFamily::of_net(network).width();
    if allocation_prefix_len > width {
        return Err(Error::InvalidArgument(format!(
            "allocation prefix /{} exceeds the {}-bit address width",
            allocation_prefix_len, width
        )));
    }
    if allocation_prefix_len < network.prefix_len() {
        return Err(Error::InvalidArgument(format!(
            "allocation prefix /{} is shorter than the pool prefix /{}",
            allocation_prefix_len,
            network.prefix_len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_normalize_address() {
        let addr = normalize_address(" fd00:a3b1:78a2:0:0::1 ").unwrap();
        assert_eq!(addr.to_string(), "fd00:a3b1:78a2::1");

        let err = normalize_address("ImNotAnIP!").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_parse_network_strict() {
        assert_eq!(parse_network("192.0.2.0/24").unwrap(), net("192.0.2.0/24"));
        assert!(parse_network("192.0.2.5/24").is_err());
        assert!(parse_network("192.0.2.0/33").is_err());
    }

    #[test]
    fn test_accepts_documentation_and_ula() {
        assert!(validate_unicast(&net("192.0.2.0/24")).is_ok());
        assert!(validate_unicast(&net("10.0.2.0/24")).is_ok());
        assert!(validate_unicast(&net("fd00:a3b1:78a2::/48")).is_ok());
        assert!(validate_unicast(&net("2001:db8::/32")).is_ok());
    }

    #[test]
    fn test_rejects_ipv4_special_ranges() {
        for bad in [
            "127.0.1.0/24",
            "169.254.1.0/24",
            "224.0.0.0/24",
            "240.0.0.0/24",
            "0.0.0.0/8",
        ] {
            assert!(validate_unicast(&net(bad)).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_rejects_ipv6_special_ranges() {
        for bad in ["::1/128", "fe80::/64", "ff05::/64", "dead:beef::/64", "::/0"] {
            assert!(validate_unicast(&net(bad)).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_rejects_supernet_of_special_range() {
        // 96.0.0.0/3 covers 127.0.0.0/8
        assert!(validate_unicast(&net("96.0.0.0/3")).is_err());
    }

    #[test]
    fn test_span() {
        assert_eq!(span(0).unwrap(), 1);
        assert_eq!(span(8).unwrap(), 256);
        assert_eq!(span(127).unwrap(), 1u128 << 127);
        assert!(span(128).is_err());
    }

    #[test]
    fn test_allocation_prefix_bounds() {
        let pool = net("192.0.2.0/24");
        assert!(validate_allocation_prefix(&pool, 24).is_ok());
        assert!(validate_allocation_prefix(&pool, 32).is_ok());
        assert!(validate_allocation_prefix(&pool, 33).is_err());
        assert!(validate_allocation_prefix(&pool, 16).is_err());

        let pool = net("fd00:a3b1:78a2::/48");
        assert!(validate_allocation_prefix(&pool, 64).is_ok());
        assert!(validate_allocation_prefix(&pool, 128).is_ok());
        assert!(validate_allocation_prefix(&pool, 129).is_err());
    }

    #[test]
    fn test_ensure_family() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(ensure_family(&v4, AddressFamily::V4).is_ok());
        assert!(ensure_family(&v4, AddressFamily::V6).is_err());
    }
}
