//! Address family and per-address lifecycle models

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Family of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Family of a network
    pub fn of_net(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => AddressFamily::V4,
            IpNet::V6(_) => AddressFamily::V6,
        }
    }

    /// Address width in bits
    pub fn width(&self) -> u8 {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }

    /// Whether offsets at the top of a range are reserved as broadcast
    pub fn has_broadcast(&self) -> bool {
        matches!(self, AddressFamily::V4)
    }

    /// Integer value of an address (widened to u128 for IPv4)
    pub fn to_bits(addr: IpAddr) -> u128 {
        match addr {
            IpAddr::V4(v4) => u128::from(u32::from(v4)),
            IpAddr::V6(v6) => u128::from(v6),
        }
    }

    /// Address of this family with the given integer value
    ///
    /// IPv4 values are truncated to 32 bits; callers only pass values
    /// derived from an in-range base address and offset.
    pub fn from_bits(&self, bits: u128) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "inet"),
            AddressFamily::V6 => write!(f, "inet6"),
        }
    }
}

/// Lifecycle state of a single address within a block
///
/// ```text
/// Unused -> Reserved -> ActiveUtilized -> Standby -> Unused
///              \________________________________/
///                     (abandoned reservation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressState {
    Unused,
    Reserved,
    ActiveUtilized,
    Standby,
}

impl AddressState {
    /// Whether an address in this state may be handed to the interface configurator
    pub fn is_configurable(&self) -> bool {
        matches!(self, AddressState::Reserved | AddressState::ActiveUtilized)
    }
}

impl std::fmt::Display for AddressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressState::Unused => write!(f, "unused"),
            AddressState::Reserved => write!(f, "reserved"),
            AddressState::ActiveUtilized => write!(f, "active_utilized"),
            AddressState::Standby => write!(f, "standby"),
        }
    }
}

/// Permanent, non-allocatable offset marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    /// Offset 0 of a multi-slot range
    NetworkAddress,
    /// Top offset of a multi-slot IPv4 range
    BroadcastAddress,
    /// Administratively held back from automatic issuance (pools only)
    HeldBack,
}

/// Status record stored for an occupied address offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStatus {
    pub state: AddressState,
    /// Stored only; nothing expires reservations automatically
    pub reservation_expiry: Option<DateTime<Utc>>,
}

impl AddressStatus {
    pub fn new(state: AddressState) -> Self {
        Self {
            state,
            reservation_expiry: None,
        }
    }
}

/// Finalized address handed to the host interface configurator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub address: IpAddr,
    pub prefix_len: u8,
    pub family: AddressFamily,
}

impl std::fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.family, self.address, self.prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_family_width() {
        assert_eq!(AddressFamily::V4.width(), 32);
        assert_eq!(AddressFamily::V6.width(), 128);
        assert!(AddressFamily::V4.has_broadcast());
        assert!(!AddressFamily::V6.has_broadcast());
    }

    #[test]
    fn test_bits_conversion() {
        let v4 = IpAddr::from_str("192.0.2.1").unwrap();
        assert_eq!(AddressFamily::to_bits(v4), 0xC000_0201);
        assert_eq!(AddressFamily::V4.from_bits(0xC000_0201), v4);

        let v6 = IpAddr::from_str("fd00:a3b1:78a2:1::").unwrap();
        let bits = AddressFamily::to_bits(v6);
        assert_eq!(AddressFamily::V6.from_bits(bits), v6);
    }

    #[test]
    fn test_family_of_net() {
        let net = IpNet::from_str("fd00:a3b1:78a2::/48").unwrap();
        assert_eq!(AddressFamily::of_net(&net), AddressFamily::V6);
        assert_eq!(AddressFamily::V6.to_string(), "inet6");
    }

    #[test]
    fn test_configurable_states() {
        assert!(AddressState::Reserved.is_configurable());
        assert!(AddressState::ActiveUtilized.is_configurable());
        assert!(!AddressState::Standby.is_configurable());
        assert!(!AddressState::Unused.is_configurable());
    }

    #[test]
    fn test_state_serde_names() {
        let json = serde_json::to_string(&AddressState::ActiveUtilized).unwrap();
        assert_eq!(json, "\"active_utilized\"");
    }
}
