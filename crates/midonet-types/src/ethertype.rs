//! Link-layer protocol numbers carried in filter rule matches.

use crate::{IpAddress, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ethertypes the plugin emits in `dl_type` matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EtherType {
    Arp,
    Ipv4,
    Ipv6,
}

impl EtherType {
    pub const fn value(&self) -> u16 {
        match self {
            EtherType::Arp => 0x0806,
            EtherType::Ipv4 => 0x0800,
            EtherType::Ipv6 => 0x86dd,
        }
    }

    /// The IP ethertype matching an address family.
    pub const fn for_address(addr: &IpAddress) -> Self {
        match addr {
            IpAddress::V4(_) => EtherType::Ipv4,
            IpAddress::V6(_) => EtherType::Ipv6,
        }
    }

    pub fn from_value(value: u16) -> Result<Self, ParseError> {
        match value {
            0x0806 => Ok(EtherType::Arp),
            0x0800 => Ok(EtherType::Ipv4),
            0x86dd => Ok(EtherType::Ipv6),
            other => Err(ParseError::InvalidEtherType(format!("{:#06x}", other))),
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EtherType::Arp => "ARP",
            EtherType::Ipv4 => "IPv4",
            EtherType::Ipv6 => "IPv6",
        };
        f.write_str(name)
    }
}

impl FromStr for EtherType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arp" => Ok(EtherType::Arp),
            "ipv4" => Ok(EtherType::Ipv4),
            "ipv6" => Ok(EtherType::Ipv6),
            _ => Err(ParseError::InvalidEtherType(s.to_string())),
        }
    }
}

impl TryFrom<String> for EtherType {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EtherType> for String {
    fn from(ethertype: EtherType) -> String {
        ethertype.to_string()
    }
}
