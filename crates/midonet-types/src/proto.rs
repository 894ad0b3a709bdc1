//! Transport-layer match values: IP protocol numbers and L4 port ranges.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An IP protocol number (`nw_proto`).
///
/// Parses either a well-known name (`tcp`, `udp`, `icmp`, `icmpv6`) or a
/// decimal protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpProtocol(u8);

impl IpProtocol {
    pub const ICMP: IpProtocol = IpProtocol(1);
    pub const TCP: IpProtocol = IpProtocol(6);
    pub const UDP: IpProtocol = IpProtocol(17);
    pub const ICMPV6: IpProtocol = IpProtocol(58);

    pub const fn new(number: u8) -> Self {
        IpProtocol(number)
    }

    pub const fn number(&self) -> u8 {
        self.0
    }

    /// ICMP carries type/code in the transport port fields.
    pub const fn is_icmp(&self) -> bool {
        self.0 == Self::ICMP.0
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IpProtocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::TCP),
            "udp" => Ok(Self::UDP),
            "icmp" => Ok(Self::ICMP),
            "icmpv6" => Ok(Self::ICMPV6),
            other => other
                .parse::<u8>()
                .map(IpProtocol)
                .map_err(|_| ParseError::InvalidProtocol(s.to_string())),
        }
    }
}

/// An inclusive transport port range (`tp_src` / `tp_dst`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ParseError> {
        if start > end {
            return Err(ParseError::InvalidPortRange(format!("{}..{}", start, end)));
        }
        Ok(PortRange { start, end })
    }

    /// A range covering exactly one value.
    pub const fn single(value: u16) -> Self {
        PortRange {
            start: value,
            end: value,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
