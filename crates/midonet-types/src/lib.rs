//! Network primitives for the MidoNet plugin.
//!
//! This crate provides type-safe representations of the values that cross
//! between the logical network model and the controller:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IpAddress`]: IPv4 and IPv6 addresses
//! - [`IpPrefix`]: IP network prefixes (CIDR notation)
//! - [`EtherType`]: link-layer protocol numbers used in rule matches
//! - [`IpProtocol`] and [`PortRange`]: transport matches for filter rules

mod ethertype;
mod ip;
mod mac;
mod proto;

pub use ethertype::EtherType;
pub use ip::{IpAddress, IpPrefix};
pub use mac::MacAddress;
pub use proto::{IpProtocol, PortRange};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("unsupported ethertype: {0}")]
    InvalidEtherType(String),

    #[error("invalid IP protocol: {0}")]
    InvalidProtocol(String),

    #[error("invalid port range: {0}")]
    InvalidPortRange(String),
}
