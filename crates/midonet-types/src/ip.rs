//! IP address and prefix types with safe parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IP address that can be either IPv4 or IPv6.
///
/// Serialized as its textual form, which is how the controller and the
/// logical store both carry addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IpAddress {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl IpAddress {
    /// `0.0.0.0`
    pub const UNSPECIFIED_V4: Self = IpAddress::V4(Ipv4Addr::UNSPECIFIED);

    pub const fn v4(a: u8, b: u8, c: u8, d: u8) -> Self {
        IpAddress::V4(Ipv4Addr::new(a, b, c, d))
    }

    /// Returns true if this is an IPv4 address.
    pub const fn is_ipv4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    /// Returns true if this is an IPv6 address.
    pub const fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// Address width in bits (32 or 128).
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            IpAddress::V4(_) => 32,
            IpAddress::V6(_) => 128,
        }
    }

    fn to_bits(self) -> u128 {
        match self {
            IpAddress::V4(addr) => u128::from(u32::from(addr)),
            IpAddress::V6(addr) => u128::from(addr),
        }
    }

    fn from_bits_like(&self, bits: u128) -> Self {
        match self {
            // Truncation is intended: V4 bits always fit in the low 32 bits.
            IpAddress::V4(_) => IpAddress::V4(Ipv4Addr::from(bits as u32)),
            IpAddress::V6(_) => IpAddress::V6(Ipv6Addr::from(bits)),
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(addr) => addr.fmt(f),
            IpAddress::V6(addr) => addr.fmt(f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>()
            .map(IpAddress::from)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<IpAddr> for IpAddress {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => IpAddress::V4(v4),
            IpAddr::V6(v6) => IpAddress::V6(v6),
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(addr)
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(addr)
    }
}

impl TryFrom<String> for IpAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpAddress> for String {
    fn from(addr: IpAddress) -> String {
        addr.to_string()
    }
}

/// An IP prefix in CIDR notation (e.g., 10.0.0.0/24 or 2001:db8::/32).
///
/// The address is kept exactly as given; use [`IpPrefix::network`] for the
/// masked form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    address: IpAddress,
    prefix_len: u8,
}

impl IpPrefix {
    /// `0.0.0.0/0`
    pub const ANY_V4: IpPrefix = IpPrefix {
        address: IpAddress::UNSPECIFIED_V4,
        prefix_len: 0,
    };

    /// Creates a new IP prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address type
    /// (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddress, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = address.max_prefix_len();
        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for address type",
                prefix_len, max_len
            )));
        }

        Ok(IpPrefix {
            address,
            prefix_len,
        })
    }

    /// An IPv4 prefix from octets. Lengths above 32 are clamped to 32.
    pub const fn v4(a: u8, b: u8, c: u8, d: u8, prefix_len: u8) -> Self {
        IpPrefix {
            address: IpAddress::v4(a, b, c, d),
            prefix_len: if prefix_len > 32 { 32 } else { prefix_len },
        }
    }

    /// The single-address prefix for `address` (/32 or /128).
    pub const fn host(address: IpAddress) -> Self {
        IpPrefix {
            address,
            prefix_len: address.max_prefix_len(),
        }
    }

    pub const fn address(&self) -> &IpAddress {
        &self.address
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub const fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    /// Returns true if this is a host route (/32 for IPv4, /128 for IPv6).
    pub const fn is_host_route(&self) -> bool {
        self.prefix_len == self.address.max_prefix_len()
    }

    /// Returns true if this is the default route (0.0.0.0/0 or ::/0).
    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }

    fn mask(&self) -> u128 {
        let width = u32::from(self.address.max_prefix_len());
        let len = u32::from(self.prefix_len);
        if len == 0 {
            return 0;
        }
        let full = if width == 128 {
            u128::MAX
        } else {
            (1u128 << width) - 1
        };
        full & !((1u128 << (width - len)).wrapping_sub(1) & full)
    }

    /// The prefix with host bits cleared (`10.0.0.7/24` becomes `10.0.0.0/24`).
    pub fn network(&self) -> IpPrefix {
        let bits = self.address.to_bits() & self.mask();
        IpPrefix {
            address: self.address.from_bits_like(bits),
            prefix_len: self.prefix_len,
        }
    }

    /// Returns true if `addr` falls inside this prefix.
    pub fn contains(&self, addr: &IpAddress) -> bool {
        if addr.is_ipv4() != self.is_ipv4() {
            return false;
        }
        let mask = self.mask();
        addr.to_bits() & mask == self.address.to_bits() & mask
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddress = addr_str.parse()?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> String {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ip_address_discrimination() {
        let v4: IpAddress = "10.0.0.1".parse().unwrap();
        assert!(v4.is_ipv4());
        assert_eq!(v4, IpAddress::v4(10, 0, 0, 1));

        let v6: IpAddress = "2001:db8::1".parse().unwrap();
        assert!(v6.is_ipv6());
        assert_eq!(v6.max_prefix_len(), 128);
    }

    #[test]
    fn test_host_prefix() {
        let v4 = IpPrefix::host(IpAddress::v4(10, 0, 0, 5));
        assert_eq!(v4.to_string(), "10.0.0.5/32");
        assert!(v4.is_host_route());

        let v6 = IpPrefix::host("2001:db8::5".parse().unwrap());
        assert_eq!(v6.to_string(), "2001:db8::5/128");
    }

    #[test]
    fn test_const_v4_prefix() {
        assert_eq!(IpPrefix::v4(169, 254, 255, 0, 30).to_string(), "169.254.255.0/30");
        assert_eq!(IpPrefix::v4(10, 0, 0, 1, 40).prefix_len(), 32);
    }

    #[test]
    fn test_network_masks_host_bits() {
        let prefix: IpPrefix = "169.254.255.2/30".parse().unwrap();
        assert_eq!(prefix.network().to_string(), "169.254.255.0/30");

        let v6: IpPrefix = "2001:db8::77/64".parse().unwrap();
        assert_eq!(v6.network().to_string(), "2001:db8::/64");

        assert_eq!(IpPrefix::ANY_V4.network(), IpPrefix::ANY_V4);
    }

    #[test]
    fn test_contains() {
        let subnet: IpPrefix = "192.168.10.0/24".parse().unwrap();
        assert!(subnet.contains(&IpAddress::v4(192, 168, 10, 200)));
        assert!(!subnet.contains(&IpAddress::v4(192, 168, 11, 1)));
        assert!(!subnet.contains(&"::1".parse().unwrap()));
        assert!(IpPrefix::ANY_V4.contains(&IpAddress::v4(8, 8, 8, 8)));
    }

    #[test]
    fn test_invalid_prefix_length() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_serde_as_text() {
        let prefix: IpPrefix = "10.1.0.0/16".parse().unwrap();
        let json = serde_json::to_string(&prefix).unwrap();
        assert_eq!(json, "\"10.1.0.0/16\"");
        let back: IpPrefix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, prefix);

        let addr: IpAddress = serde_json::from_str("\"172.16.0.1\"").unwrap();
        assert_eq!(addr, IpAddress::v4(172, 16, 0, 1));
    }
}
