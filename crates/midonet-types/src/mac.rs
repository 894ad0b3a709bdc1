//! MAC address type with safe parsing and formatting.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// # Examples
///
/// ```
/// use midonet_types::MacAddress;
///
/// let mac: MacAddress = "fa:16:3e:00:11:22".parse().unwrap();
/// assert_eq!(mac.to_string(), "fa:16:3e:00:11:22");
///
/// let upper: MacAddress = "FA-16-3E-00-11-22".parse().unwrap();
/// assert_eq!(mac, upper);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if this is a multicast address.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains(':') { ':' } else { '-' };

        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_formats() {
        let mac: MacAddress = "fa:16:3e:aa:bb:cc".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0xfa, 0x16, 0x3e, 0xaa, 0xbb, 0xcc]);
        assert_eq!("fa-16-3e-aa-bb-cc".parse::<MacAddress>().unwrap(), mac);
        assert!(!mac.is_multicast());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("fa:16:3e:aa:bb".parse::<MacAddress>().is_err());
        assert!("fa:16:3e:aa:bb:zz".parse::<MacAddress>().is_err());
        assert!("fa:16:3e:aa:bb:ccc".parse::<MacAddress>().is_err());
    }
}
