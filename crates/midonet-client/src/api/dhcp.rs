//! DHCP configuration held by a bridge.

use midonet_types::{IpAddress, IpPrefix, MacAddress};

/// A classless static route handed out to DHCP clients (option 121).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpHostRoute {
    pub destination: IpPrefix,
    pub gateway: IpAddress,
}

/// A DHCP subnet on a bridge, keyed by its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpSubnet {
    pub subnet: IpPrefix,
    pub default_gateway: Option<IpAddress>,
    pub dns_servers: Vec<IpAddress>,
    pub host_routes: Vec<DhcpHostRoute>,
    pub enabled: bool,
}

/// A static MAC to IP assignment within a DHCP subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DhcpHost {
    pub mac: MacAddress,
    pub ip: IpAddress,
}
