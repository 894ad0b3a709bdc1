//! Controller object model.
//!
//! - [`device`]: Bridges, routers and their ports
//! - [`chain`]: Packet-filter chains and rules
//! - [`route`]: Router routes
//! - [`ip_addr_group`]: IP address groups referenced by rules
//! - [`dhcp`]: Bridge DHCP subnets and static host entries

pub mod chain;
pub mod device;
pub mod dhcp;
pub mod ip_addr_group;
pub mod route;

pub use chain::{Chain, NatTarget, Rule, RuleAction, RuleSpec};
pub use device::{
    Bridge, BridgeSpec, BridgeUpdate, DeviceId, Port, PortUpdate, Router, RouterPortAddress,
    RouterPortSpec, RouterSpec, RouterUpdate,
};
pub use dhcp::{DhcpHost, DhcpHostRoute, DhcpSubnet};
pub use ip_addr_group::IpAddrGroup;
pub use route::{Route, RouteSpec, RouteType, DEFAULT_ROUTE_WEIGHT};
