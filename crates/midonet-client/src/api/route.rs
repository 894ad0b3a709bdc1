//! Router routes.

use crate::types::{PortId, RouteId, RouterId};
use midonet_types::{IpAddress, IpPrefix};

/// Weight used for every route the plugin installs.
pub const DEFAULT_ROUTE_WEIGHT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteType {
    /// Forward through `next_hop_port`.
    Normal,
    /// Silently drop matching traffic.
    BlackHole,
    /// Drop and answer with ICMP unreachable.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub route_type: RouteType,
    pub src_network: IpPrefix,
    pub dst_network: IpPrefix,
    pub next_hop_port: Option<PortId>,
    pub next_hop_gateway: Option<IpAddress>,
    pub weight: u32,
}

impl RouteSpec {
    /// A normal route from anywhere to `dst` through `next_hop_port`.
    pub fn normal(dst_network: IpPrefix, next_hop_port: PortId) -> Self {
        Self {
            route_type: RouteType::Normal,
            src_network: IpPrefix::ANY_V4,
            dst_network,
            next_hop_port: Some(next_hop_port),
            next_hop_gateway: None,
            weight: DEFAULT_ROUTE_WEIGHT,
        }
    }

    pub fn black_hole(dst_network: IpPrefix) -> Self {
        Self {
            route_type: RouteType::BlackHole,
            src_network: IpPrefix::ANY_V4,
            dst_network,
            next_hop_port: None,
            next_hop_gateway: None,
            weight: DEFAULT_ROUTE_WEIGHT,
        }
    }

    pub fn with_src(mut self, src_network: IpPrefix) -> Self {
        self.src_network = src_network;
        self
    }

    pub fn with_gateway(mut self, gateway: IpAddress) -> Self {
        self.next_hop_gateway = Some(gateway);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub id: RouteId,
    pub router_id: RouterId,
    pub spec: RouteSpec,
}
