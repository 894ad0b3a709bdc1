//! Bridges, routers and the ports that attach to them.

use crate::types::{BridgeId, ChainId, PortId, RouterId};
use midonet_types::{IpAddress, IpPrefix};
use uuid::Uuid;

/// The device a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Bridge(BridgeId),
    Router(RouterId),
}

impl DeviceId {
    pub fn as_uuid(&self) -> Uuid {
        match self {
            DeviceId::Bridge(id) => id.as_uuid(),
            DeviceId::Router(id) => id.as_uuid(),
        }
    }
}

/// An L2 virtual bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub id: BridgeId,
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSpec {
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
}

impl BridgeSpec {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: name.into(),
            admin_state_up: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeUpdate {
    pub name: Option<String>,
    pub admin_state_up: Option<bool>,
}

/// An L3 virtual router. The inbound filter is the pre-routing chain and the
/// outbound filter is the post-routing chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    pub id: RouterId,
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
    pub inbound_filter: Option<ChainId>,
    pub outbound_filter: Option<ChainId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSpec {
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
}

impl RouterSpec {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: name.into(),
            admin_state_up: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterUpdate {
    pub name: Option<String>,
    pub admin_state_up: Option<bool>,
    pub inbound_filter: Option<ChainId>,
    pub outbound_filter: Option<ChainId>,
}

/// Layer-3 addressing of a router port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterPortAddress {
    pub port_address: IpAddress,
    /// Network the port sits on; only the masked form is stored.
    pub network: IpPrefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterPortSpec {
    pub port_address: IpAddress,
    pub network: IpPrefix,
    pub admin_state_up: bool,
}

impl RouterPortSpec {
    pub fn new(port_address: IpAddress, network: IpPrefix) -> Self {
        Self {
            port_address,
            network,
            admin_state_up: true,
        }
    }
}

/// A port on a bridge or a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub id: PortId,
    pub device_id: DeviceId,
    pub admin_state_up: bool,
    pub peer_id: Option<PortId>,
    pub inbound_filter: Option<ChainId>,
    pub outbound_filter: Option<ChainId>,
    /// Set for router ports only.
    pub address: Option<RouterPortAddress>,
}

impl Port {
    pub fn is_linked(&self) -> bool {
        self.peer_id.is_some()
    }

    pub fn port_address(&self) -> Option<IpAddress> {
        self.address.map(|a| a.port_address)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortUpdate {
    pub admin_state_up: Option<bool>,
    pub inbound_filter: Option<ChainId>,
    pub outbound_filter: Option<ChainId>,
}
