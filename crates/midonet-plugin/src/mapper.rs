//! Names and ids of controller objects derived from logical ids.
//!
//! The controller stores no back references to logical resources. Instead,
//! every controller object the plugin owns is either created with the
//! logical id itself (bridges, routers, ports, IP address groups) or named
//! from it (chains), so it can always be found again from the logical side.

use midonet_client::{BridgeId, IpAddrGroupId, PortId, RouterId};
use std::fmt;
use uuid::Uuid;

/// Rule property holding the security group rule a chain rule was built from.
pub const SG_RULE_TAG: &str = "OS_SG_RULE_ID";

/// Rule property holding the floating IP a static NAT rule belongs to.
pub const FLOATING_IP_TAG: &str = "OS_FLOATING_IP";

/// Rule property marking tenant router rules; see [`SNAT_TAG_VALUE`].
pub const TENANT_ROUTER_RULE_TAG: &str = "OS_TENANT_ROUTER_RULE";

/// Value of [`TENANT_ROUTER_RULE_TAG`] on dynamic SNAT rules.
pub const SNAT_TAG_VALUE: &str = "SNAT";

/// Purpose of a named controller object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NameRole {
    PreRouting,
    PostRouting,
    SgIngress,
    SgEgress,
    PortInbound,
    PortOutbound,
    IpAddrGroup,
}

impl NameRole {
    pub const ALL: [NameRole; 7] = [
        NameRole::PreRouting,
        NameRole::PostRouting,
        NameRole::SgIngress,
        NameRole::SgEgress,
        NameRole::PortInbound,
        NameRole::PortOutbound,
        NameRole::IpAddrGroup,
    ];

    /// Resource kind whose id the name is built from.
    pub fn owner_kind(&self) -> &'static str {
        match self {
            NameRole::PreRouting | NameRole::PostRouting => "router",
            NameRole::SgIngress | NameRole::SgEgress | NameRole::IpAddrGroup => "security_group",
            NameRole::PortInbound | NameRole::PortOutbound => "port",
        }
    }
}

impl fmt::Display for NameRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NameRole::PreRouting => "pre-routing",
            NameRole::PostRouting => "post-routing",
            NameRole::SgIngress => "sg-ingress",
            NameRole::SgEgress => "sg-egress",
            NameRole::PortInbound => "port-inbound",
            NameRole::PortOutbound => "port-outbound",
            NameRole::IpAddrGroup => "ip-addr-group",
        };
        write!(f, "{}", s)
    }
}

/// Controller-side name of the object playing `role` for logical `id`.
pub fn name_for(role: NameRole, id: &Uuid) -> String {
    match role {
        NameRole::PreRouting => format!("OS_PRE_ROUTING_{}", id),
        NameRole::PostRouting => format!("OS_POST_ROUTING_{}", id),
        NameRole::SgIngress => format!("OS_SG_{}_INGRESS", id),
        NameRole::SgEgress => format!("OS_SG_{}_EGRESS", id),
        NameRole::PortInbound => format!("OS_PORT_{}_INBOUND", id),
        NameRole::PortOutbound => format!("OS_PORT_{}_OUTBOUND", id),
        NameRole::IpAddrGroup => format!("OS_IPG_{}", id),
    }
}

/// Pre-routing and post-routing chain names of a router.
pub fn nat_chain_names(router_id: &Uuid) -> (String, String) {
    (
        name_for(NameRole::PreRouting, router_id),
        name_for(NameRole::PostRouting, router_id),
    )
}

/// Inbound and outbound chain names of a port.
pub fn port_chain_names(port_id: &Uuid) -> (String, String) {
    (
        name_for(NameRole::PortInbound, port_id),
        name_for(NameRole::PortOutbound, port_id),
    )
}

/// Ingress and egress chain names of a security group.
pub fn sg_chain_names(sg_id: &Uuid) -> (String, String) {
    (
        name_for(NameRole::SgIngress, sg_id),
        name_for(NameRole::SgEgress, sg_id),
    )
}

// ============ Identity correlation ============

pub fn bridge_id(network_id: Uuid) -> BridgeId {
    BridgeId::from_uuid(network_id)
}

pub fn network_id(bridge: BridgeId) -> Uuid {
    bridge.as_uuid()
}

pub fn router_id(router_id: Uuid) -> RouterId {
    RouterId::from_uuid(router_id)
}

pub fn port_id(port_id: Uuid) -> PortId {
    PortId::from_uuid(port_id)
}

pub fn ip_addr_group_id(security_group_id: Uuid) -> IpAddrGroupId {
    IpAddrGroupId::from_uuid(security_group_id)
}
