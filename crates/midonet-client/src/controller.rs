//! The controller boundary.
//!
//! [`Controller`] is the only way the plugin reaches the SDN controller. All
//! calls are blocking and stateless from the caller's point of view.

use crate::api::{
    Bridge, BridgeSpec, BridgeUpdate, Chain, DeviceId, DhcpHost, DhcpSubnet, IpAddrGroup, Port,
    PortUpdate, Route, RouteSpec, Router, RouterPortSpec, RouterSpec, RouterUpdate, Rule,
    RuleSpec,
};
use crate::error::{ClientError, ClientResult};
use crate::types::{BridgeId, ChainId, IpAddrGroupId, PortId, RouteId, RouterId, RuleId};
use midonet_types::{IpAddress, IpPrefix};
use tracing::debug;

/// Operations the plugin needs from the SDN controller.
pub trait Controller: Send + Sync {
    // ============ Bridges ============

    fn create_bridge(&self, spec: &BridgeSpec) -> ClientResult<Bridge>;
    fn get_bridge(&self, id: BridgeId) -> ClientResult<Bridge>;
    fn update_bridge(&self, id: BridgeId, update: &BridgeUpdate) -> ClientResult<Bridge>;
    /// Deletes the bridge together with its ports and DHCP configuration.
    fn delete_bridge(&self, id: BridgeId) -> ClientResult<()>;

    // ============ Routers ============

    fn create_router(&self, spec: &RouterSpec) -> ClientResult<Router>;
    fn get_router(&self, id: RouterId) -> ClientResult<Router>;
    fn update_router(&self, id: RouterId, update: &RouterUpdate) -> ClientResult<Router>;
    /// Deletes the router together with its ports and routes.
    fn delete_router(&self, id: RouterId) -> ClientResult<()>;

    // ============ Ports ============

    fn create_bridge_port(&self, bridge: BridgeId, admin_state_up: bool) -> ClientResult<Port>;
    fn create_router_port(&self, router: RouterId, spec: &RouterPortSpec) -> ClientResult<Port>;
    fn get_port(&self, id: PortId) -> ClientResult<Port>;
    fn update_port(&self, id: PortId, update: &PortUpdate) -> ClientResult<Port>;
    /// Deletes a port. A linked port is unlinked first; routes whose next hop
    /// is the port go with it.
    fn delete_port(&self, id: PortId) -> ClientResult<()>;
    fn list_ports(&self, device: DeviceId) -> ClientResult<Vec<Port>>;
    fn link(&self, port: PortId, peer: PortId) -> ClientResult<()>;
    fn unlink(&self, port: PortId) -> ClientResult<()>;

    // ============ Chains and rules ============

    fn create_chain(&self, tenant_id: &str, name: &str) -> ClientResult<Chain>;
    fn get_chain(&self, id: ChainId) -> ClientResult<Chain>;
    fn get_chain_by_name(&self, tenant_id: &str, name: &str) -> ClientResult<Option<Chain>>;
    /// Deletes the chain and every rule in it.
    fn delete_chain(&self, id: ChainId) -> ClientResult<()>;
    /// Rules in evaluation order.
    fn list_rules(&self, chain: ChainId) -> ClientResult<Vec<Rule>>;
    /// Inserts a rule at a 1-based `position`; valid positions are
    /// `1..=len+1`. Rules at and after the position move down by one.
    fn add_rule(&self, chain: ChainId, spec: &RuleSpec, position: u32) -> ClientResult<Rule>;
    fn delete_rule(&self, id: RuleId) -> ClientResult<()>;

    // ============ Routes ============

    fn add_route(&self, router: RouterId, spec: &RouteSpec) -> ClientResult<Route>;
    fn list_routes(&self, router: RouterId) -> ClientResult<Vec<Route>>;
    fn delete_route(&self, id: RouteId) -> ClientResult<()>;

    // ============ IP address groups ============

    fn create_ip_addr_group(&self, id: IpAddrGroupId, name: &str) -> ClientResult<IpAddrGroup>;
    fn get_ip_addr_group(&self, id: IpAddrGroupId) -> ClientResult<IpAddrGroup>;
    fn delete_ip_addr_group(&self, id: IpAddrGroupId) -> ClientResult<()>;
    fn add_ip_addr_group_address(&self, id: IpAddrGroupId, addr: IpAddress) -> ClientResult<()>;
    fn remove_ip_addr_group_address(&self, id: IpAddrGroupId, addr: IpAddress)
        -> ClientResult<()>;

    // ============ DHCP ============

    fn create_dhcp_subnet(&self, bridge: BridgeId, subnet: &DhcpSubnet) -> ClientResult<()>;
    fn get_dhcp_subnet(&self, bridge: BridgeId, subnet: IpPrefix) -> ClientResult<DhcpSubnet>;
    fn update_dhcp_subnet(&self, bridge: BridgeId, subnet: &DhcpSubnet) -> ClientResult<()>;
    /// Deletes the DHCP subnet and its host entries.
    fn delete_dhcp_subnet(&self, bridge: BridgeId, subnet: IpPrefix) -> ClientResult<()>;
    fn add_dhcp_host(&self, bridge: BridgeId, subnet: IpPrefix, host: &DhcpHost)
        -> ClientResult<()>;
    fn remove_dhcp_host(
        &self,
        bridge: BridgeId,
        subnet: IpPrefix,
        host: &DhcpHost,
    ) -> ClientResult<()>;
    fn list_dhcp_hosts(&self, bridge: BridgeId, subnet: IpPrefix) -> ClientResult<Vec<DhcpHost>>;

    // ============ Derived operations ============

    /// Ports on other devices that are linked to ports of `device`.
    fn list_peer_ports(&self, device: DeviceId) -> ClientResult<Vec<Port>> {
        let mut peers = Vec::new();
        for port in self.list_ports(device)? {
            if let Some(peer_id) = port.peer_id {
                peers.push(self.get_port(peer_id)?);
            }
        }
        Ok(peers)
    }

    /// Deletes every rule in the named chain whose property `key` equals
    /// `value`, returning how many were removed.
    fn remove_rules_by_property(
        &self,
        tenant_id: &str,
        chain_name: &str,
        key: &str,
        value: &str,
    ) -> ClientResult<usize> {
        let chain = self
            .get_chain_by_name(tenant_id, chain_name)?
            .ok_or_else(|| ClientError::not_found("chain", chain_name))?;

        let mut removed = 0;
        for rule in self.list_rules(chain.id)? {
            if rule.spec.property(key) == Some(value) {
                self.delete_rule(rule.id)?;
                removed += 1;
            }
        }
        debug!(chain = chain_name, key, value, removed, "Removed rules by property");
        Ok(removed)
    }
}
