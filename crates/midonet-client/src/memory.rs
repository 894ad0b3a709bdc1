//! In-process controller.
//!
//! [`MemoryController`] keeps the whole virtual topology in memory and
//! applies the same structural rules a real controller enforces (rule
//! positions, link exclusivity, cascading deletes). Every call is appended to
//! a call log, and failures can be injected per operation, which is what the
//! plugin's compensation and locking tests rely on.

use crate::api::{
    Bridge, BridgeSpec, BridgeUpdate, Chain, DeviceId, DhcpHost, DhcpSubnet, IpAddrGroup, Port,
    PortUpdate, Route, RouteSpec, Router, RouterPortAddress, RouterPortSpec, RouterSpec,
    RouterUpdate, Rule, RuleAction, RuleSpec,
};
use crate::controller::Controller;
use crate::error::{ClientError, ClientResult};
use crate::types::{BridgeId, ChainId, IpAddrGroupId, PortId, RouteId, RouterId, RuleId};
use midonet_types::{IpAddress, IpPrefix};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, warn};

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerCall {
    pub operation: &'static str,
    pub target: String,
    pub thread: ThreadId,
}

#[derive(Debug)]
struct FailurePlan {
    operation: &'static str,
    /// Successful calls to let through before failing.
    remaining_successes: usize,
}

#[derive(Debug)]
struct ChainEntry {
    chain: Chain,
    rules: Vec<Rule>,
}

#[derive(Debug)]
struct DhcpEntry {
    subnet: DhcpSubnet,
    hosts: Vec<DhcpHost>,
}

#[derive(Debug, Default)]
struct State {
    bridges: HashMap<BridgeId, Bridge>,
    routers: HashMap<RouterId, Router>,
    // Creation order is kept so listings are deterministic.
    ports: Vec<Port>,
    chains: Vec<ChainEntry>,
    routes: Vec<Route>,
    ip_addr_groups: HashMap<IpAddrGroupId, IpAddrGroup>,
    dhcp: HashMap<BridgeId, Vec<DhcpEntry>>,
}

impl State {
    fn port(&self, id: PortId) -> ClientResult<&Port> {
        self.ports
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| ClientError::not_found("port", id))
    }

    fn port_mut(&mut self, id: PortId) -> ClientResult<&mut Port> {
        self.ports
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ClientError::not_found("port", id))
    }

    fn chain_entry(&self, id: ChainId) -> ClientResult<&ChainEntry> {
        self.chains
            .iter()
            .find(|c| c.chain.id == id)
            .ok_or_else(|| ClientError::not_found("chain", id))
    }

    fn chain_entry_mut(&mut self, id: ChainId) -> ClientResult<&mut ChainEntry> {
        self.chains
            .iter_mut()
            .find(|c| c.chain.id == id)
            .ok_or_else(|| ClientError::not_found("chain", id))
    }

    fn dhcp_entry_mut(&mut self, bridge: BridgeId, subnet: IpPrefix) -> ClientResult<&mut DhcpEntry> {
        self.dhcp
            .get_mut(&bridge)
            .and_then(|entries| entries.iter_mut().find(|e| e.subnet.subnet == subnet))
            .ok_or_else(|| ClientError::not_found("dhcp_subnet", format!("{}@{}", subnet, bridge)))
    }

    fn remove_port(&mut self, id: PortId) -> ClientResult<()> {
        let peer = self.port(id)?.peer_id;
        if let Some(peer_id) = peer {
            if let Ok(peer_port) = self.port_mut(peer_id) {
                peer_port.peer_id = None;
            }
        }
        self.routes.retain(|r| r.spec.next_hop_port != Some(id));
        self.ports.retain(|p| p.id != id);
        Ok(())
    }

    fn remove_device_ports(&mut self, device: DeviceId) {
        let ids: Vec<PortId> = self
            .ports
            .iter()
            .filter(|p| p.device_id == device)
            .map(|p| p.id)
            .collect();
        for id in ids {
            // Ports were just listed, so removal cannot miss.
            let _ = self.remove_port(id);
        }
    }
}

/// A controller that lives entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryController {
    state: Mutex<State>,
    calls: Mutex<Vec<ControllerCall>>,
    failures: Mutex<Vec<FailurePlan>>,
    latency: Option<Duration>,
}

impl MemoryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call, to widen race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next call to `operation`.
    pub fn fail_on(&self, operation: &'static str) {
        self.fail_on_nth(operation, 0);
    }

    /// Let `successes` calls to `operation` through, then fail the next one.
    pub fn fail_on_nth(&self, operation: &'static str, successes: usize) {
        self.failures.lock().push(FailurePlan {
            operation,
            remaining_successes: successes,
        });
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn bridge_count(&self) -> usize {
        self.state.lock().bridges.len()
    }

    pub fn router_count(&self) -> usize {
        self.state.lock().routers.len()
    }

    pub fn port_count(&self) -> usize {
        self.state.lock().ports.len()
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.state
            .lock()
            .chains
            .iter()
            .map(|c| c.chain.name.clone())
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.state.lock().routes.len()
    }

    pub fn ip_addr_group_count(&self) -> usize {
        self.state.lock().ip_addr_groups.len()
    }

    fn record(&self, operation: &'static str, target: impl ToString) -> ClientResult<()> {
        let target = target.to_string();
        self.calls.lock().push(ControllerCall {
            operation,
            target: target.clone(),
            thread: thread::current().id(),
        });
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }

        let mut failures = self.failures.lock();
        if let Some(pos) = failures.iter().position(|f| f.operation == operation) {
            if failures[pos].remaining_successes == 0 {
                failures.remove(pos);
                warn!(operation, target = %target, "Injected controller failure");
                return Err(ClientError::rejected(operation, "injected failure"));
            }
            failures[pos].remaining_successes -= 1;
        }
        Ok(())
    }
}

impl Controller for MemoryController {
    // ============ Bridges ============

    fn create_bridge(&self, spec: &BridgeSpec) -> ClientResult<Bridge> {
        self.record("create_bridge", &spec.name)?;
        let bridge = Bridge {
            id: BridgeId::new_v4(),
            tenant_id: spec.tenant_id.clone(),
            name: spec.name.clone(),
            admin_state_up: spec.admin_state_up,
        };
        self.state.lock().bridges.insert(bridge.id, bridge.clone());
        debug!(bridge_id = %bridge.id, "Created bridge");
        Ok(bridge)
    }

    fn get_bridge(&self, id: BridgeId) -> ClientResult<Bridge> {
        self.record("get_bridge", id)?;
        self.state
            .lock()
            .bridges
            .get(&id)
            .cloned()
            .ok_or_else(|| ClientError::not_found("bridge", id))
    }

    fn update_bridge(&self, id: BridgeId, update: &BridgeUpdate) -> ClientResult<Bridge> {
        self.record("update_bridge", id)?;
        let mut state = self.state.lock();
        let bridge = state
            .bridges
            .get_mut(&id)
            .ok_or_else(|| ClientError::not_found("bridge", id))?;
        if let Some(name) = &update.name {
            bridge.name = name.clone();
        }
        if let Some(up) = update.admin_state_up {
            bridge.admin_state_up = up;
        }
        Ok(bridge.clone())
    }

    fn delete_bridge(&self, id: BridgeId) -> ClientResult<()> {
        self.record("delete_bridge", id)?;
        let mut state = self.state.lock();
        if state.bridges.remove(&id).is_none() {
            return Err(ClientError::not_found("bridge", id));
        }
        state.remove_device_ports(DeviceId::Bridge(id));
        state.dhcp.remove(&id);
        Ok(())
    }

    // ============ Routers ============

    fn create_router(&self, spec: &RouterSpec) -> ClientResult<Router> {
        self.record("create_router", &spec.name)?;
        let router = Router {
            id: RouterId::new_v4(),
            tenant_id: spec.tenant_id.clone(),
            name: spec.name.clone(),
            admin_state_up: spec.admin_state_up,
            inbound_filter: None,
            outbound_filter: None,
        };
        self.state.lock().routers.insert(router.id, router.clone());
        debug!(router_id = %router.id, "Created router");
        Ok(router)
    }

    fn get_router(&self, id: RouterId) -> ClientResult<Router> {
        self.record("get_router", id)?;
        self.state
            .lock()
            .routers
            .get(&id)
            .cloned()
            .ok_or_else(|| ClientError::not_found("router", id))
    }

    fn update_router(&self, id: RouterId, update: &RouterUpdate) -> ClientResult<Router> {
        self.record("update_router", id)?;
        let mut state = self.state.lock();
        let router = state
            .routers
            .get_mut(&id)
            .ok_or_else(|| ClientError::not_found("router", id))?;
        if let Some(name) = &update.name {
            router.name = name.clone();
        }
        if let Some(up) = update.admin_state_up {
            router.admin_state_up = up;
        }
        if update.inbound_filter.is_some() {
            router.inbound_filter = update.inbound_filter;
        }
        if update.outbound_filter.is_some() {
            router.outbound_filter = update.outbound_filter;
        }
        Ok(router.clone())
    }

    fn delete_router(&self, id: RouterId) -> ClientResult<()> {
        self.record("delete_router", id)?;
        let mut state = self.state.lock();
        if state.routers.remove(&id).is_none() {
            return Err(ClientError::not_found("router", id));
        }
        state.remove_device_ports(DeviceId::Router(id));
        state.routes.retain(|r| r.router_id != id);
        Ok(())
    }

    // ============ Ports ============

    fn create_bridge_port(&self, bridge: BridgeId, admin_state_up: bool) -> ClientResult<Port> {
        self.record("create_bridge_port", bridge)?;
        let mut state = self.state.lock();
        if !state.bridges.contains_key(&bridge) {
            return Err(ClientError::not_found("bridge", bridge));
        }
        let port = Port {
            id: PortId::new_v4(),
            device_id: DeviceId::Bridge(bridge),
            admin_state_up,
            peer_id: None,
            inbound_filter: None,
            outbound_filter: None,
            address: None,
        };
        state.ports.push(port.clone());
        Ok(port)
    }

    fn create_router_port(&self, router: RouterId, spec: &RouterPortSpec) -> ClientResult<Port> {
        self.record("create_router_port", router)?;
        if spec.port_address.is_ipv4() != spec.network.is_ipv4() {
            return Err(ClientError::invalid_request(format!(
                "port address {} does not match network {}",
                spec.port_address, spec.network
            )));
        }
        let mut state = self.state.lock();
        if !state.routers.contains_key(&router) {
            return Err(ClientError::not_found("router", router));
        }
        let port = Port {
            id: PortId::new_v4(),
            device_id: DeviceId::Router(router),
            admin_state_up: spec.admin_state_up,
            peer_id: None,
            inbound_filter: None,
            outbound_filter: None,
            address: Some(RouterPortAddress {
                port_address: spec.port_address,
                network: spec.network.network(),
            }),
        };
        state.ports.push(port.clone());
        Ok(port)
    }

    fn get_port(&self, id: PortId) -> ClientResult<Port> {
        self.record("get_port", id)?;
        self.state.lock().port(id).cloned()
    }

    fn update_port(&self, id: PortId, update: &PortUpdate) -> ClientResult<Port> {
        self.record("update_port", id)?;
        let mut state = self.state.lock();
        for chain in [update.inbound_filter, update.outbound_filter].into_iter().flatten() {
            state.chain_entry(chain)?;
        }
        let port = state.port_mut(id)?;
        if let Some(up) = update.admin_state_up {
            port.admin_state_up = up;
        }
        if update.inbound_filter.is_some() {
            port.inbound_filter = update.inbound_filter;
        }
        if update.outbound_filter.is_some() {
            port.outbound_filter = update.outbound_filter;
        }
        Ok(port.clone())
    }

    fn delete_port(&self, id: PortId) -> ClientResult<()> {
        self.record("delete_port", id)?;
        self.state.lock().remove_port(id)
    }

    fn list_ports(&self, device: DeviceId) -> ClientResult<Vec<Port>> {
        self.record("list_ports", device.as_uuid())?;
        Ok(self
            .state
            .lock()
            .ports
            .iter()
            .filter(|p| p.device_id == device)
            .cloned()
            .collect())
    }

    fn link(&self, port: PortId, peer: PortId) -> ClientResult<()> {
        self.record("link", port)?;
        let mut state = self.state.lock();
        if port == peer {
            return Err(ClientError::invalid_request("cannot link a port to itself"));
        }
        for id in [port, peer] {
            if let Some(existing) = state.port(id)?.peer_id {
                return Err(ClientError::rejected(
                    "link",
                    format!("port {} is already linked to {}", id, existing),
                ));
            }
        }
        state.port_mut(port)?.peer_id = Some(peer);
        state.port_mut(peer)?.peer_id = Some(port);
        Ok(())
    }

    fn unlink(&self, port: PortId) -> ClientResult<()> {
        self.record("unlink", port)?;
        let mut state = self.state.lock();
        let peer = state.port_mut(port)?.peer_id.take();
        if let Some(peer) = peer {
            if let Ok(peer_port) = state.port_mut(peer) {
                peer_port.peer_id = None;
            }
        }
        Ok(())
    }

    // ============ Chains and rules ============

    fn create_chain(&self, tenant_id: &str, name: &str) -> ClientResult<Chain> {
        self.record("create_chain", name)?;
        let mut state = self.state.lock();
        if state
            .chains
            .iter()
            .any(|c| c.chain.tenant_id == tenant_id && c.chain.name == name)
        {
            return Err(ClientError::already_exists("chain", name));
        }
        let chain = Chain {
            id: ChainId::new_v4(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
        };
        state.chains.push(ChainEntry {
            chain: chain.clone(),
            rules: Vec::new(),
        });
        Ok(chain)
    }

    fn get_chain(&self, id: ChainId) -> ClientResult<Chain> {
        self.record("get_chain", id)?;
        Ok(self.state.lock().chain_entry(id)?.chain.clone())
    }

    fn get_chain_by_name(&self, tenant_id: &str, name: &str) -> ClientResult<Option<Chain>> {
        self.record("get_chain_by_name", name)?;
        Ok(self
            .state
            .lock()
            .chains
            .iter()
            .find(|c| c.chain.tenant_id == tenant_id && c.chain.name == name)
            .map(|c| c.chain.clone()))
    }

    fn delete_chain(&self, id: ChainId) -> ClientResult<()> {
        self.record("delete_chain", id)?;
        let mut state = self.state.lock();
        let before = state.chains.len();
        state.chains.retain(|c| c.chain.id != id);
        if state.chains.len() == before {
            return Err(ClientError::not_found("chain", id));
        }
        Ok(())
    }

    fn list_rules(&self, chain: ChainId) -> ClientResult<Vec<Rule>> {
        self.record("list_rules", chain)?;
        Ok(self.state.lock().chain_entry(chain)?.rules.clone())
    }

    fn add_rule(&self, chain: ChainId, spec: &RuleSpec, position: u32) -> ClientResult<Rule> {
        self.record("add_rule", chain)?;
        let mut state = self.state.lock();
        if let RuleAction::Jump { chain_id, .. } = &spec.action {
            state.chain_entry(*chain_id)?;
        }
        let entry = state.chain_entry_mut(chain)?;
        let len = entry.rules.len();
        let index = (position as usize)
            .checked_sub(1)
            .filter(|i| *i <= len)
            .ok_or_else(|| {
                ClientError::invalid_request(format!(
                    "rule position {} out of range 1..={}",
                    position,
                    len + 1
                ))
            })?;
        let rule = Rule {
            id: RuleId::new_v4(),
            chain_id: chain,
            spec: spec.clone(),
        };
        entry.rules.insert(index, rule.clone());
        Ok(rule)
    }

    fn delete_rule(&self, id: RuleId) -> ClientResult<()> {
        self.record("delete_rule", id)?;
        let mut state = self.state.lock();
        for entry in state.chains.iter_mut() {
            if let Some(pos) = entry.rules.iter().position(|r| r.id == id) {
                entry.rules.remove(pos);
                return Ok(());
            }
        }
        Err(ClientError::not_found("rule", id))
    }

    // ============ Routes ============

    fn add_route(&self, router: RouterId, spec: &RouteSpec) -> ClientResult<Route> {
        self.record("add_route", router)?;
        let mut state = self.state.lock();
        if !state.routers.contains_key(&router) {
            return Err(ClientError::not_found("router", router));
        }
        if let Some(port_id) = spec.next_hop_port {
            let port = state.port(port_id)?;
            if port.device_id != DeviceId::Router(router) {
                return Err(ClientError::invalid_request(format!(
                    "next hop port {} is not on router {}",
                    port_id, router
                )));
            }
        }
        let route = Route {
            id: RouteId::new_v4(),
            router_id: router,
            spec: spec.clone(),
        };
        state.routes.push(route.clone());
        Ok(route)
    }

    fn list_routes(&self, router: RouterId) -> ClientResult<Vec<Route>> {
        self.record("list_routes", router)?;
        let state = self.state.lock();
        if !state.routers.contains_key(&router) {
            return Err(ClientError::not_found("router", router));
        }
        Ok(state
            .routes
            .iter()
            .filter(|r| r.router_id == router)
            .cloned()
            .collect())
    }

    fn delete_route(&self, id: RouteId) -> ClientResult<()> {
        self.record("delete_route", id)?;
        let mut state = self.state.lock();
        let before = state.routes.len();
        state.routes.retain(|r| r.id != id);
        if state.routes.len() == before {
            return Err(ClientError::not_found("route", id));
        }
        Ok(())
    }

    // ============ IP address groups ============

    fn create_ip_addr_group(&self, id: IpAddrGroupId, name: &str) -> ClientResult<IpAddrGroup> {
        self.record("create_ip_addr_group", id)?;
        let mut state = self.state.lock();
        if state.ip_addr_groups.contains_key(&id) {
            return Err(ClientError::already_exists("ip_addr_group", id));
        }
        let group = IpAddrGroup {
            id,
            name: name.to_string(),
            addresses: BTreeSet::new(),
        };
        state.ip_addr_groups.insert(id, group.clone());
        Ok(group)
    }

    fn get_ip_addr_group(&self, id: IpAddrGroupId) -> ClientResult<IpAddrGroup> {
        self.record("get_ip_addr_group", id)?;
        self.state
            .lock()
            .ip_addr_groups
            .get(&id)
            .cloned()
            .ok_or_else(|| ClientError::not_found("ip_addr_group", id))
    }

    fn delete_ip_addr_group(&self, id: IpAddrGroupId) -> ClientResult<()> {
        self.record("delete_ip_addr_group", id)?;
        self.state
            .lock()
            .ip_addr_groups
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ClientError::not_found("ip_addr_group", id))
    }

    fn add_ip_addr_group_address(&self, id: IpAddrGroupId, addr: IpAddress) -> ClientResult<()> {
        self.record("add_ip_addr_group_address", id)?;
        let mut state = self.state.lock();
        let group = state
            .ip_addr_groups
            .get_mut(&id)
            .ok_or_else(|| ClientError::not_found("ip_addr_group", id))?;
        group.addresses.insert(addr);
        Ok(())
    }

    fn remove_ip_addr_group_address(
        &self,
        id: IpAddrGroupId,
        addr: IpAddress,
    ) -> ClientResult<()> {
        self.record("remove_ip_addr_group_address", id)?;
        let mut state = self.state.lock();
        let group = state
            .ip_addr_groups
            .get_mut(&id)
            .ok_or_else(|| ClientError::not_found("ip_addr_group", id))?;
        group.addresses.remove(&addr);
        Ok(())
    }

    // ============ DHCP ============

    fn create_dhcp_subnet(&self, bridge: BridgeId, subnet: &DhcpSubnet) -> ClientResult<()> {
        self.record("create_dhcp_subnet", bridge)?;
        let mut state = self.state.lock();
        if !state.bridges.contains_key(&bridge) {
            return Err(ClientError::not_found("bridge", bridge));
        }
        let entries = state.dhcp.entry(bridge).or_default();
        if entries.iter().any(|e| e.subnet.subnet == subnet.subnet) {
            return Err(ClientError::already_exists("dhcp_subnet", subnet.subnet));
        }
        entries.push(DhcpEntry {
            subnet: subnet.clone(),
            hosts: Vec::new(),
        });
        Ok(())
    }

    fn get_dhcp_subnet(&self, bridge: BridgeId, subnet: IpPrefix) -> ClientResult<DhcpSubnet> {
        self.record("get_dhcp_subnet", bridge)?;
        Ok(self.state.lock().dhcp_entry_mut(bridge, subnet)?.subnet.clone())
    }

    fn update_dhcp_subnet(&self, bridge: BridgeId, subnet: &DhcpSubnet) -> ClientResult<()> {
        self.record("update_dhcp_subnet", bridge)?;
        self.state.lock().dhcp_entry_mut(bridge, subnet.subnet)?.subnet = subnet.clone();
        Ok(())
    }

    fn delete_dhcp_subnet(&self, bridge: BridgeId, subnet: IpPrefix) -> ClientResult<()> {
        self.record("delete_dhcp_subnet", bridge)?;
        let mut state = self.state.lock();
        let entries = state
            .dhcp
            .get_mut(&bridge)
            .ok_or_else(|| ClientError::not_found("dhcp_subnet", subnet))?;
        let before = entries.len();
        entries.retain(|e| e.subnet.subnet != subnet);
        if entries.len() == before {
            return Err(ClientError::not_found("dhcp_subnet", subnet));
        }
        Ok(())
    }

    fn add_dhcp_host(
        &self,
        bridge: BridgeId,
        subnet: IpPrefix,
        host: &DhcpHost,
    ) -> ClientResult<()> {
        self.record("add_dhcp_host", bridge)?;
        let mut state = self.state.lock();
        let entry = state.dhcp_entry_mut(bridge, subnet)?;
        if !entry.hosts.contains(host) {
            entry.hosts.push(*host);
        }
        Ok(())
    }

    fn remove_dhcp_host(
        &self,
        bridge: BridgeId,
        subnet: IpPrefix,
        host: &DhcpHost,
    ) -> ClientResult<()> {
        self.record("remove_dhcp_host", bridge)?;
        let mut state = self.state.lock();
        let entry = state.dhcp_entry_mut(bridge, subnet)?;
        let before = entry.hosts.len();
        entry.hosts.retain(|h| h != host);
        if entry.hosts.len() == before {
            return Err(ClientError::not_found("dhcp_host", host.mac));
        }
        Ok(())
    }

    fn list_dhcp_hosts(&self, bridge: BridgeId, subnet: IpPrefix) -> ClientResult<Vec<DhcpHost>> {
        self.record("list_dhcp_hosts", bridge)?;
        Ok(self.state.lock().dhcp_entry_mut(bridge, subnet)?.hosts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RouteType;
    use pretty_assertions::assert_eq;

    fn accept() -> RuleSpec {
        RuleSpec::new(RuleAction::Accept)
    }

    #[test]
    fn test_rule_positions_push_down() {
        let controller = MemoryController::new();
        let chain = controller.create_chain("t", "c").unwrap();

        let first = controller.add_rule(chain.id, &accept(), 1).unwrap();
        let second = controller
            .add_rule(chain.id, &RuleSpec::new(RuleAction::Drop), 1)
            .unwrap();
        let appended = controller.add_rule(chain.id, &accept(), 3).unwrap();

        let ids: Vec<RuleId> = controller
            .list_rules(chain.id)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id, appended.id]);

        let err = controller.add_rule(chain.id, &accept(), 5).unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest { .. }));
        assert!(controller.add_rule(chain.id, &accept(), 0).is_err());
    }

    #[test]
    fn test_remove_rules_by_property() {
        let controller = MemoryController::new();
        let chain = controller.create_chain("t", "nat").unwrap();
        let tagged = accept().with_property("OS_FLOATING_IP", "fip-1");
        controller.add_rule(chain.id, &tagged, 1).unwrap();
        controller.add_rule(chain.id, &tagged, 1).unwrap();
        controller.add_rule(chain.id, &accept(), 1).unwrap();

        let removed = controller
            .remove_rules_by_property("t", "nat", "OS_FLOATING_IP", "fip-1")
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(controller.list_rules(chain.id).unwrap().len(), 1);

        let err = controller
            .remove_rules_by_property("t", "missing", "k", "v")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_link_is_exclusive_and_delete_unlinks() {
        let controller = MemoryController::new();
        let bridge = controller.create_bridge(&BridgeSpec::new("t", "b")).unwrap();
        let router = controller.create_router(&RouterSpec::new("t", "r")).unwrap();
        let bp = controller.create_bridge_port(bridge.id, true).unwrap();
        let rp = controller
            .create_router_port(
                router.id,
                &RouterPortSpec::new(
                    IpAddress::v4(10, 0, 0, 1),
                    "10.0.0.1/24".parse().unwrap(),
                ),
            )
            .unwrap();
        assert_eq!(
            controller.get_port(rp.id).unwrap().address.unwrap().network,
            "10.0.0.0/24".parse::<IpPrefix>().unwrap()
        );

        controller.link(bp.id, rp.id).unwrap();
        let other = controller.create_bridge_port(bridge.id, true).unwrap();
        assert!(controller.link(other.id, rp.id).is_err());

        let peers = controller.list_peer_ports(DeviceId::Bridge(bridge.id)).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, rp.id);

        controller.delete_port(rp.id).unwrap();
        assert_eq!(controller.get_port(bp.id).unwrap().peer_id, None);
    }

    #[test]
    fn test_delete_router_cascades() {
        let controller = MemoryController::new();
        let router = controller.create_router(&RouterSpec::new("t", "r")).unwrap();
        let port = controller
            .create_router_port(
                router.id,
                &RouterPortSpec::new(
                    IpAddress::v4(169, 254, 255, 2),
                    "169.254.255.0/30".parse().unwrap(),
                ),
            )
            .unwrap();
        let route = controller
            .add_route(router.id, &RouteSpec::normal(IpPrefix::ANY_V4, port.id))
            .unwrap();
        assert_eq!(route.spec.route_type, RouteType::Normal);

        controller.delete_router(router.id).unwrap();
        assert_eq!(controller.port_count(), 0);
        assert_eq!(controller.route_count(), 0);
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let controller = MemoryController::new();
        controller.fail_on_nth("create_chain", 1);

        controller.create_chain("t", "a").unwrap();
        let err = controller.create_chain("t", "b").unwrap_err();
        assert!(matches!(err, ClientError::Rejected { .. }));
        controller.create_chain("t", "b").unwrap();

        let ops: Vec<&str> = controller.calls().iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec!["create_chain", "create_chain", "create_chain"]);
    }

    #[test]
    fn test_dhcp_hosts() {
        let controller = MemoryController::new();
        let bridge = controller.create_bridge(&BridgeSpec::new("t", "b")).unwrap();
        let subnet: IpPrefix = "10.0.0.0/24".parse().unwrap();
        controller
            .create_dhcp_subnet(
                bridge.id,
                &DhcpSubnet {
                    subnet,
                    default_gateway: Some(IpAddress::v4(10, 0, 0, 1)),
                    dns_servers: vec![],
                    host_routes: vec![],
                    enabled: true,
                },
            )
            .unwrap();
        let host = DhcpHost {
            mac: "fa:16:3e:00:00:01".parse().unwrap(),
            ip: IpAddress::v4(10, 0, 0, 3),
        };
        controller.add_dhcp_host(bridge.id, subnet, &host).unwrap();
        assert_eq!(controller.list_dhcp_hosts(bridge.id, subnet).unwrap(), vec![host]);

        controller.remove_dhcp_host(bridge.id, subnet, &host).unwrap();
        assert!(controller.remove_dhcp_host(bridge.id, subnet, &host).is_err());
    }
}
