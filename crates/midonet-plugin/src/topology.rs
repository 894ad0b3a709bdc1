//! Router-level wiring: tenant router gateways, external networks on the
//! provider router, router interfaces and provider host routes.
//!
//! ```text
//!                     provider router
//!          169.254.255.1/30 |        | gw_ip in cidr
//!                           |        |
//!          169.254.255.2/30 |        +---- external bridge
//!                   tenant router
//!                           | port_ip in cidr
//!                      tenant bridge
//! ```
//!
//! A tenant router moves `Unlinked -> Linked -> SnatConfigured` as its
//! gateway is set and SNAT enabled; [`RouterTopologyManager::link_state`]
//! derives the state from the controller.

use crate::chains::nat;
use crate::error::{PluginError, Result};
use crate::mapper::{SNAT_TAG_VALUE, TENANT_ROUTER_RULE_TAG};
use crate::txn::UnitOfWork;
use crate::{debug_log, info_log, warn_log};
use midonet_client::api::{DeviceId, Port, PortUpdate, Route, RouteSpec, Router, RouterPortSpec};
use midonet_client::{BridgeId, Controller, PortId, RouterId};
use midonet_types::{IpAddress, IpPrefix};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use uuid::Uuid;

/// Provider end of a tenant router's uplink.
pub const PROVIDER_UPLINK_ADDR: IpAddress = IpAddress::v4(169, 254, 255, 1);

/// Tenant router end of its uplink.
pub const TENANT_UPLINK_ADDR: IpAddress = IpAddress::v4(169, 254, 255, 2);

pub const UPLINK_NETWORK: IpPrefix = IpPrefix::v4(169, 254, 255, 0, 30);

/// Metadata service address VMs reach through their router.
pub const METADATA_PREFIX: IpPrefix = IpPrefix::v4(169, 254, 169, 254, 32);

const SOURCE: &str = "RouterTopologyManager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterLinkState {
    Unlinked,
    Linked,
    SnatConfigured,
}

/// Both ends of a tenant router's uplink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uplink {
    pub provider_port: Port,
    pub router_port: Port,
}

pub struct RouterTopologyManager {
    controller: Arc<dyn Controller>,
    provider_router_id: RouterId,
    provider: OnceCell<Router>,
}

impl std::fmt::Debug for RouterTopologyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterTopologyManager")
            .field("provider_router_id", &self.provider_router_id)
            .field("provider_resolved", &self.provider.get().is_some())
            .finish()
    }
}

impl RouterTopologyManager {
    pub fn new(controller: Arc<dyn Controller>, provider_router_id: RouterId) -> Self {
        Self {
            controller,
            provider_router_id,
            provider: OnceCell::new(),
        }
    }

    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    pub fn provider_router_id(&self) -> RouterId {
        self.provider_router_id
    }

    /// The provider router, fetched on first use and cached afterwards.
    pub fn provider_router(&self) -> Result<&Router> {
        self.provider.get_or_try_init(|| {
            let router = self.controller.get_router(self.provider_router_id)?;
            info_log!(SOURCE, provider_router = %router.id, "Resolved provider router");
            Ok(router)
        })
    }

    fn provider_device(&self) -> Result<DeviceId> {
        Ok(DeviceId::Router(self.provider_router()?.id))
    }

    /// Ports on `device` linked to a port on `peer`.
    pub fn link_ports(&self, device: DeviceId, peer: DeviceId) -> Result<Vec<Port>> {
        Ok(self
            .controller
            .list_peer_ports(peer)?
            .into_iter()
            .filter(|p| p.device_id == device)
            .collect())
    }

    /// The port on `device` linked to `peer`, if any.
    pub fn link_port(&self, device: DeviceId, peer: DeviceId) -> Result<Option<Port>> {
        Ok(self.link_ports(device, peer)?.into_iter().next())
    }

    /// The tenant router's port linked to the provider router.
    pub fn uplink_port(&self, router: RouterId) -> Result<Option<Port>> {
        self.link_port(DeviceId::Router(router), self.provider_device()?)
    }

    // ============ Tenant router gateway ============

    /// Links `router` to the provider router and routes `gw_ip` down to it.
    pub fn set_gateway(&self, uow: &mut UnitOfWork<'_>, router: RouterId, gw_ip: IpAddress) -> Result<Uplink> {
        let provider = self.provider_router()?.id;

        let provider_port =
            uow.create_router_port(provider, &RouterPortSpec::new(PROVIDER_UPLINK_ADDR, UPLINK_NETWORK))?;
        let router_port =
            uow.create_router_port(router, &RouterPortSpec::new(TENANT_UPLINK_ADDR, UPLINK_NETWORK))?;
        uow.link(provider_port.id, router_port.id)?;

        uow.add_route(provider, &RouteSpec::normal(IpPrefix::host(gw_ip), provider_port.id))?;
        uow.add_route(router, &RouteSpec::normal(IpPrefix::ANY_V4, router_port.id))?;

        info_log!(SOURCE, router = %router, %gw_ip, "Linked router to provider");
        Ok(Uplink {
            provider_port,
            router_port,
        })
    }

    /// Adds dynamic SNAT behind `gw_ip` when `enable_snat` is set. Returns
    /// whether rules were added.
    pub fn configure_snat(
        &self,
        uow: &mut UnitOfWork<'_>,
        tenant_id: &str,
        router_id: Uuid,
        gw_ip: IpAddress,
        uplink: PortId,
        enable_snat: bool,
    ) -> Result<bool> {
        if !enable_snat {
            debug_log!(SOURCE, router = %router_id, "SNAT disabled, skipping");
            return Ok(false);
        }
        let chains = nat::nat_chains(uow.controller(), tenant_id, router_id)?;
        nat::add_dynamic_snat(uow, &chains, gw_ip, uplink)?;
        Ok(true)
    }

    /// [`set_gateway`](Self::set_gateway) followed by
    /// [`configure_snat`](Self::configure_snat) on the new uplink.
    pub fn setup_gateway(
        &self,
        uow: &mut UnitOfWork<'_>,
        tenant_id: &str,
        router_id: Uuid,
        gw_ip: IpAddress,
        enable_snat: bool,
    ) -> Result<Uplink> {
        let uplink = self.set_gateway(uow, RouterId::from_uuid(router_id), gw_ip)?;
        self.configure_snat(uow, tenant_id, router_id, gw_ip, uplink.router_port.id, enable_snat)?;
        Ok(uplink)
    }

    /// Undoes [`setup_gateway`](Self::setup_gateway). Pieces already gone
    /// are skipped.
    pub fn remove_gateway(&self, tenant_id: &str, router_id: Uuid) -> Result<()> {
        match nat::remove_dynamic_snat(self.controller.as_ref(), tenant_id, router_id) {
            Err(PluginError::Controller(e)) if e.is_not_found() => {
                warn_log!(SOURCE, router = %router_id, "NAT chains missing while removing gateway");
            }
            other => {
                other?;
            }
        }

        let router = RouterId::from_uuid(router_id);
        let provider = self.provider_router()?.id;
        let provider_routes = self.controller.list_routes(provider)?;
        for port in self.controller.list_ports(DeviceId::Router(router))? {
            if port.port_address() != Some(TENANT_UPLINK_ADDR) {
                continue;
            }
            if let Some(peer) = port.peer_id {
                self.delete_routes_via(&provider_routes, peer)?;
                self.controller.unlink(port.id)?;
                self.controller.delete_port(peer)?;
            }
            self.controller.delete_port(port.id)?;
        }

        for route in self.controller.list_routes(router)? {
            if route.spec.dst_network.is_default() {
                self.controller.delete_route(route.id)?;
            }
        }
        info_log!(SOURCE, router = %router_id, "Removed router gateway");
        Ok(())
    }

    pub fn link_state(&self, tenant_id: &str, router_id: Uuid) -> Result<RouterLinkState> {
        let uplink = self.uplink_port(RouterId::from_uuid(router_id))?;
        if uplink.is_none() {
            return Ok(RouterLinkState::Unlinked);
        }
        let chains = nat::nat_chains(self.controller.as_ref(), tenant_id, router_id)?;
        let snat = self
            .controller
            .list_rules(chains.post_routing.id)?
            .iter()
            .any(|r| r.spec.property(TENANT_ROUTER_RULE_TAG) == Some(SNAT_TAG_VALUE));
        Ok(if snat {
            RouterLinkState::SnatConfigured
        } else {
            RouterLinkState::Linked
        })
    }

    // ============ External networks ============

    /// Attaches an external network's bridge to the provider router at
    /// `gw_ip`, black-holing `cidr` until hosts get their own routes.
    pub fn link_to_provider(
        &self,
        uow: &mut UnitOfWork<'_>,
        bridge: BridgeId,
        gw_ip: IpAddress,
        cidr: IpPrefix,
    ) -> Result<()> {
        let provider = self.provider_router()?.id;
        let provider_port = uow.create_router_port(provider, &RouterPortSpec::new(gw_ip, cidr))?;
        let bridge_port = uow.create_bridge_port(bridge, true)?;
        uow.link(provider_port.id, bridge_port.id)?;
        uow.add_route(provider, &RouteSpec::black_hole(cidr.network()))?;
        info_log!(SOURCE, bridge = %bridge, %cidr, %gw_ip, "Linked external network to provider");
        Ok(())
    }

    /// Undoes [`link_to_provider`](Self::link_to_provider) for one subnet.
    pub fn unlink_from_provider(&self, bridge: BridgeId, cidr: IpPrefix) -> Result<()> {
        let provider = self.provider_router()?.id;
        let network = cidr.network();
        let routes = self.controller.list_routes(provider)?;
        for route in routes.iter().filter(|r| r.spec.dst_network.network() == network) {
            self.controller.delete_route(route.id)?;
        }

        let provider_ports = self.link_ports(DeviceId::Router(provider), DeviceId::Bridge(bridge))?;
        for port in provider_ports
            .iter()
            .filter(|p| p.address.map_or(false, |a| a.network == network))
        {
            self.delete_routes_via(&routes, port.id)?;
            self.controller.unlink(port.id)?;
            self.controller.delete_port(port.id)?;
            if let Some(bridge_port) = port.peer_id {
                self.controller.delete_port(bridge_port)?;
            }
        }
        info_log!(SOURCE, bridge = %bridge, %cidr, "Unlinked external network from provider");
        Ok(())
    }

    // ============ Router interfaces ============

    /// Attaches `router` to a tenant bridge through `bridge_port`.
    pub fn link_router_to_bridge(
        &self,
        uow: &mut UnitOfWork<'_>,
        router: RouterId,
        bridge_port: &Port,
        cidr: IpPrefix,
        port_ip: IpAddress,
    ) -> Result<Port> {
        let spec = RouterPortSpec {
            port_address: port_ip,
            network: cidr,
            admin_state_up: bridge_port.admin_state_up,
        };
        let router_port = uow.create_router_port(router, &spec)?;
        uow.link(router_port.id, bridge_port.id)?;
        uow.add_route(router, &RouteSpec::normal(cidr.network(), router_port.id))?;
        info_log!(SOURCE, router = %router, %cidr, "Linked router to bridge");
        Ok(router_port)
    }

    /// Routes metadata requests from `cidr` through `router_port` to the
    /// subnet's DHCP port at `dhcp_ip`.
    pub fn add_metadata_route(
        &self,
        uow: &mut UnitOfWork<'_>,
        router: RouterId,
        router_port: PortId,
        cidr: IpPrefix,
        dhcp_ip: IpAddress,
    ) -> Result<Route> {
        let metadata = RouteSpec::normal(METADATA_PREFIX, router_port)
            .with_src(cidr.network())
            .with_gateway(dhcp_ip);
        let route = uow.add_route(router, &metadata)?;
        debug_log!(SOURCE, router = %router, %cidr, via = %dhcp_ip, "Added metadata route");
        Ok(route)
    }

    /// Detaches the router behind `bridge_port`: drops routes through the
    /// router-side port, unlinks and deletes it.
    pub fn unlink_router_from_bridge(&self, router: RouterId, bridge_port: PortId) -> Result<()> {
        let port = self.controller.get_port(bridge_port)?;
        let Some(peer) = port.peer_id else {
            debug_log!(SOURCE, port = %bridge_port, "Bridge port not linked");
            return Ok(());
        };
        let routes = self.controller.list_routes(router)?;
        self.delete_routes_via(&routes, peer)?;
        self.controller.unlink(bridge_port)?;
        self.controller.delete_port(peer)?;
        info_log!(SOURCE, router = %router, port = %bridge_port, "Unlinked router from bridge");
        Ok(())
    }

    /// Mirrors an admin state change onto a router interface's router-side
    /// port.
    pub fn set_peer_admin_state(&self, bridge_port: PortId, admin_state_up: bool) -> Result<()> {
        let port = self.controller.get_port(bridge_port)?;
        if let Some(peer) = port.peer_id {
            self.controller.update_port(
                peer,
                &PortUpdate {
                    admin_state_up: Some(admin_state_up),
                    ..PortUpdate::default()
                },
            )?;
        }
        Ok(())
    }

    // ============ Provider host routes ============

    /// Routes `ip/32` on the provider router through its port linked to
    /// `device`, preferring the port whose network holds `ip`.
    pub fn add_route_to_provider(&self, uow: &mut UnitOfWork<'_>, device: DeviceId, ip: IpAddress) -> Result<Route> {
        let provider = self.provider_router()?.id;
        let ports = self.link_ports(DeviceId::Router(provider), device)?;
        let port = ports
            .iter()
            .find(|p| p.address.map_or(false, |a| a.network.contains(&ip)))
            .or_else(|| ports.first())
            .ok_or_else(|| PluginError::not_found("provider_link", device.as_uuid()))?;
        let route = uow.add_route(provider, &RouteSpec::normal(IpPrefix::host(ip), port.id))?;
        debug_log!(SOURCE, %ip, next_hop = %port.id, "Added provider host route");
        Ok(route)
    }

    /// Deletes every provider route for `ip/32`.
    pub fn remove_route_from_provider(&self, uow: &mut UnitOfWork<'_>, ip: IpAddress) -> Result<usize> {
        let provider = self.provider_router()?.id;
        let host = IpPrefix::host(ip);
        let mut removed = 0;
        for route in self.controller.list_routes(provider)? {
            if route.spec.dst_network == host {
                uow.delete_route(&route)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn delete_routes_via(&self, routes: &[Route], port: PortId) -> Result<()> {
        for route in routes.iter().filter(|r| r.spec.next_hop_port == Some(port)) {
            match self.controller.delete_route(route.id) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midonet_client::api::{RouteType, RouterSpec};
    use midonet_client::MemoryController;
    use pretty_assertions::assert_eq;

    struct Fixture {
        controller: Arc<MemoryController>,
        topology: RouterTopologyManager,
        provider: RouterId,
    }

    fn fixture() -> Fixture {
        let controller = Arc::new(MemoryController::new());
        let provider = controller
            .create_router(&RouterSpec::new("admin", "provider"))
            .unwrap()
            .id;
        let topology = RouterTopologyManager::new(controller.clone(), provider);
        Fixture {
            controller,
            topology,
            provider,
        }
    }

    fn tenant_router(f: &Fixture) -> (RouterId, nat::NatChains) {
        let mut uow = UnitOfWork::new(f.controller.as_ref(), "create_router");
        let router = uow.create_router(&RouterSpec::new("tenant", "r1")).unwrap();
        let chains = nat::create_nat_chains(&mut uow, "tenant", router.id.as_uuid()).unwrap();
        (router.id, chains)
    }

    #[test]
    fn test_provider_router_is_cached() {
        let f = fixture();
        f.topology.provider_router().unwrap();
        f.topology.provider_router().unwrap();
        let fetches = f
            .controller
            .calls()
            .iter()
            .filter(|c| c.operation == "get_router")
            .count();
        assert_eq!(fetches, 1);
    }

    #[test]
    fn test_missing_provider_router() {
        let controller = Arc::new(MemoryController::new());
        let topology = RouterTopologyManager::new(controller, RouterId::new_v4());
        assert!(topology.provider_router().is_err());
    }

    #[test]
    fn test_gateway_lifecycle() {
        let f = fixture();
        let (router, chains) = tenant_router(&f);
        let gw_ip = IpAddress::v4(10, 0, 0, 5);
        assert_eq!(
            f.topology.link_state("tenant", router.as_uuid()).unwrap(),
            RouterLinkState::Unlinked
        );

        let mut uow = UnitOfWork::new(f.controller.as_ref(), "set_gateway");
        let uplink = f
            .topology
            .setup_gateway(&mut uow, "tenant", router.as_uuid(), gw_ip, true)
            .unwrap();
        assert_eq!(uplink.router_port.port_address(), Some(TENANT_UPLINK_ADDR));
        assert_eq!(
            f.topology.link_state("tenant", router.as_uuid()).unwrap(),
            RouterLinkState::SnatConfigured
        );

        let provider_routes = f.controller.list_routes(f.provider).unwrap();
        assert_eq!(provider_routes.len(), 1);
        assert_eq!(provider_routes[0].spec.dst_network, IpPrefix::host(gw_ip));
        assert_eq!(provider_routes[0].spec.next_hop_port, Some(uplink.provider_port.id));
        let router_routes = f.controller.list_routes(router).unwrap();
        assert!(router_routes[0].spec.dst_network.is_default());
        assert_eq!(
            f.topology.uplink_port(router).unwrap().map(|p| p.id),
            Some(uplink.router_port.id)
        );

        f.topology.remove_gateway("tenant", router.as_uuid()).unwrap();
        assert_eq!(
            f.topology.link_state("tenant", router.as_uuid()).unwrap(),
            RouterLinkState::Unlinked
        );
        assert_eq!(f.controller.route_count(), 0);
        assert!(f.controller.list_rules(chains.pre_routing.id).unwrap().is_empty());
        assert!(f.controller.list_ports(DeviceId::Router(f.provider)).unwrap().is_empty());
    }

    #[test]
    fn test_gateway_without_snat_is_linked() {
        let f = fixture();
        let (router, _) = tenant_router(&f);
        let mut uow = UnitOfWork::new(f.controller.as_ref(), "set_gateway");
        f.topology
            .setup_gateway(&mut uow, "tenant", router.as_uuid(), IpAddress::v4(10, 0, 0, 6), false)
            .unwrap();
        assert_eq!(
            f.topology.link_state("tenant", router.as_uuid()).unwrap(),
            RouterLinkState::Linked
        );
    }

    #[test]
    fn test_external_network_link() {
        let f = fixture();
        let mut uow = UnitOfWork::new(f.controller.as_ref(), "create_subnet");
        let bridge = uow
            .create_bridge(&midonet_client::api::BridgeSpec::new("admin", "ext"))
            .unwrap();
        let cidr: IpPrefix = "200.0.0.0/24".parse().unwrap();
        f.topology
            .link_to_provider(&mut uow, bridge.id, IpAddress::v4(200, 0, 0, 1), cidr)
            .unwrap();

        let routes = f.controller.list_routes(f.provider).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].spec.route_type, RouteType::BlackHole);

        let host = IpAddress::v4(200, 0, 0, 20);
        f.topology
            .add_route_to_provider(&mut uow, DeviceId::Bridge(bridge.id), host)
            .unwrap();
        assert_eq!(f.controller.list_routes(f.provider).unwrap().len(), 2);
        assert_eq!(f.topology.remove_route_from_provider(&mut uow, host).unwrap(), 1);

        f.topology.unlink_from_provider(bridge.id, cidr).unwrap();
        assert_eq!(f.controller.route_count(), 0);
        assert!(f.controller.list_ports(DeviceId::Bridge(bridge.id)).unwrap().is_empty());
        assert!(f.controller.list_ports(DeviceId::Router(f.provider)).unwrap().is_empty());
    }

    #[test]
    fn test_router_interface_link() {
        let f = fixture();
        let (router, _) = tenant_router(&f);
        let mut uow = UnitOfWork::new(f.controller.as_ref(), "add_router_interface");
        let bridge = uow
            .create_bridge(&midonet_client::api::BridgeSpec::new("tenant", "net"))
            .unwrap();
        let bridge_port = uow.create_bridge_port(bridge.id, true).unwrap();
        let cidr: IpPrefix = "10.0.0.0/24".parse().unwrap();

        let router_port = f
            .topology
            .link_router_to_bridge(&mut uow, router, &bridge_port, cidr, IpAddress::v4(10, 0, 0, 1))
            .unwrap();
        f.topology
            .add_metadata_route(&mut uow, router, router_port.id, cidr, IpAddress::v4(10, 0, 0, 2))
            .unwrap();
        let routes = f.controller.list_routes(router).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[1].spec.dst_network, METADATA_PREFIX);
        assert_eq!(routes[1].spec.src_network, cidr);
        assert_eq!(routes[1].spec.next_hop_gateway, Some(IpAddress::v4(10, 0, 0, 2)));

        f.topology.set_peer_admin_state(bridge_port.id, false).unwrap();
        assert!(!f.controller.get_port(router_port.id).unwrap().admin_state_up);

        f.topology.unlink_router_from_bridge(router, bridge_port.id).unwrap();
        assert!(f.controller.list_routes(router).unwrap().is_empty());
        assert!(f.controller.get_port(router_port.id).is_err());
        assert!(!f.controller.get_port(bridge_port.id).unwrap().is_linked());
    }
}
