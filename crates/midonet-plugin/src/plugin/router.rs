use super::MidonetPlugin;
use crate::audit::AuditCategory;
use crate::chains::{nat, port as port_chains, security_group as sg_chains};
use crate::dhcp;
use crate::error::{PluginError, Result};
use crate::mapper::{self, bridge_id};
use crate::model::{
    DeviceOwner, FixedIp, GatewayInfo, GatewayRequest, InterfaceTarget, Port, PortStatus, Router,
    RouterInterface, RouterRequest, RouterUpdate, Subnet,
};
use crate::store::{PortFilter, StoreError};
use crate::txn::UnitOfWork;
use midonet_client::api::{RouterSpec, RouterUpdate as ControllerRouterUpdate};
use midonet_client::PortId;
use midonet_types::{IpAddress, MacAddress};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Locally administered MAC for ports the plugin creates itself.
fn generated_mac(port_id: Uuid) -> MacAddress {
    let b = port_id.as_bytes();
    MacAddress::new([0xfa, 0x16, 0x3e, b[0], b[1], b[2]])
}

fn interface_filter(router_id: Uuid) -> PortFilter {
    PortFilter::default()
        .owned_by(DeviceOwner::RouterInterface)
        .for_device(router_id.to_string())
}

impl MidonetPlugin {
    // ============ Routers ============

    /// Creates the router with its NAT chains as inbound and outbound
    /// filters, then the gateway if one is requested.
    pub fn create_router(&self, request: RouterRequest) -> Result<Router> {
        let result = self.coordinator.run("create_router", |uow| {
            let created = uow.create_router(&RouterSpec {
                tenant_id: request.tenant_id.clone(),
                name: request.name.clone(),
                admin_state_up: request.admin_state_up,
            })?;
            let id = created.id.as_uuid();
            let chains = nat::create_nat_chains(uow, &request.tenant_id, id)?;
            uow.controller().update_router(
                created.id,
                &ControllerRouterUpdate {
                    inbound_filter: Some(chains.pre_routing.id),
                    outbound_filter: Some(chains.post_routing.id),
                    ..ControllerRouterUpdate::default()
                },
            )?;

            let mut router = self.stores.routers.create_router(Router {
                id,
                tenant_id: request.tenant_id,
                name: request.name,
                admin_state_up: request.admin_state_up,
                gateway: None,
                gw_port_id: None,
            })?;
            if let Some(gateway) = request.gateway {
                self.attach_gateway(uow, &mut router, gateway)?;
                router = self.stores.routers.update_router(router)?;
            }
            info!(router = %router.id, gateway = router.gateway.is_some(), "Created router");
            Ok(router)
        });
        self.audit(
            AuditCategory::ResourceCreate,
            "create_router",
            "router",
            result.as_ref().ok().map(|r| r.id),
            &result,
        );
        result
    }

    pub fn get_router(&self, id: Uuid) -> Result<Router> {
        Ok(self.stores.router(id)?)
    }

    pub fn update_router(&self, id: Uuid, update: RouterUpdate) -> Result<Router> {
        let result = self.coordinator.run("update_router", |uow| {
            let mut router = self.stores.router(id)?;
            if let Some(name) = &update.name {
                router.name = name.clone();
            }
            if let Some(admin_state_up) = update.admin_state_up {
                router.admin_state_up = admin_state_up;
            }
            if let Some(gateway) = update.gateway {
                self.detach_gateway(&mut router)?;
                if let Some(gateway) = gateway {
                    self.attach_gateway(uow, &mut router, gateway)?;
                }
            }
            if update.name.is_some() || update.admin_state_up.is_some() {
                uow.controller().update_router(
                    mapper::router_id(id),
                    &ControllerRouterUpdate {
                        name: update.name,
                        admin_state_up: update.admin_state_up,
                        ..ControllerRouterUpdate::default()
                    },
                )?;
            }
            Ok(self.stores.routers.update_router(router)?)
        });
        self.audit(AuditCategory::ResourceModify, "update_router", "router", Some(id), &result);
        result
    }

    /// Deletes a router with no interfaces and no floating IPs.
    pub fn delete_router(&self, id: Uuid) -> Result<()> {
        let result = self.coordinator.run("delete_router", |_| {
            let mut router = self.stores.router(id)?;
            let interfaces = self.stores.ports.list_ports(&interface_filter(id))?;
            if !interfaces.is_empty() {
                return Err(PluginError::in_use(
                    "router",
                    id,
                    format!("{} interface(s) attached", interfaces.len()),
                ));
            }
            self.stores.routers.delete_router(id)?;

            self.detach_gateway(&mut router)?;
            nat::delete_nat_chains(self.controller.as_ref(), &router.tenant_id, id)?;
            match self.controller.delete_router(mapper::router_id(id)) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
            info!(router = %id, "Deleted router");
            Ok(())
        });
        self.audit(AuditCategory::ResourceDelete, "delete_router", "router", Some(id), &result);
        result
    }

    // ============ Gateway ============

    /// Records the gateway port on the external network and links the
    /// router to the provider router behind `external_ip`.
    fn attach_gateway(&self, uow: &mut UnitOfWork<'_>, router: &mut Router, gateway: GatewayRequest) -> Result<()> {
        let network = self.stores.network(gateway.network_id)?;
        if !network.external {
            return Err(PluginError::invalid(format!(
                "network {} is not external",
                network.id
            )));
        }
        let subnet = self.stores.subnet(gateway.external_ip.subnet_id)?;
        let gw_ip = gateway.external_ip.ip_address;
        if subnet.network_id != network.id || !subnet.cidr.contains(&gw_ip) {
            return Err(PluginError::invalid(format!(
                "{} is not an address of subnet {} on network {}",
                gw_ip, subnet.id, network.id
            )));
        }

        let bridge_port = uow.create_bridge_port(bridge_id(network.id), true)?;
        let port_uuid = bridge_port.id.as_uuid();
        let port = self.stores.ports.create_port(Port {
            id: port_uuid,
            tenant_id: String::new(),
            network_id: network.id,
            name: String::new(),
            mac_address: generated_mac(port_uuid),
            fixed_ips: vec![gateway.external_ip],
            device_owner: DeviceOwner::RouterGateway,
            device_id: router.id.to_string(),
            security_groups: Vec::new(),
            admin_state_up: true,
            status: PortStatus::Active,
        })?;

        self.topology
            .setup_gateway(uow, &router.tenant_id, router.id, gw_ip, gateway.enable_snat)?;
        router.gateway = Some(GatewayInfo {
            network_id: network.id,
            subnet_id: subnet.id,
            external_ip: gw_ip,
            enable_snat: gateway.enable_snat,
        });
        router.gw_port_id = Some(port.id);
        Ok(())
    }

    /// Removes the uplink, SNAT rules and gateway port. A router without a
    /// gateway is left alone.
    fn detach_gateway(&self, router: &mut Router) -> Result<()> {
        let Some(gateway) = router.gateway.take() else {
            return Ok(());
        };
        self.topology.remove_gateway(&router.tenant_id, router.id)?;
        if let Some(port) = router.gw_port_id.take() {
            match self.stores.ports.delete_port(port) {
                Err(StoreError::NotFound { .. }) | Ok(()) => {}
                Err(e) => return Err(e.into()),
            }
            match self.controller.delete_port(mapper::port_id(port)) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }
        debug!(router = %router.id, external_ip = %gateway.external_ip, "Detached router gateway");
        Ok(())
    }

    // ============ Interfaces ============

    /// Attaches the router to a tenant subnet, either through a new port at
    /// the subnet's gateway address or through an existing unowned port.
    pub fn add_router_interface(&self, router_id: Uuid, target: InterfaceTarget) -> Result<RouterInterface> {
        let result = self
            .coordinator
            .run_port_scoped("add_router_interface", |uow| {
                let router = self.stores.router(router_id)?;
                let (port, subnet, port_ip) = match target {
                    InterfaceTarget::Subnet(subnet_id) => self.interface_port_on_subnet(uow, &router, subnet_id)?,
                    InterfaceTarget::Port(port_id) => self.adopt_interface_port(uow, &router, port_id)?,
                };

                let bridge_port = uow.controller().get_port(mapper::port_id(port.id))?;
                let router_port = self.topology.link_router_to_bridge(
                    uow,
                    mapper::router_id(router.id),
                    &bridge_port,
                    subnet.cidr,
                    port_ip,
                )?;

                info!(router = %router.id, subnet = %subnet.id, port = %port.id, "Added router interface");
                let interface = RouterInterface {
                    router_id: router.id,
                    subnet_id: subnet.id,
                    port_id: port.id,
                };
                Ok((interface, router_port.id, subnet))
            })
            .map(|(interface, router_port, subnet)| {
                if subnet.is_ipv4() {
                    self.add_interface_metadata_route(&interface, router_port, &subnet);
                }
                interface
            });
        self.audit(
            AuditCategory::NetworkConfig,
            "add_router_interface",
            "router",
            Some(router_id),
            &result,
        );
        result
    }

    /// Routes metadata requests from the interface's subnet through the
    /// subnet's DHCP port. Called outside the port critical section.
    fn add_interface_metadata_route(&self, interface: &RouterInterface, router_port: PortId, subnet: &Subnet) {
        let Some(dhcp_ip) = dhcp::dhcp_port_ip(self.stores.ports.as_ref(), &self.dhcp_poll, subnet.network_id)
        else {
            return;
        };
        let result = self.coordinator.run("add_metadata_route", |uow| {
            self.topology.add_metadata_route(
                uow,
                mapper::router_id(interface.router_id),
                router_port,
                subnet.cidr,
                dhcp_ip,
            )
        });
        if let Err(e) = result {
            warn!(
                router = %interface.router_id,
                subnet = %subnet.id,
                error = %e,
                "Metadata route not added"
            );
        }
    }

    fn interface_port_on_subnet(
        &self,
        uow: &mut UnitOfWork<'_>,
        router: &Router,
        subnet_id: Uuid,
    ) -> Result<(Port, Subnet, IpAddress)> {
        let subnet = self.stores.subnet(subnet_id)?;
        let gw_ip = subnet
            .gateway_ip
            .ok_or_else(|| PluginError::invalid(format!("subnet {} has no gateway address", subnet.id)))?;

        let bridge_port = uow.create_bridge_port(bridge_id(subnet.network_id), true)?;
        let port_uuid = bridge_port.id.as_uuid();
        let port = self.stores.ports.create_port(Port {
            id: port_uuid,
            tenant_id: router.tenant_id.clone(),
            network_id: subnet.network_id,
            name: String::new(),
            mac_address: generated_mac(port_uuid),
            fixed_ips: vec![FixedIp {
                subnet_id: subnet.id,
                ip_address: gw_ip,
            }],
            device_owner: DeviceOwner::RouterInterface,
            device_id: router.id.to_string(),
            security_groups: Vec::new(),
            admin_state_up: true,
            status: PortStatus::Active,
        })?;
        Ok((port, subnet, gw_ip))
    }

    /// Turns an existing port into a router interface. VM wiring the port
    /// had is removed first.
    fn adopt_interface_port(
        &self,
        uow: &mut UnitOfWork<'_>,
        router: &Router,
        port_id: Uuid,
    ) -> Result<(Port, Subnet, IpAddress)> {
        let port = self.stores.port(port_id)?;
        if let Some(owner) = port.router_id() {
            return Err(PluginError::in_use("port", port_id, format!("owned by router {}", owner)));
        }
        if !port.device_owner.is_vif() {
            return Err(PluginError::invalid(format!(
                "port {} is owned by {}",
                port_id, port.device_owner
            )));
        }
        let [fixed] = port.fixed_ips.as_slice() else {
            return Err(PluginError::invalid(format!(
                "port {} must have exactly one fixed IP, has {}",
                port_id,
                port.fixed_ips.len()
            )));
        };
        let fixed = *fixed;
        let subnet = self.stores.subnet(fixed.subnet_id)?;

        let addresses: Vec<IpAddress> = port.addresses().collect();
        let groups = self.stores.security_groups.unbind_port(port_id)?;
        sg_chains::remove_members(uow, &groups, &addresses)?;
        port_chains::delete_port_chains(uow.controller(), &port.tenant_id, port_id)?;
        dhcp::remove_dhcp_hosts(uow, std::slice::from_ref(&subnet), port.mac_address, &port.fixed_ips);

        let port = self.stores.ports.update_port(Port {
            device_owner: DeviceOwner::RouterInterface,
            device_id: router.id.to_string(),
            security_groups: Vec::new(),
            ..port
        })?;
        Ok((port, subnet, fixed.ip_address))
    }

    /// Detaches the router from the subnet or port named by `target` and
    /// deletes the interface port.
    pub fn remove_router_interface(&self, router_id: Uuid, target: InterfaceTarget) -> Result<RouterInterface> {
        let result = self.coordinator.run_port_scoped("remove_router_interface", |_| {
            let ports = self.stores.ports.list_ports(&interface_filter(router_id))?;
            let port = match target {
                InterfaceTarget::Port(id) => ports.into_iter().find(|p| p.id == id),
                InterfaceTarget::Subnet(id) => ports
                    .into_iter()
                    .find(|p| p.fixed_ips.iter().any(|ip| ip.subnet_id == id)),
            }
            .ok_or_else(|| PluginError::not_found("router_interface", router_id))?;
            let subnet_id = port
                .fixed_ips
                .first()
                .map(|ip| ip.subnet_id)
                .ok_or_else(|| PluginError::invalid(format!("interface port {} has no address", port.id)))?;

            self.stores.ports.delete_port(port.id)?;
            self.topology
                .unlink_router_from_bridge(mapper::router_id(router_id), mapper::port_id(port.id))?;
            match self.controller.delete_port(mapper::port_id(port.id)) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
            info!(router = %router_id, subnet = %subnet_id, port = %port.id, "Removed router interface");
            Ok(RouterInterface {
                router_id,
                subnet_id,
                port_id: port.id,
            })
        });
        self.audit(
            AuditCategory::NetworkConfig,
            "remove_router_interface",
            "router",
            Some(router_id),
            &result,
        );
        result
    }
}
