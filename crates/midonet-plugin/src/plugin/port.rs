use super::MidonetPlugin;
use crate::audit::AuditCategory;
use crate::chains::{port as port_chains, security_group as sg_chains};
use crate::dhcp;
use crate::error::{PluginError, Result};
use crate::mapper::{bridge_id, port_id};
use crate::model::{DeviceOwner, Network, Port, PortRequest, PortStatus, PortUpdate};
use crate::txn::UnitOfWork;
use midonet_client::api::{DeviceId, PortUpdate as ControllerPortUpdate};
use midonet_client::RouterId;
use midonet_types::IpAddress;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl MidonetPlugin {
    fn add_provider_routes(&self, uow: &mut UnitOfWork<'_>, network: &Network, addresses: &[IpAddress]) -> Result<()> {
        for addr in addresses.iter().filter(|a| a.is_ipv4()) {
            self.topology
                .add_route_to_provider(uow, DeviceId::Bridge(bridge_id(network.id)), *addr)?;
        }
        Ok(())
    }

    fn remove_provider_routes(&self, uow: &mut UnitOfWork<'_>, addresses: &[IpAddress]) -> Result<()> {
        for addr in addresses.iter().filter(|a| a.is_ipv4()) {
            self.topology.remove_route_from_provider(uow, *addr)?;
        }
        Ok(())
    }

    /// Filter chains, group bindings and membership of a VM port.
    fn wire_vif_port(&self, uow: &mut UnitOfWork<'_>, port: &Port, groups: &[Uuid]) -> Result<()> {
        let store = self.stores.security_groups.as_ref();
        sg_chains::bind_port_to_groups(uow, store, port, groups)?;
        let group_chains = sg_chains::chains_for_groups(uow.controller(), store, groups)?;

        let chains = port_chains::create_port_chains(uow, &port.tenant_id, port.id)?;
        port_chains::initialize_port_chains(uow, &chains, port, &group_chains)?;
        port_chains::attach_port_chains(uow.controller(), port_id(port.id), &chains)?;
        Ok(())
    }

    // ============ Create ============

    /// Creates the bridge port, then the port record under the bridge port's
    /// id, then the wiring its owner calls for.
    pub fn create_port(&self, request: PortRequest) -> Result<Port> {
        let result = self.coordinator.run_port_scoped("create_port", |uow| {
            let network = self.stores.network(request.network_id)?;
            let bridge_port = uow.create_bridge_port(bridge_id(network.id), request.admin_state_up)?;

            let groups = match (&request.device_owner, &request.security_groups) {
                (owner, _) if !owner.is_vif() => Vec::new(),
                (_, Some(groups)) => groups.clone(),
                (_, None) => vec![self.ensure_default_group_in(uow, &request.tenant_id)?.id],
            };

            let mut port = self.stores.ports.create_port(Port {
                id: bridge_port.id.as_uuid(),
                tenant_id: request.tenant_id,
                network_id: network.id,
                name: request.name,
                mac_address: request.mac_address,
                fixed_ips: request.fixed_ips,
                device_owner: request.device_owner,
                device_id: request.device_id,
                security_groups: Vec::new(),
                admin_state_up: request.admin_state_up,
                status: PortStatus::Active,
            })?;
            let subnets = self.subnets(port.fixed_ips.iter().map(|ip| ip.subnet_id))?;

            match port.device_owner {
                ref owner if owner.is_vif() => {
                    self.wire_vif_port(uow, &port, &groups)?;
                    port.security_groups = groups;
                    dhcp::add_dhcp_hosts(uow, &subnets, port.mac_address, &port.fixed_ips)?;
                    if network.external {
                        let addresses: Vec<IpAddress> = port.addresses().collect();
                        self.add_provider_routes(uow, &network, &addresses)?;
                    }
                }
                DeviceOwner::Dhcp => {
                    dhcp::add_metadata_routes(uow.controller(), &subnets, &port)?;
                }
                _ => {}
            }
            info!(port = %port.id, owner = %port.device_owner, "Created port");
            Ok(port)
        });
        self.audit(
            AuditCategory::ResourceCreate,
            "create_port",
            "port",
            result.as_ref().ok().map(|p| p.id),
            &result,
        );
        result
    }

    // ============ Read ============

    /// The port record. A port whose controller port is gone is marked
    /// `Error` and reported missing.
    pub fn get_port(&self, id: Uuid) -> Result<Port> {
        let mut port = self.stores.port(id)?;
        match self.controller.get_port(port_id(id)) {
            Ok(_) => Ok(port),
            Err(e) if e.is_not_found() => {
                warn!(port = %id, "Controller port missing, marking port as error");
                port.status = PortStatus::Error;
                self.stores.ports.update_port(port)?;
                Err(PluginError::not_found("port", id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_port(&self, id: Uuid) -> Result<Option<Port>> {
        Ok(self.stores.ports.get_port(id)?)
    }

    // ============ Update ============

    pub fn update_port(&self, id: Uuid, update: PortUpdate) -> Result<Port> {
        let result = self
            .coordinator
            .run_port_scoped("update_port", |uow| self.update_port_in(uow, id, update));
        self.audit(AuditCategory::ResourceModify, "update_port", "port", Some(id), &result);
        result
    }

    fn update_port_in(&self, uow: &mut UnitOfWork<'_>, id: Uuid, update: PortUpdate) -> Result<Port> {
        let old = self.stores.port(id)?;
        let network = self.stores.network(old.network_id)?;
        let mut port = old.clone();
        if let Some(name) = update.name {
            port.name = name;
        }
        if let Some(admin_state_up) = update.admin_state_up {
            port.admin_state_up = admin_state_up;
        }
        if let Some(fixed_ips) = update.fixed_ips {
            port.fixed_ips = fixed_ips;
        }
        let mut port = self.stores.ports.update_port(port)?;

        let controller = uow.controller();
        if port.admin_state_up != old.admin_state_up {
            controller.update_port(
                port_id(id),
                &ControllerPortUpdate {
                    admin_state_up: Some(port.admin_state_up),
                    ..ControllerPortUpdate::default()
                },
            )?;
            if port.device_owner == DeviceOwner::RouterInterface {
                self.topology.set_peer_admin_state(port_id(id), port.admin_state_up)?;
            }
        }

        let ips_changed = port.fixed_ips != old.fixed_ips;
        let new_groups = match update.security_groups {
            Some(groups) if port.device_owner.is_vif() && groups != old.security_groups => Some(groups),
            _ => None,
        };
        let old_addresses: Vec<IpAddress> = old.addresses().collect();
        let new_addresses: Vec<IpAddress> = port.addresses().collect();

        if ips_changed {
            let subnets = self.subnets(
                old.fixed_ips
                    .iter()
                    .chain(port.fixed_ips.iter())
                    .map(|ip| ip.subnet_id),
            )?;
            if port.device_owner == DeviceOwner::Dhcp {
                dhcp::add_metadata_routes(controller, &subnets, &port)?;
            } else {
                dhcp::remove_dhcp_hosts(uow, &subnets, old.mac_address, &old.fixed_ips);
                dhcp::add_dhcp_hosts(uow, &subnets, port.mac_address, &port.fixed_ips)?;
            }
            if port.device_owner.is_vif() && network.external {
                self.remove_provider_routes(uow, &old_addresses)?;
                self.add_provider_routes(uow, &network, &new_addresses)?;
            }
        }

        if !port.device_owner.is_vif() || (!ips_changed && new_groups.is_none()) {
            return Ok(port);
        }

        let store = self.stores.security_groups.as_ref();
        match new_groups {
            Some(groups) => {
                let unbound = sg_chains::unbind_port_from_groups(uow, store, &old)?;
                sg_chains::bind_port_to_groups(uow, store, &port, &groups)?;
                debug!(port = %id, unbound = unbound.len(), bound = groups.len(), "Rebound security groups");
                port.security_groups = groups;
            }
            None => {
                sg_chains::remove_members(uow, &old.security_groups, &old_addresses)?;
                sg_chains::add_members(uow, &port.security_groups, &new_addresses)?;
            }
        }
        if ips_changed {
            match port_chains::find_port_chains(uow.controller(), &port.tenant_id, id)? {
                Some(chains) => port_chains::rebuild_ip_anti_spoof(uow, &chains, &new_addresses)?,
                None => warn!(port = %id, "Port chains missing, anti-spoof rules not rebuilt"),
            }
        }
        Ok(port)
    }

    // ============ Delete ============

    /// Deletes a port and everything wired for it. With `l3_port_check`, a
    /// port owned by an existing router is refused.
    pub fn delete_port(&self, id: Uuid, l3_port_check: bool) -> Result<()> {
        let result = self
            .coordinator
            .run_port_scoped("delete_port", |uow| self.delete_port_in(uow, id, l3_port_check));
        self.audit(AuditCategory::ResourceDelete, "delete_port", "port", Some(id), &result);
        result
    }

    fn delete_port_in(&self, uow: &mut UnitOfWork<'_>, id: Uuid, l3_port_check: bool) -> Result<()> {
        let port = self.stores.port(id)?;
        let router = match port.router_id() {
            Some(router_id) => self.stores.routers.get_router(router_id)?,
            None => None,
        };
        if let (true, Some(router)) = (l3_port_check, &router) {
            return Err(PluginError::L3PortInUse {
                port: id,
                router: router.id.to_string(),
            });
        }

        for fip in self.stores.routers.floating_ips_for_port(id)? {
            self.floating_ips.disassociate(uow, &fip)?;
        }
        let subnets = self.subnets(port.fixed_ips.iter().map(|ip| ip.subnet_id))?;
        let addresses: Vec<IpAddress> = port.addresses().collect();
        self.stores.ports.delete_port(id)?;

        match port.device_owner {
            DeviceOwner::RouterInterface => {
                if let Some(router_id) = port.router_id() {
                    self.topology
                        .unlink_router_from_bridge(RouterId::from_uuid(router_id), port_id(id))?;
                }
            }
            DeviceOwner::RouterGateway => {
                if let Some(mut router) = router {
                    self.topology.remove_gateway(&router.tenant_id, router.id)?;
                    router.gateway = None;
                    router.gw_port_id = None;
                    self.stores.routers.update_router(router)?;
                }
            }
            ref owner if owner.is_vif() => {
                let network = self.stores.networks.get_network(port.network_id)?;
                if network.map_or(false, |n| n.external) {
                    self.remove_provider_routes(uow, &addresses)?;
                }
                sg_chains::remove_members(uow, &port.security_groups, &addresses)?;
            }
            _ => {}
        }

        if port.device_owner != DeviceOwner::Dhcp {
            dhcp::remove_dhcp_hosts(uow, &subnets, port.mac_address, &port.fixed_ips);
        }
        match self.controller.delete_port(port_id(id)) {
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {}
        }
        port_chains::delete_port_chains(self.controller.as_ref(), &port.tenant_id, id)?;
        info!(port = %id, owner = %port.device_owner, "Deleted port");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::chains::port::{delete_port_chains, find_port_chains};
    use crate::chains::rules;
    use crate::error::PluginError;
    use crate::mapper::{ip_addr_group_id, name_for, NameRole};
    use crate::model::{
        DeviceOwner, FixedIp, NetworkRequest, PortRequest, PortStatus, PortUpdate, SecurityGroupRequest, SubnetRequest,
    };
    use crate::plugin::testing::{harness, Harness};
    use midonet_client::{BridgeId, Controller, PortId};
    use midonet_types::{IpAddress, IpPrefix, MacAddress};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0xfa, 0x16, 0x3e, 0, 0, last])
    }

    fn network_with_subnet(h: &Harness, external: bool) -> (Uuid, Uuid) {
        let mut request = NetworkRequest::new("tenant", "net");
        request.external = external;
        let network = h.plugin.create_network(request).unwrap();
        let subnet = h
            .plugin
            .create_subnet(
                SubnetRequest::new(network.id, "tenant", "10.0.0.0/24".parse().unwrap())
                    .with_gateway(IpAddress::v4(10, 0, 0, 1)),
            )
            .unwrap();
        (network.id, subnet.id)
    }

    #[test]
    fn test_vif_port_gets_chains_and_dhcp_host() {
        let h = harness();
        let (network, subnet) = network_with_subnet(&h, false);
        let port = h
            .plugin
            .create_port(PortRequest::new("tenant", network, mac(1)).with_fixed_ip(subnet, IpAddress::v4(10, 0, 0, 3)))
            .unwrap();

        let default = h
            .plugin
            .ensure_default_security_group("tenant")
            .unwrap();
        assert_eq!(port.security_groups, vec![default.id]);

        let chains = find_port_chains(h.controller.as_ref(), "tenant", port.id)
            .unwrap()
            .unwrap();
        let controller_port = h.controller.get_port(PortId::from_uuid(port.id)).unwrap();
        assert_eq!(controller_port.inbound_filter, Some(chains.inbound.id));
        let inbound = h.controller.list_rules(chains.inbound.id).unwrap();
        assert_eq!(inbound.last().map(|r| r.spec.clone()), Some(rules::drop_non_arp()));

        let hosts = h
            .controller
            .list_dhcp_hosts(BridgeId::from_uuid(network), "10.0.0.0/24".parse().unwrap())
            .unwrap();
        assert_eq!(hosts.len(), 1);
        let members = h.controller.get_ip_addr_group(ip_addr_group_id(default.id)).unwrap();
        assert!(members.addresses.contains(&IpAddress::v4(10, 0, 0, 3)));

        h.plugin.delete_port(port.id, true).unwrap();
        assert!(find_port_chains(h.controller.as_ref(), "tenant", port.id).unwrap().is_none());
        assert!(h
            .controller
            .list_dhcp_hosts(BridgeId::from_uuid(network), "10.0.0.0/24".parse().unwrap())
            .unwrap()
            .is_empty());
        let members = h.controller.get_ip_addr_group(ip_addr_group_id(default.id)).unwrap();
        assert!(members.addresses.is_empty());
        assert!(h.plugin.find_port(port.id).unwrap().is_none());
    }

    #[test]
    fn test_failed_port_creation_is_compensated() {
        let h = harness();
        let (network, subnet) = network_with_subnet(&h, false);
        let ports_before = h.controller.port_count();
        let chains_before = h.controller.chain_names().len();

        h.controller.fail_on("add_dhcp_host");
        let result = h
            .plugin
            .create_port(PortRequest::new("tenant", network, mac(2)).with_fixed_ip(subnet, IpAddress::v4(10, 0, 0, 4)));
        assert!(matches!(result, Err(PluginError::Controller(_))));
        assert_eq!(h.controller.port_count(), ports_before);
        assert_eq!(h.controller.chain_names().len(), chains_before);
        assert_eq!(h.store.port_count(), 0);
        assert_eq!(h.plugin.transaction_stats().compensated, 1);
    }

    #[test]
    fn test_get_port_marks_missing_controller_port() {
        let h = harness();
        let (network, _) = network_with_subnet(&h, false);
        let port = h
            .plugin
            .create_port(PortRequest::new("tenant", network, mac(3)).with_security_groups(vec![]))
            .unwrap();
        h.controller.delete_port(PortId::from_uuid(port.id)).unwrap();

        assert!(matches!(
            h.plugin.get_port(port.id),
            Err(PluginError::NotFound { kind: "port", .. })
        ));
        assert_eq!(h.plugin.find_port(port.id).unwrap().unwrap().status, PortStatus::Error);
    }

    #[test]
    fn test_update_port_rebinds_groups_and_addresses() {
        let h = harness();
        let (network, subnet) = network_with_subnet(&h, false);
        let web = h
            .plugin
            .create_security_group(SecurityGroupRequest::new("tenant", "web"))
            .unwrap();
        let port = h
            .plugin
            .create_port(PortRequest::new("tenant", network, mac(4)).with_fixed_ip(subnet, IpAddress::v4(10, 0, 0, 5)))
            .unwrap();
        let default_group = port.security_groups[0];

        let updated = h
            .plugin
            .update_port(
                port.id,
                PortUpdate {
                    admin_state_up: Some(false),
                    fixed_ips: Some(vec![FixedIp {
                        subnet_id: subnet,
                        ip_address: IpAddress::v4(10, 0, 0, 6),
                    }]),
                    security_groups: Some(vec![web.id]),
                    ..PortUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.security_groups, vec![web.id]);
        assert!(!h.controller.get_port(PortId::from_uuid(port.id)).unwrap().admin_state_up);

        let chains = find_port_chains(h.controller.as_ref(), "tenant", port.id)
            .unwrap()
            .unwrap();
        let inbound = h.controller.list_rules(chains.inbound.id).unwrap();
        let jumps: Vec<&str> = inbound.iter().filter_map(|r| r.spec.jump_target_name()).collect();
        assert_eq!(jumps.len(), 1);
        assert!(jumps[0].contains(&web.id.to_string()));
        let spoof: Vec<Option<IpPrefix>> = inbound
            .iter()
            .filter(|r| rules::is_ip_anti_spoof(&r.spec))
            .map(|r| r.spec.nw_src)
            .collect();
        assert_eq!(spoof, vec![Some(IpPrefix::host(IpAddress::v4(10, 0, 0, 6)))]);

        let old_members = h.controller.get_ip_addr_group(ip_addr_group_id(default_group)).unwrap();
        assert!(old_members.addresses.is_empty());
        let new_members = h.controller.get_ip_addr_group(ip_addr_group_id(web.id)).unwrap();
        assert!(new_members.addresses.contains(&IpAddress::v4(10, 0, 0, 6)));
    }

    #[test]
    fn test_external_vif_port_gets_provider_route() {
        let h = harness();
        let (network, subnet) = network_with_subnet(&h, true);
        let port = h
            .plugin
            .create_port(PortRequest::new("tenant", network, mac(5)).with_fixed_ip(subnet, IpAddress::v4(10, 0, 0, 9)))
            .unwrap();
        let host = IpPrefix::host(IpAddress::v4(10, 0, 0, 9));
        assert!(h
            .controller
            .list_routes(h.provider)
            .unwrap()
            .iter()
            .any(|r| r.spec.dst_network == host));

        h.plugin.delete_port(port.id, true).unwrap();
        assert!(!h
            .controller
            .list_routes(h.provider)
            .unwrap()
            .iter()
            .any(|r| r.spec.dst_network == host));
    }

    #[test]
    fn test_dhcp_port_sets_metadata_route() {
        let h = harness();
        let (network, subnet) = network_with_subnet(&h, false);
        h.plugin
            .create_port(
                PortRequest::new("tenant", network, mac(6))
                    .with_owner(DeviceOwner::Dhcp, "dhcp-agent")
                    .with_fixed_ip(subnet, IpAddress::v4(10, 0, 0, 2)),
            )
            .unwrap();
        let config = h
            .controller
            .get_dhcp_subnet(BridgeId::from_uuid(network), "10.0.0.0/24".parse().unwrap())
            .unwrap();
        assert_eq!(config.host_routes.len(), 1);
        assert_eq!(config.host_routes[0].gateway, IpAddress::v4(10, 0, 0, 2));
    }

    fn jump_targets(h: &Harness, chain: midonet_client::ChainId) -> Vec<String> {
        h.controller
            .list_rules(chain)
            .unwrap()
            .iter()
            .filter_map(|r| r.spec.jump_target_name().map(str::to_string))
            .collect()
    }

    fn members(h: &Harness, group: Uuid) -> Vec<IpAddress> {
        h.controller
            .get_ip_addr_group(ip_addr_group_id(group))
            .unwrap()
            .addresses
            .into_iter()
            .collect()
    }

    #[test]
    fn test_rebind_without_port_chains() {
        let h = harness();
        let (network, subnet) = network_with_subnet(&h, false);
        let web = h
            .plugin
            .create_security_group(SecurityGroupRequest::new("tenant", "web"))
            .unwrap();
        let port = h
            .plugin
            .create_port(PortRequest::new("tenant", network, mac(7)).with_fixed_ip(subnet, IpAddress::v4(10, 0, 0, 11)))
            .unwrap();
        let default_group = port.security_groups[0];
        delete_port_chains(h.controller.as_ref(), "tenant", port.id).unwrap();

        let updated = h
            .plugin
            .update_port(
                port.id,
                PortUpdate {
                    fixed_ips: Some(vec![FixedIp {
                        subnet_id: subnet,
                        ip_address: IpAddress::v4(10, 0, 0, 12),
                    }]),
                    security_groups: Some(vec![web.id]),
                    ..PortUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(updated.security_groups, vec![web.id]);
        assert_eq!(h.plugin.find_port(port.id).unwrap().unwrap().security_groups, vec![web.id]);
        assert!(members(&h, default_group).is_empty());
        assert_eq!(members(&h, web.id), vec![IpAddress::v4(10, 0, 0, 12)]);
        assert!(find_port_chains(h.controller.as_ref(), "tenant", port.id).unwrap().is_none());
    }

    #[test]
    fn test_successive_rebinds_keep_jumps_in_group_order() {
        let h = harness();
        let (network, subnet) = network_with_subnet(&h, false);
        let a = h
            .plugin
            .create_security_group(SecurityGroupRequest::new("tenant", "a"))
            .unwrap()
            .id;
        let b = h
            .plugin
            .create_security_group(SecurityGroupRequest::new("tenant", "b"))
            .unwrap()
            .id;
        let port = h
            .plugin
            .create_port(
                PortRequest::new("tenant", network, mac(8))
                    .with_fixed_ip(subnet, IpAddress::v4(10, 0, 0, 13))
                    .with_security_groups(vec![a]),
            )
            .unwrap();
        let chains = find_port_chains(h.controller.as_ref(), "tenant", port.id)
            .unwrap()
            .unwrap();

        let mut sorted = vec![a, b];
        sorted.sort();
        let inbound: Vec<String> = sorted.iter().map(|id| name_for(NameRole::SgEgress, id)).collect();
        let outbound: Vec<String> = sorted.iter().map(|id| name_for(NameRole::SgIngress, id)).collect();

        for groups in [vec![a, b], vec![b, a]] {
            let updated = h
                .plugin
                .update_port(
                    port.id,
                    PortUpdate {
                        security_groups: Some(groups.clone()),
                        ..PortUpdate::default()
                    },
                )
                .unwrap();
            assert_eq!(updated.security_groups, groups);
            assert_eq!(jump_targets(&h, chains.inbound.id), inbound);
            assert_eq!(jump_targets(&h, chains.outbound.id), outbound);
        }
        assert_eq!(members(&h, a), vec![IpAddress::v4(10, 0, 0, 13)]);
        assert_eq!(members(&h, b), vec![IpAddress::v4(10, 0, 0, 13)]);
    }

    #[test]
    fn test_failed_address_change_restores_removed_state() {
        let h = harness();
        let (network, subnet) = network_with_subnet(&h, false);
        let old_ip = IpAddress::v4(10, 0, 0, 14);
        let port = h
            .plugin
            .create_port(PortRequest::new("tenant", network, mac(9)).with_fixed_ip(subnet, old_ip))
            .unwrap();
        let default_group = port.security_groups[0];
        let chains = find_port_chains(h.controller.as_ref(), "tenant", port.id)
            .unwrap()
            .unwrap();
        let bridge = BridgeId::from_uuid(network);
        let cidr: IpPrefix = "10.0.0.0/24".parse().unwrap();
        let spoof = |h: &Harness| -> Vec<Option<IpPrefix>> {
            h.controller
                .list_rules(chains.inbound.id)
                .unwrap()
                .iter()
                .filter(|r| rules::is_ip_anti_spoof(&r.spec))
                .map(|r| r.spec.nw_src)
                .collect()
        };
        let inbound_before = h.controller.list_rules(chains.inbound.id).unwrap().len();

        // Anti-spoof rebuild is the last step; its first insert fails after
        // the DHCP host, membership and old drop are already gone.
        h.controller.fail_on("add_rule");
        let result = h.plugin.update_port(
            port.id,
            PortUpdate {
                fixed_ips: Some(vec![FixedIp {
                    subnet_id: subnet,
                    ip_address: IpAddress::v4(10, 0, 0, 15),
                }]),
                ..PortUpdate::default()
            },
        );
        assert!(matches!(result, Err(PluginError::Controller(_))));

        let hosts: Vec<IpAddress> = h
            .controller
            .list_dhcp_hosts(bridge, cidr)
            .unwrap()
            .iter()
            .map(|host| host.ip)
            .collect();
        assert_eq!(hosts, vec![old_ip]);
        assert_eq!(members(&h, default_group), vec![old_ip]);
        assert_eq!(spoof(&h), vec![Some(IpPrefix::host(old_ip))]);
        assert_eq!(h.controller.list_rules(chains.inbound.id).unwrap().len(), inbound_before);
        assert_eq!(h.plugin.find_port(port.id).unwrap().unwrap().fixed_ips[0].ip_address, old_ip);
    }
}
