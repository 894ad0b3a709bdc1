use super::MidonetPlugin;
use crate::audit::AuditCategory;
use crate::dhcp;
use crate::error::{PluginError, Result};
use crate::mapper::{bridge_id, network_id};
use crate::model::{Network, NetworkRequest, NetworkUpdate, Subnet, SubnetRequest, SubnetUpdate};
use midonet_client::api::{BridgeSpec, BridgeUpdate};
use tracing::info;
use uuid::Uuid;

impl MidonetPlugin {
    // ============ Networks ============

    /// Creates the bridge, then the network record under the bridge's id.
    /// The tenant's default security group is created if missing.
    pub fn create_network(&self, request: NetworkRequest) -> Result<Network> {
        let result = self.coordinator.run("create_network", |uow| {
            self.ensure_default_group_in(uow, &request.tenant_id)?;

            let bridge = uow.create_bridge(&BridgeSpec {
                tenant_id: request.tenant_id.clone(),
                name: request.name.clone(),
                admin_state_up: request.admin_state_up,
            })?;
            let network = Network {
                id: network_id(bridge.id),
                tenant_id: request.tenant_id,
                name: request.name,
                admin_state_up: request.admin_state_up,
                external: request.external,
            };
            Ok(self.stores.networks.create_network(network)?)
        });
        self.audit(
            AuditCategory::ResourceCreate,
            "create_network",
            "network",
            result.as_ref().ok().map(|n| n.id),
            &result,
        );
        result
    }

    pub fn update_network(&self, id: Uuid, update: NetworkUpdate) -> Result<Network> {
        let result = self.coordinator.run("update_network", |uow| {
            let mut network = self.stores.network(id)?;
            if let Some(name) = &update.name {
                network.name = name.clone();
            }
            if let Some(admin_state_up) = update.admin_state_up {
                network.admin_state_up = admin_state_up;
            }
            let network = self.stores.networks.update_network(network)?;
            uow.controller().update_bridge(
                bridge_id(id),
                &BridgeUpdate {
                    name: update.name,
                    admin_state_up: update.admin_state_up,
                },
            )?;
            Ok(network)
        });
        self.audit(AuditCategory::ResourceModify, "update_network", "network", Some(id), &result);
        result
    }

    /// The network record, after checking its bridge still exists.
    pub fn get_network(&self, id: Uuid) -> Result<Network> {
        let network = self.stores.network(id)?;
        match self.controller.get_bridge(bridge_id(id)) {
            Ok(_) => Ok(network),
            Err(e) if e.is_not_found() => Err(PluginError::not_found("bridge", id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_network(&self, id: Uuid) -> Result<Option<Network>> {
        Ok(self.stores.networks.get_network(id)?)
    }

    /// Deletes the network record, detaches external subnets from the
    /// provider router and deletes the bridge with everything on it.
    pub fn delete_network(&self, id: Uuid) -> Result<()> {
        let result = self.coordinator.run("delete_network", |uow| {
            let network = self.stores.network(id)?;
            let subnets = self.stores.networks.list_subnets(id)?;
            self.stores.networks.delete_network(id)?;

            if network.external {
                for subnet in subnets.iter().filter(|s| s.gateway_ip.is_some()) {
                    self.topology.unlink_from_provider(bridge_id(id), subnet.cidr)?;
                }
            }
            match uow.controller().delete_bridge(bridge_id(id)) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
            info!(network = %id, subnets = subnets.len(), "Deleted network");
            Ok(())
        });
        self.audit(AuditCategory::ResourceDelete, "delete_network", "network", Some(id), &result);
        result
    }

    // ============ Subnets ============

    /// Records the subnet and mirrors its DHCP settings onto the bridge. On an
    /// external network a subnet with a gateway is attached to the provider
    /// router at that address.
    pub fn create_subnet(&self, request: SubnetRequest) -> Result<Subnet> {
        let result = self.coordinator.run("create_subnet", |uow| {
            let network = self.stores.network(request.network_id)?;
            let subnet = self.stores.networks.create_subnet(Subnet {
                id: Uuid::new_v4(),
                network_id: network.id,
                tenant_id: request.tenant_id,
                name: request.name,
                cidr: request.cidr,
                gateway_ip: request.gateway_ip,
                dns_nameservers: request.dns_nameservers,
                host_routes: request.host_routes,
                enable_dhcp: request.enable_dhcp,
            })?;

            dhcp::create_dhcp_subnet(uow, &subnet)?;
            if let (true, Some(gw_ip)) = (network.external, subnet.gateway_ip) {
                self.topology
                    .link_to_provider(uow, bridge_id(network.id), gw_ip, subnet.cidr)?;
            }
            Ok(subnet)
        });
        self.audit(
            AuditCategory::ResourceCreate,
            "create_subnet",
            "subnet",
            result.as_ref().ok().map(|s| s.id),
            &result,
        );
        result
    }

    pub fn update_subnet(&self, id: Uuid, update: SubnetUpdate) -> Result<Subnet> {
        let result = self.coordinator.run("update_subnet", |uow| {
            let mut subnet = self.stores.subnet(id)?;
            if let Some(name) = update.name {
                subnet.name = name;
            }
            if let Some(gateway_ip) = update.gateway_ip {
                subnet.gateway_ip = gateway_ip;
            }
            if let Some(dns) = update.dns_nameservers {
                subnet.dns_nameservers = dns;
            }
            if let Some(routes) = update.host_routes {
                subnet.host_routes = routes;
            }
            if let Some(enable_dhcp) = update.enable_dhcp {
                subnet.enable_dhcp = enable_dhcp;
            }
            let subnet = self.stores.networks.update_subnet(subnet)?;
            dhcp::update_dhcp_subnet(uow.controller(), &subnet)?;
            Ok(subnet)
        });
        self.audit(AuditCategory::ResourceModify, "update_subnet", "subnet", Some(id), &result);
        result
    }

    pub fn get_subnet(&self, id: Uuid) -> Result<Subnet> {
        Ok(self.stores.subnet(id)?)
    }

    pub fn delete_subnet(&self, id: Uuid) -> Result<()> {
        let result = self.coordinator.run("delete_subnet", |uow| {
            let subnet = self.stores.subnet(id)?;
            let network = self.stores.network(subnet.network_id)?;
            self.stores.networks.delete_subnet(id)?;

            dhcp::delete_dhcp_subnet(uow.controller(), &subnet)?;
            if network.external && subnet.gateway_ip.is_some() {
                self.topology
                    .unlink_from_provider(bridge_id(network.id), subnet.cidr)?;
            }
            Ok(())
        });
        self.audit(AuditCategory::ResourceDelete, "delete_subnet", "subnet", Some(id), &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::error::PluginError;
    use crate::model::{NetworkRequest, NetworkUpdate, SubnetRequest, SubnetUpdate};
    use crate::plugin::testing::harness;
    use midonet_client::api::{DeviceId, RouteType};
    use midonet_client::{BridgeId, Controller};
    use midonet_types::IpAddress;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_network_lifecycle() {
        let h = harness();
        let network = h
            .plugin
            .create_network(NetworkRequest::new("tenant", "net"))
            .unwrap();

        let bridge = h.controller.get_bridge(BridgeId::from_uuid(network.id)).unwrap();
        assert_eq!(bridge.name, "net");
        assert_eq!(h.store.security_group_count(), 1);

        let updated = h
            .plugin
            .update_network(
                network.id,
                NetworkUpdate {
                    name: Some("renamed".to_string()),
                    admin_state_up: Some(false),
                },
            )
            .unwrap();
        assert_eq!(updated.name, "renamed");
        let bridge = h.controller.get_bridge(BridgeId::from_uuid(network.id)).unwrap();
        assert_eq!(bridge.name, "renamed");
        assert!(!bridge.admin_state_up);

        assert_eq!(h.plugin.get_network(network.id).unwrap(), updated);
        h.plugin.delete_network(network.id).unwrap();
        assert!(h.plugin.find_network(network.id).unwrap().is_none());
        assert_eq!(h.controller.bridge_count(), 0);
    }

    #[test]
    fn test_get_network_without_bridge() {
        let h = harness();
        let network = h
            .plugin
            .create_network(NetworkRequest::new("tenant", "net"))
            .unwrap();
        h.controller.delete_bridge(BridgeId::from_uuid(network.id)).unwrap();
        assert!(matches!(
            h.plugin.get_network(network.id),
            Err(PluginError::NotFound { kind: "bridge", .. })
        ));
    }

    #[test]
    fn test_failed_bridge_creation_leaves_nothing() {
        let h = harness();
        h.controller.fail_on("create_bridge");
        assert!(h
            .plugin
            .create_network(NetworkRequest::new("tenant", "net"))
            .is_err());
        assert_eq!(h.store.network_count(), 0);
        assert_eq!(h.store.security_group_count(), 0);
        assert!(h.controller.chain_names().is_empty());
        assert_eq!(h.controller.ip_addr_group_count(), 0);
    }

    #[test]
    fn test_subnet_mirrors_dhcp() {
        let h = harness();
        let network = h
            .plugin
            .create_network(NetworkRequest::new("tenant", "net"))
            .unwrap();
        let subnet = h
            .plugin
            .create_subnet(
                SubnetRequest::new(network.id, "tenant", "10.0.0.0/24".parse().unwrap())
                    .with_gateway(IpAddress::v4(10, 0, 0, 1)),
            )
            .unwrap();

        let bridge = BridgeId::from_uuid(network.id);
        let config = h.controller.get_dhcp_subnet(bridge, subnet.cidr).unwrap();
        assert_eq!(config.default_gateway, Some(IpAddress::v4(10, 0, 0, 1)));

        h.plugin
            .update_subnet(
                subnet.id,
                SubnetUpdate {
                    enable_dhcp: Some(false),
                    ..SubnetUpdate::default()
                },
            )
            .unwrap();
        assert!(!h.controller.get_dhcp_subnet(bridge, subnet.cidr).unwrap().enabled);

        h.plugin.delete_subnet(subnet.id).unwrap();
        assert!(h.controller.get_dhcp_subnet(bridge, subnet.cidr).is_err());
        assert!(h.plugin.get_subnet(subnet.id).is_err());
    }

    #[test]
    fn test_external_subnet_links_to_provider() {
        let h = harness();
        let network = h
            .plugin
            .create_network(NetworkRequest::new("admin", "public").external())
            .unwrap();
        let subnet = h
            .plugin
            .create_subnet(
                SubnetRequest::new(network.id, "admin", "200.0.0.0/24".parse().unwrap())
                    .with_gateway(IpAddress::v4(200, 0, 0, 1)),
            )
            .unwrap();

        let routes = h.controller.list_routes(h.provider).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].spec.route_type, RouteType::BlackHole);
        assert_eq!(routes[0].spec.dst_network, subnet.cidr);
        assert_eq!(
            h.controller
                .list_ports(DeviceId::Router(h.provider))
                .unwrap()
                .len(),
            1
        );

        h.plugin.delete_network(network.id).unwrap();
        assert!(h.controller.list_routes(h.provider).unwrap().is_empty());
        assert!(h
            .controller
            .list_ports(DeviceId::Router(h.provider))
            .unwrap()
            .is_empty());
    }
}
