use super::MidonetPlugin;
use crate::audit::AuditCategory;
use crate::error::{PluginError, Result};
use crate::model::{DeviceOwner, FixedIp, FloatingIp, FloatingIpRequest, FloatingIpUpdate};
use crate::store::PortFilter;
use midonet_types::IpAddress;
use tracing::{debug, info};
use uuid::Uuid;

impl MidonetPlugin {
    /// Router through which `subnet` reaches external network `network`:
    /// one with an interface on the subnet and its gateway on the network.
    fn router_for(&self, network: Uuid, subnet: Uuid) -> Result<Uuid> {
        let filter = PortFilter::on_subnet(subnet).owned_by(DeviceOwner::RouterInterface);
        for port in self.stores.ports.list_ports(&filter)? {
            let Some(router_id) = port.router_id() else {
                continue;
            };
            if let Some(router) = self.stores.routers.get_router(router_id)? {
                if router.gateway.map_or(false, |gw| gw.network_id == network) {
                    return Ok(router.id);
                }
            }
        }
        Err(PluginError::invalid(format!(
            "external network {} is not reachable from subnet {}",
            network, subnet
        )))
    }

    /// Fills in the port, fixed address and router of an association.
    fn resolve_association(&self, fip: &mut FloatingIp, port_id: Uuid, fixed: Option<IpAddress>) -> Result<()> {
        let port = self.stores.port(port_id)?;
        let fixed_ip: FixedIp = match fixed {
            Some(addr) => port
                .fixed_ips
                .iter()
                .find(|ip| ip.ip_address == addr)
                .copied()
                .ok_or_else(|| PluginError::invalid(format!("port {} has no address {}", port_id, addr)))?,
            None => port
                .fixed_ips
                .iter()
                .find(|ip| ip.ip_address.is_ipv4())
                .copied()
                .ok_or_else(|| PluginError::invalid(format!("port {} has no IPv4 address", port_id)))?,
        };
        fip.router_id = Some(self.router_for(fip.floating_network_id, fixed_ip.subnet_id)?);
        fip.port_id = Some(port_id);
        fip.fixed_ip_address = Some(fixed_ip.ip_address);
        Ok(())
    }

    // ============ Floating IPs ============

    /// Records the floating IP and, when a port is given, associates it
    /// through the router that connects the port to the external network.
    pub fn create_floating_ip(&self, request: FloatingIpRequest) -> Result<FloatingIp> {
        let result = self.coordinator.run("create_floating_ip", |uow| {
            let network = self.stores.network(request.floating_network_id)?;
            if !network.external {
                return Err(PluginError::invalid(format!(
                    "network {} is not external",
                    network.id
                )));
            }
            let mut fip = FloatingIp {
                id: Uuid::new_v4(),
                tenant_id: request.tenant_id,
                floating_network_id: network.id,
                floating_ip_address: request.floating_ip_address,
                port_id: None,
                fixed_ip_address: None,
                router_id: None,
            };
            if let Some(port_id) = request.port_id {
                self.resolve_association(&mut fip, port_id, request.fixed_ip_address)?;
            }
            let fip = self.stores.routers.create_floating_ip(fip)?;
            if fip.is_associated() {
                self.floating_ips.associate(uow, &fip)?;
            }
            info!(floating_ip = %fip.id, address = %fip.floating_ip_address, "Created floating IP");
            Ok(fip)
        });
        self.audit(
            AuditCategory::ResourceCreate,
            "create_floating_ip",
            "floating_ip",
            result.as_ref().ok().map(|f| f.id),
            &result,
        );
        result
    }

    pub fn get_floating_ip(&self, id: Uuid) -> Result<FloatingIp> {
        Ok(self.stores.floating_ip(id)?)
    }

    /// Associates, moves or disassociates the floating IP.
    pub fn update_floating_ip(&self, id: Uuid, update: FloatingIpUpdate) -> Result<FloatingIp> {
        let result = self.coordinator.run("update_floating_ip", |uow| {
            let old = self.stores.floating_ip(id)?;
            let mut new = FloatingIp {
                port_id: None,
                fixed_ip_address: None,
                router_id: None,
                ..old.clone()
            };
            if let Some(port_id) = update.port_id {
                self.resolve_association(&mut new, port_id, update.fixed_ip_address)?;
            }
            let change = self.floating_ips.reassociate(uow, &old, &new)?;
            debug!(floating_ip = %id, ?change, "Reassociated floating IP");
            Ok(self.stores.routers.update_floating_ip(new)?)
        });
        self.audit(
            AuditCategory::NetworkConfig,
            "update_floating_ip",
            "floating_ip",
            Some(id),
            &result,
        );
        result
    }

    pub fn delete_floating_ip(&self, id: Uuid) -> Result<()> {
        let result = self.coordinator.run("delete_floating_ip", |uow| {
            let fip = self.stores.floating_ip(id)?;
            self.floating_ips.disassociate(uow, &fip)?;
            self.stores.routers.delete_floating_ip(id)?;
            Ok(())
        });
        self.audit(
            AuditCategory::ResourceDelete,
            "delete_floating_ip",
            "floating_ip",
            Some(id),
            &result,
        );
        result
    }

    /// Disassociates every floating IP of a port, returning how many there
    /// were.
    pub fn disassociate_floating_ips(&self, port_id: Uuid) -> Result<usize> {
        let result = self.coordinator.run("disassociate_floating_ips", |uow| {
            let fips = self.stores.routers.floating_ips_for_port(port_id)?;
            for fip in &fips {
                self.floating_ips.disassociate(uow, fip)?;
                self.stores.routers.update_floating_ip(FloatingIp {
                    port_id: None,
                    fixed_ip_address: None,
                    router_id: None,
                    ..fip.clone()
                })?;
            }
            Ok(fips.len())
        });
        self.audit(
            AuditCategory::NetworkConfig,
            "disassociate_floating_ips",
            "port",
            Some(port_id),
            &result,
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::error::PluginError;
    use crate::mapper::FLOATING_IP_TAG;
    use crate::model::{FloatingIpRequest, FloatingIpUpdate, InterfaceTarget};
    use crate::plugin::testing::{harness, Harness};
    use midonet_client::Controller;
    use midonet_types::{IpAddress, IpPrefix};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const FLOATING: IpAddress = IpAddress::v4(200, 0, 0, 10);

    fn routes_to(h: &Harness, addr: IpAddress) -> usize {
        let host = IpPrefix::host(addr);
        h.controller
            .list_routes(h.provider)
            .unwrap()
            .iter()
            .filter(|r| r.spec.dst_network == host)
            .count()
    }

    fn nat_rules(h: &Harness, router: Uuid) -> usize {
        let chains = crate::chains::nat::nat_chains(h.controller.as_ref(), "tenant", router).unwrap();
        [chains.pre_routing.id, chains.post_routing.id]
            .iter()
            .map(|chain| {
                h.controller
                    .list_rules(*chain)
                    .unwrap()
                    .iter()
                    .filter(|r| r.spec.property(FLOATING_IP_TAG).is_some())
                    .count()
            })
            .sum()
    }

    /// External network, tenant subnet with two VMs, and a router joining
    /// them.
    fn topology(h: &Harness) -> (Uuid, Uuid, Uuid, Uuid) {
        let (external, external_subnet) = h.external_network();
        let (_, subnet) = h.tenant_network("tenant");
        let router = h.gateway_router("tenant", &external_subnet, IpAddress::v4(200, 0, 0, 5));
        h.plugin
            .add_router_interface(router.id, InterfaceTarget::Subnet(subnet.id))
            .unwrap();
        let first = h.vif_port(&subnet, IpAddress::v4(10, 0, 0, 3), 3);
        let second = h.vif_port(&subnet, IpAddress::v4(10, 0, 0, 4), 4);
        (external.id, router.id, first.id, second.id)
    }

    fn request(network: Uuid, port: Option<Uuid>) -> FloatingIpRequest {
        FloatingIpRequest {
            tenant_id: "tenant".to_string(),
            floating_network_id: network,
            floating_ip_address: FLOATING,
            port_id: port,
            fixed_ip_address: None,
        }
    }

    #[test]
    fn test_floating_ip_moves_between_ports() {
        let h = harness();
        let (external, router, first, second) = topology(&h);

        let fip = h.plugin.create_floating_ip(request(external, Some(first))).unwrap();
        assert_eq!(fip.router_id, Some(router));
        assert_eq!(fip.fixed_ip_address, Some(IpAddress::v4(10, 0, 0, 3)));
        assert_eq!(routes_to(&h, FLOATING), 1);
        assert_eq!(nat_rules(&h, router), 2);

        let moved = h
            .plugin
            .update_floating_ip(
                fip.id,
                FloatingIpUpdate {
                    port_id: Some(second),
                    fixed_ip_address: None,
                },
            )
            .unwrap();
        assert_eq!(moved.fixed_ip_address, Some(IpAddress::v4(10, 0, 0, 4)));
        assert_eq!(routes_to(&h, FLOATING), 1);
        assert_eq!(nat_rules(&h, router), 2);

        let released = h
            .plugin
            .update_floating_ip(fip.id, FloatingIpUpdate::default())
            .unwrap();
        assert!(!released.is_associated());
        assert_eq!(routes_to(&h, FLOATING), 0);
        assert_eq!(nat_rules(&h, router), 0);

        h.plugin.delete_floating_ip(fip.id).unwrap();
        assert!(h.plugin.get_floating_ip(fip.id).is_err());
    }

    #[test]
    fn test_deleting_port_releases_floating_ip() {
        let h = harness();
        let (external, router, first, _) = topology(&h);
        let fip = h.plugin.create_floating_ip(request(external, Some(first))).unwrap();

        h.plugin.delete_port(first, true).unwrap();
        assert_eq!(routes_to(&h, FLOATING), 0);
        assert_eq!(nat_rules(&h, router), 0);
        assert!(!h.plugin.get_floating_ip(fip.id).unwrap().is_associated());
    }

    #[test]
    fn test_floating_ip_needs_external_network_and_route() {
        let h = harness();
        let (_, subnet) = h.tenant_network("tenant");
        assert!(matches!(
            h.plugin.create_floating_ip(request(subnet.network_id, None)),
            Err(PluginError::InvalidRequest(_))
        ));

        let (external, _) = h.external_network();
        let port = h.vif_port(&subnet, IpAddress::v4(10, 0, 0, 3), 3);
        assert!(matches!(
            h.plugin.create_floating_ip(request(external.id, Some(port.id))),
            Err(PluginError::InvalidRequest(_))
        ));

        let unassociated = h.plugin.create_floating_ip(request(external.id, None)).unwrap();
        assert!(!unassociated.is_associated());
        assert_eq!(h.plugin.disassociate_floating_ips(port.id).unwrap(), 0);
    }
}
