//! DHCP configuration mirrored onto bridges.

use crate::error::Result;
use crate::model::{DeviceOwner, FixedIp, Port, Subnet};
use crate::store::{PortFilter, PortStore};
use crate::topology::METADATA_PREFIX;
use crate::txn::UnitOfWork;
use midonet_client::api::{DhcpHost, DhcpHostRoute, DhcpSubnet};
use crate::mapper::bridge_id;
use midonet_client::Controller;
use midonet_orch_common::RetryPolicy;
use midonet_types::{IpAddress, MacAddress};
use tracing::{debug, warn};
use uuid::Uuid;

/// Controller-side DHCP config for a subnet.
pub fn dhcp_subnet(subnet: &Subnet) -> DhcpSubnet {
    DhcpSubnet {
        subnet: subnet.cidr,
        default_gateway: subnet.gateway_ip,
        dns_servers: subnet.dns_nameservers.clone(),
        host_routes: subnet
            .host_routes
            .iter()
            .map(|r| DhcpHostRoute {
                destination: r.destination,
                gateway: r.nexthop,
            })
            .collect(),
        enabled: subnet.enable_dhcp,
    }
}

pub fn create_dhcp_subnet(uow: &mut UnitOfWork<'_>, subnet: &Subnet) -> Result<()> {
    let bridge = bridge_id(subnet.network_id);
    uow.create_dhcp_subnet(bridge, &dhcp_subnet(subnet))?;
    debug!(subnet = %subnet.id, cidr = %subnet.cidr, "Created DHCP subnet");
    Ok(())
}

/// Re-mirrors `subnet`. A metadata host route added for the DHCP port is
/// kept unless the subnet now routes that prefix itself.
pub fn update_dhcp_subnet(controller: &dyn Controller, subnet: &Subnet) -> Result<()> {
    let bridge = bridge_id(subnet.network_id);
    let current = controller.get_dhcp_subnet(bridge, subnet.cidr)?;
    let mut updated = dhcp_subnet(subnet);
    if !updated.host_routes.iter().any(|r| r.destination == METADATA_PREFIX) {
        updated.host_routes.extend(
            current
                .host_routes
                .iter()
                .filter(|r| r.destination == METADATA_PREFIX),
        );
    }
    controller.update_dhcp_subnet(bridge, &updated)?;
    Ok(())
}

/// Deletes the DHCP subnet; one that is already gone is fine.
pub fn delete_dhcp_subnet(controller: &dyn Controller, subnet: &Subnet) -> Result<()> {
    match controller.delete_dhcp_subnet(bridge_id(subnet.network_id), subnet.cidr) {
        Err(e) if !e.is_not_found() => Err(e.into()),
        _ => Ok(()),
    }
}

/// Fixed IPs of a port that get a DHCP host entry: those on IPv4 subnets with
/// DHCP enabled.
fn host_entries<'s>(subnets: &'s [Subnet], fixed_ips: &[FixedIp]) -> Vec<(&'s Subnet, IpAddress)> {
    fixed_ips
        .iter()
        .filter_map(|ip| {
            subnets
                .iter()
                .find(|s| s.id == ip.subnet_id)
                .filter(|s| s.is_ipv4() && s.enable_dhcp)
                .map(|s| (s, ip.ip_address))
        })
        .collect()
}

/// Adds a static host entry for each DHCP-served address of the port.
pub fn add_dhcp_hosts(
    uow: &mut UnitOfWork<'_>,
    subnets: &[Subnet],
    mac: MacAddress,
    fixed_ips: &[FixedIp],
) -> Result<usize> {
    let entries = host_entries(subnets, fixed_ips);
    for (subnet, ip) in &entries {
        uow.add_dhcp_host(
            bridge_id(subnet.network_id),
            subnet.cidr,
            &DhcpHost { mac, ip: *ip },
        )?;
    }
    Ok(entries.len())
}

/// Removes the host entries added by [`add_dhcp_hosts`]. Failures are logged
/// and counted; the caller proceeds either way.
pub fn remove_dhcp_hosts(
    uow: &mut UnitOfWork<'_>,
    subnets: &[Subnet],
    mac: MacAddress,
    fixed_ips: &[FixedIp],
) -> usize {
    let mut failures = 0;
    for (subnet, ip) in host_entries(subnets, fixed_ips) {
        let host = DhcpHost { mac, ip };
        if let Err(e) = uow.remove_dhcp_host(bridge_id(subnet.network_id), subnet.cidr, &host) {
            failures += 1;
            warn!(
                subnet = %subnet.id,
                %mac,
                %ip,
                error = %e,
                "DHCP host entry not removed; bridge and store disagree"
            );
        }
    }
    failures
}

/// Points the metadata host route of each IPv4 subnet the DHCP port sits on
/// at the port's address.
pub fn add_metadata_routes(controller: &dyn Controller, subnets: &[Subnet], port: &Port) -> Result<usize> {
    let mut updated = 0;
    for fixed in &port.fixed_ips {
        let Some(subnet) = subnets
            .iter()
            .find(|s| s.id == fixed.subnet_id && s.is_ipv4())
        else {
            continue;
        };
        let bridge = bridge_id(subnet.network_id);
        let mut config = controller.get_dhcp_subnet(bridge, subnet.cidr)?;
        config.host_routes.retain(|r| r.destination != METADATA_PREFIX);
        config.host_routes.push(DhcpHostRoute {
            destination: METADATA_PREFIX,
            gateway: fixed.ip_address,
        });
        controller.update_dhcp_subnet(bridge, &config)?;
        updated += 1;
    }
    debug!(port = %port.id, updated, "Set metadata host routes");
    Ok(updated)
}

/// First fixed IP of the first DHCP port on the network, polled because the
/// DHCP agent creates its port asynchronously.
pub fn dhcp_port_ip(ports: &dyn PortStore, policy: &RetryPolicy, network_id: Uuid) -> Option<IpAddress> {
    let filter = PortFilter::on_network(network_id).owned_by(DeviceOwner::Dhcp);
    let found = policy.poll(|attempt| match ports.list_ports(&filter) {
        Ok(found) => found
            .first()
            .and_then(|p| p.fixed_ips.first())
            .map(|ip| ip.ip_address),
        Err(e) => {
            warn!(network = %network_id, attempt, error = %e, "DHCP port lookup failed");
            None
        }
    });
    if found.is_none() {
        warn!(network = %network_id, "No DHCP port address found");
    }
    found
}
