//! Inbound and outbound filter chains of VM ports.
//!
//! After initialization a port's chains read, head first:
//!
//! ```text
//! inbound:  ip anti-spoof drops, mac anti-spoof drop, return-flow accept,
//!           jumps to group egress chains, drop non-ARP
//! outbound: return-flow accept, jumps to group ingress chains, drop non-ARP
//! ```
//!
//! Every fixed rule goes in at position 1, so insertion order is the reverse
//! of the final order. Jumps go in just ahead of the trailing drop.

use super::rules;
use super::security_group::GroupChains;
use crate::error::Result;
use crate::mapper::port_chain_names;
use crate::model::Port;
use crate::txn::UnitOfWork;
use midonet_client::api::{Chain, PortUpdate};
use midonet_client::{Controller, PortId};
use midonet_types::IpAddress;
use tracing::debug;
use uuid::Uuid;

/// The chain pair of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortChains {
    pub inbound: Chain,
    pub outbound: Chain,
}

pub fn create_port_chains(uow: &mut UnitOfWork<'_>, tenant_id: &str, port_id: Uuid) -> Result<PortChains> {
    let (inbound_name, outbound_name) = port_chain_names(&port_id);
    let inbound = uow.create_chain(tenant_id, &inbound_name)?;
    let outbound = uow.create_chain(tenant_id, &outbound_name)?;
    Ok(PortChains { inbound, outbound })
}

/// Both chains of a port, if they exist.
pub fn find_port_chains(controller: &dyn Controller, tenant_id: &str, port_id: Uuid) -> Result<Option<PortChains>> {
    let (inbound_name, outbound_name) = port_chain_names(&port_id);
    let inbound = controller.get_chain_by_name(tenant_id, &inbound_name)?;
    let outbound = controller.get_chain_by_name(tenant_id, &outbound_name)?;
    Ok(match (inbound, outbound) {
        (Some(inbound), Some(outbound)) => Some(PortChains { inbound, outbound }),
        _ => None,
    })
}

/// Points the controller port's filters at the chains.
pub fn attach_port_chains(controller: &dyn Controller, port: PortId, chains: &PortChains) -> Result<()> {
    controller.update_port(
        port,
        &PortUpdate {
            admin_state_up: None,
            inbound_filter: Some(chains.inbound.id),
            outbound_filter: Some(chains.outbound.id),
        },
    )?;
    Ok(())
}

/// Fills freshly created, empty chains for `port`, including jumps to the
/// chains of `groups`.
pub fn initialize_port_chains(
    uow: &mut UnitOfWork<'_>,
    chains: &PortChains,
    port: &Port,
    groups: &[GroupChains],
) -> Result<()> {
    let inbound = chains.inbound.id;
    let outbound = chains.outbound.id;

    uow.add_rule(inbound, &rules::drop_non_arp(), 1)?;
    uow.add_rule(outbound, &rules::drop_non_arp(), 1)?;

    uow.add_rule(inbound, &rules::return_flow_accept(), 1)?;
    uow.add_rule(inbound, &rules::mac_anti_spoof(port.mac_address), 1)?;
    for addr in port.addresses() {
        uow.add_rule(inbound, &rules::ip_anti_spoof(addr), 1)?;
    }

    uow.add_rule(outbound, &rules::return_flow_accept(), 1)?;

    add_group_jumps(uow, chains, groups)?;
    debug!(port = %port.id, groups = groups.len(), "Initialized port chains");
    Ok(())
}

/// Inserts jumps to each group's chains just before the trailing drop of
/// the port's chains. Groups are taken in id order.
pub fn add_group_jumps(uow: &mut UnitOfWork<'_>, chains: &PortChains, groups: &[GroupChains]) -> Result<()> {
    if groups.is_empty() {
        return Ok(());
    }
    let mut sorted: Vec<&GroupChains> = groups.iter().collect();
    sorted.sort_by_key(|g| g.group_id);

    let mut inbound_pos = jump_position(uow.controller(), &chains.inbound)?;
    let mut outbound_pos = jump_position(uow.controller(), &chains.outbound)?;
    for group in sorted {
        uow.add_rule(chains.inbound.id, &rules::jump(&group.egress), inbound_pos)?;
        uow.add_rule(chains.outbound.id, &rules::jump(&group.ingress), outbound_pos)?;
        inbound_pos += 1;
        outbound_pos += 1;
    }
    Ok(())
}

fn jump_position(controller: &dyn Controller, chain: &Chain) -> Result<u32> {
    let len = controller.list_rules(chain.id)?.len();
    Ok(len.max(1) as u32)
}

/// Deletes jumps from the port's chains into any chain named in `targets`.
pub fn remove_group_jumps(uow: &mut UnitOfWork<'_>, chains: &PortChains, targets: &[&str]) -> Result<usize> {
    let mut removed = 0;
    for chain in [&chains.inbound, &chains.outbound] {
        for rule in uow.controller().list_rules(chain.id)? {
            if rule
                .spec
                .jump_target_name()
                .map_or(false, |name| targets.contains(&name))
            {
                uow.delete_rule(&rule)?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Replaces the IP anti-spoof drops with ones for `addresses`.
pub fn rebuild_ip_anti_spoof(uow: &mut UnitOfWork<'_>, chains: &PortChains, addresses: &[IpAddress]) -> Result<()> {
    for rule in uow.controller().list_rules(chains.inbound.id)? {
        if rules::is_ip_anti_spoof(&rule.spec) {
            uow.delete_rule(&rule)?;
        }
    }
    for addr in addresses {
        uow.add_rule(chains.inbound.id, &rules::ip_anti_spoof(*addr), 1)?;
    }
    Ok(())
}

/// Deletes whichever of the port's chains exist.
pub fn delete_port_chains(controller: &dyn Controller, tenant_id: &str, port_id: Uuid) -> Result<()> {
    let (inbound_name, outbound_name) = port_chain_names(&port_id);
    for name in [inbound_name, outbound_name] {
        if let Some(chain) = controller.get_chain_by_name(tenant_id, &name)? {
            controller.delete_chain(chain.id)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::security_group::create_group_resources;
    use crate::model::{DeviceOwner, FixedIp, PortStatus, SecurityGroup};
    use midonet_client::api::{RuleAction, RuleSpec};
    use midonet_client::MemoryController;
    use midonet_types::{EtherType, MacAddress};
    use pretty_assertions::assert_eq;

    fn port() -> Port {
        Port {
            id: Uuid::new_v4(),
            tenant_id: "tenant".to_string(),
            network_id: Uuid::new_v4(),
            name: String::new(),
            mac_address: MacAddress::new([0xfa, 0x16, 0x3e, 0, 0, 9]),
            fixed_ips: vec![
                FixedIp {
                    subnet_id: Uuid::new_v4(),
                    ip_address: IpAddress::v4(10, 0, 0, 9),
                },
                FixedIp {
                    subnet_id: Uuid::new_v4(),
                    ip_address: "2001:db8::9".parse().unwrap(),
                },
            ],
            device_owner: DeviceOwner::Compute("compute:nova".to_string()),
            device_id: String::new(),
            security_groups: Vec::new(),
            admin_state_up: true,
            status: PortStatus::Active,
        }
    }

    fn groups(uow: &mut UnitOfWork<'_>, count: usize) -> Vec<GroupChains> {
        (0..count)
            .map(|i| {
                let group = SecurityGroup {
                    id: Uuid::new_v4(),
                    tenant_id: "tenant".to_string(),
                    name: format!("g{}", i),
                    description: String::new(),
                    rules: Vec::new(),
                };
                create_group_resources(uow, &group).unwrap()
            })
            .collect()
    }

    fn specs(controller: &MemoryController, chain: &Chain) -> Vec<RuleSpec> {
        controller
            .list_rules(chain.id)
            .unwrap()
            .into_iter()
            .map(|r| r.spec)
            .collect()
    }

    #[test]
    fn test_initialized_order() {
        let controller = MemoryController::new();
        let mut uow = UnitOfWork::new(&controller, "create_port");
        let port = port();
        let groups = groups(&mut uow, 2);
        let chains = create_port_chains(&mut uow, "tenant", port.id).unwrap();
        initialize_port_chains(&mut uow, &chains, &port, &groups).unwrap();

        let inbound = specs(&controller, &chains.inbound);
        assert_eq!(inbound.len(), 7);
        assert_eq!(inbound[0], rules::ip_anti_spoof("2001:db8::9".parse().unwrap()));
        assert_eq!(inbound[1], rules::ip_anti_spoof(IpAddress::v4(10, 0, 0, 9)));
        assert_eq!(inbound[2], rules::mac_anti_spoof(port.mac_address));
        assert_eq!(inbound[3], rules::return_flow_accept());
        assert!(matches!(inbound[4].action, RuleAction::Jump { .. }));
        assert!(matches!(inbound[5].action, RuleAction::Jump { .. }));
        assert_eq!(inbound[6], rules::drop_non_arp());

        let outbound = specs(&controller, &chains.outbound);
        assert_eq!(outbound.len(), 4);
        assert_eq!(outbound[0], rules::return_flow_accept());
        assert_eq!(outbound[3], rules::drop_non_arp());
        assert_eq!(outbound[3].dl_type, Some(EtherType::Arp));
    }

    #[test]
    fn test_jump_order_ignores_bind_order() {
        let controller = MemoryController::new();
        let mut uow = UnitOfWork::new(&controller, "create_port");
        let port = port();
        let mut groups = groups(&mut uow, 3);

        let first = create_port_chains(&mut uow, "tenant", port.id).unwrap();
        initialize_port_chains(&mut uow, &first, &port, &groups).unwrap();

        groups.reverse();
        let other = Uuid::new_v4();
        let second = create_port_chains(&mut uow, "tenant", other).unwrap();
        initialize_port_chains(&mut uow, &second, &Port { id: other, ..port }, &groups).unwrap();

        let targets = |chain: &Chain| -> Vec<String> {
            specs(&controller, chain)
                .iter()
                .filter_map(|s| s.jump_target_name().map(str::to_string))
                .collect()
        };
        assert_eq!(targets(&first.inbound), targets(&second.inbound));
        assert_eq!(targets(&first.outbound), targets(&second.outbound));
    }

    #[test]
    fn test_inbound_jumps_target_egress() {
        let controller = MemoryController::new();
        let mut uow = UnitOfWork::new(&controller, "create_port");
        let port = port();
        let groups = groups(&mut uow, 1);
        let chains = create_port_chains(&mut uow, "tenant", port.id).unwrap();
        initialize_port_chains(&mut uow, &chains, &port, &groups).unwrap();

        let inbound = specs(&controller, &chains.inbound);
        assert_eq!(inbound[4].jump_target_name(), Some(groups[0].egress.name.as_str()));
        let outbound = specs(&controller, &chains.outbound);
        assert_eq!(outbound[1].jump_target_name(), Some(groups[0].ingress.name.as_str()));

        let removed = remove_group_jumps(&mut uow, &chains, &groups[0].names()).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(specs(&controller, &chains.inbound).len(), 5);
    }

    #[test]
    fn test_rebuild_ip_anti_spoof() {
        let controller = MemoryController::new();
        let mut uow = UnitOfWork::new(&controller, "update_port");
        let port = port();
        let chains = create_port_chains(&mut uow, "tenant", port.id).unwrap();
        initialize_port_chains(&mut uow, &chains, &port, &[]).unwrap();

        let new_ip = IpAddress::v4(10, 0, 0, 77);
        rebuild_ip_anti_spoof(&mut uow, &chains, &[new_ip]).unwrap();

        let inbound = specs(&controller, &chains.inbound);
        assert_eq!(inbound.len(), 4);
        assert_eq!(inbound[0], rules::ip_anti_spoof(new_ip));
        assert_eq!(inbound[3], rules::drop_non_arp());
    }

    #[test]
    fn test_delete_port_chains() {
        let controller = MemoryController::new();
        let mut uow = UnitOfWork::new(&controller, "create_port");
        let id = Uuid::new_v4();
        create_port_chains(&mut uow, "tenant", id).unwrap();
        assert!(find_port_chains(&controller, "tenant", id).unwrap().is_some());

        delete_port_chains(&controller, "tenant", id).unwrap();
        assert!(find_port_chains(&controller, "tenant", id).unwrap().is_none());
        delete_port_chains(&controller, "tenant", id).unwrap();
    }
}
