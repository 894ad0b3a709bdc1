//! Controller objects owned by a security group: its IP address group and
//! its ingress/egress chain pair.

use super::{port as port_chains, rules};
use crate::error::{PluginError, Result};
use crate::mapper::{ip_addr_group_id, name_for, sg_chain_names, NameRole, SG_RULE_TAG};
use crate::model::{Direction, Port, SecurityGroup, SecurityGroupRule};
use crate::store::{SecurityGroupStore, StoreError};
use crate::txn::UnitOfWork;
use midonet_client::api::{Chain, Rule};
use midonet_client::Controller;
use midonet_types::IpAddress;
use tracing::{debug, info};
use uuid::Uuid;

/// The chain pair of one security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupChains {
    pub group_id: Uuid,
    pub ingress: Chain,
    pub egress: Chain,
}

impl GroupChains {
    pub fn for_direction(&self, direction: Direction) -> &Chain {
        match direction {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }

    pub fn names(&self) -> [&str; 2] {
        [self.ingress.name.as_str(), self.egress.name.as_str()]
    }
}

/// Creates the IP address group and chain pair, then one accept rule per
/// rule already on the group.
pub fn create_group_resources(uow: &mut UnitOfWork<'_>, group: &SecurityGroup) -> Result<GroupChains> {
    uow.create_ip_addr_group(
        ip_addr_group_id(group.id),
        &name_for(NameRole::IpAddrGroup, &group.id),
    )?;

    let (ingress_name, egress_name) = sg_chain_names(&group.id);
    let ingress = uow.create_chain(&group.tenant_id, &ingress_name)?;
    let egress = uow.create_chain(&group.tenant_id, &egress_name)?;
    let chains = GroupChains {
        group_id: group.id,
        ingress,
        egress,
    };

    for rule in &group.rules {
        add_group_rule(uow, &chains, rule)?;
    }

    info!(security_group = %group.id, rules = group.rules.len(), "Created security group chains");
    Ok(chains)
}

/// Both chains of a group, if they exist.
pub fn find_group_chains(
    controller: &dyn Controller,
    tenant_id: &str,
    group_id: Uuid,
) -> Result<Option<GroupChains>> {
    let (ingress_name, egress_name) = sg_chain_names(&group_id);
    let ingress = controller.get_chain_by_name(tenant_id, &ingress_name)?;
    let egress = controller.get_chain_by_name(tenant_id, &egress_name)?;
    Ok(match (ingress, egress) {
        (Some(ingress), Some(egress)) => Some(GroupChains {
            group_id,
            ingress,
            egress,
        }),
        _ => None,
    })
}

pub fn group_chains(controller: &dyn Controller, tenant_id: &str, group_id: Uuid) -> Result<GroupChains> {
    find_group_chains(controller, tenant_id, group_id)?
        .ok_or_else(|| PluginError::not_found("security_group_chains", group_id))
}

/// Deletes the chain pair and the IP address group. Missing pieces are
/// skipped.
pub fn delete_group_resources(controller: &dyn Controller, tenant_id: &str, group_id: Uuid) -> Result<()> {
    let (ingress_name, egress_name) = sg_chain_names(&group_id);
    for name in [ingress_name, egress_name] {
        if let Some(chain) = controller.get_chain_by_name(tenant_id, &name)? {
            controller.delete_chain(chain.id)?;
        }
    }
    match controller.delete_ip_addr_group(ip_addr_group_id(group_id)) {
        Err(e) if !e.is_not_found() => return Err(e.into()),
        _ => {}
    }
    debug!(security_group = %group_id, "Deleted security group chains");
    Ok(())
}

/// Appends the accept rule for `rule` to the chain of its direction.
pub fn add_group_rule(
    uow: &mut UnitOfWork<'_>,
    chains: &GroupChains,
    rule: &SecurityGroupRule,
) -> Result<Rule> {
    let spec = rules::sg_accept_rule(rule)?;
    let chain = chains.for_direction(rule.direction);
    let position = uow.controller().list_rules(chain.id)?.len() + 1;
    let created = uow.add_rule(chain.id, &spec, position as u32)?;
    debug!(rule = %rule.id, chain = %chain.name, position, "Added security group rule");
    Ok(created)
}

/// Removes the accept rule built from `rule`.
pub fn remove_group_rule(controller: &dyn Controller, tenant_id: &str, rule: &SecurityGroupRule) -> Result<usize> {
    let role = match rule.direction {
        Direction::Ingress => NameRole::SgIngress,
        Direction::Egress => NameRole::SgEgress,
    };
    let chain_name = name_for(role, &rule.security_group_id);
    let removed = controller.remove_rules_by_property(
        tenant_id,
        &chain_name,
        SG_RULE_TAG,
        &rule.id.to_string(),
    )?;
    Ok(removed)
}

// ============ Membership ============

/// Adds `addresses` to the IP address group of each group.
pub fn add_members(uow: &mut UnitOfWork<'_>, groups: &[Uuid], addresses: &[IpAddress]) -> Result<()> {
    for group in groups {
        for addr in addresses {
            uow.add_ip_addr_group_address(ip_addr_group_id(*group), *addr)?;
        }
    }
    Ok(())
}

/// Removes `addresses` from the IP address group of each group. Groups that
/// no longer exist are skipped.
pub fn remove_members(uow: &mut UnitOfWork<'_>, groups: &[Uuid], addresses: &[IpAddress]) -> Result<()> {
    for group in groups {
        for addr in addresses {
            match uow.remove_ip_addr_group_address(ip_addr_group_id(*group), *addr) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }
    }
    Ok(())
}

// ============ Port bindings ============

/// Chains of each group, looked up under the group's own tenant.
pub fn chains_for_groups(
    controller: &dyn Controller,
    store: &dyn SecurityGroupStore,
    groups: &[Uuid],
) -> Result<Vec<GroupChains>> {
    groups
        .iter()
        .map(|id| {
            let group = store.get_security_group(*id)?.ok_or(StoreError::NotFound {
                kind: "security_group",
                id: *id,
            })?;
            group_chains(controller, &group.tenant_id, group.id)
        })
        .collect()
}

/// Binds `port` to `groups` and adds its addresses to their IP address
/// groups. Jumps to the groups' chains are inserted only if the port's
/// chains exist; otherwise chain initialization adds them.
pub fn bind_port_to_groups(
    uow: &mut UnitOfWork<'_>,
    store: &dyn SecurityGroupStore,
    port: &Port,
    groups: &[Uuid],
) -> Result<()> {
    store.bind_port(port.id, groups)?;
    let addresses: Vec<IpAddress> = port.addresses().collect();
    add_members(uow, groups, &addresses)?;

    match port_chains::find_port_chains(uow.controller(), &port.tenant_id, port.id)? {
        Some(chains) => {
            let targets = chains_for_groups(uow.controller(), store, groups)?;
            port_chains::add_group_jumps(uow, &chains, &targets)?;
        }
        None => debug!(port = %port.id, "No port chains yet, jumps left to initialization"),
    }
    Ok(())
}

/// Drops every binding of `port`, its addresses from the groups' IP address
/// groups and, if the port's chains exist, the jumps into the groups'
/// chains. Returns the groups the port was bound to.
pub fn unbind_port_from_groups(
    uow: &mut UnitOfWork<'_>,
    store: &dyn SecurityGroupStore,
    port: &Port,
) -> Result<Vec<Uuid>> {
    let groups = store.unbind_port(port.id)?;
    let addresses: Vec<IpAddress> = port.addresses().collect();
    remove_members(uow, &groups, &addresses)?;

    if let Some(chains) = port_chains::find_port_chains(uow.controller(), &port.tenant_id, port.id)? {
        let names: Vec<String> = groups
            .iter()
            .flat_map(|id| {
                let (ingress, egress) = sg_chain_names(id);
                [ingress, egress]
            })
            .collect();
        let targets: Vec<&str> = names.iter().map(String::as_str).collect();
        let removed = port_chains::remove_group_jumps(uow, &chains, &targets)?;
        debug!(port = %port.id, removed, "Removed security group jumps");
    }
    Ok(groups)
}
