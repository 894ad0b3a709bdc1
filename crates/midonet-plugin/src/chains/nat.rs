//! Pre-routing and post-routing chains of tenant routers.

use super::rules;
use crate::error::{PluginError, Result};
use crate::mapper::{nat_chain_names, FLOATING_IP_TAG, SNAT_TAG_VALUE, TENANT_ROUTER_RULE_TAG};
use crate::txn::UnitOfWork;
use midonet_client::api::Chain;
use midonet_client::{Controller, PortId};
use midonet_types::IpAddress;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatChains {
    pub pre_routing: Chain,
    pub post_routing: Chain,
}

pub fn create_nat_chains(uow: &mut UnitOfWork<'_>, tenant_id: &str, router_id: Uuid) -> Result<NatChains> {
    let (pre, post) = nat_chain_names(&router_id);
    let pre_routing = uow.create_chain(tenant_id, &pre)?;
    let post_routing = uow.create_chain(tenant_id, &post)?;
    Ok(NatChains {
        pre_routing,
        post_routing,
    })
}

pub fn nat_chains(controller: &dyn Controller, tenant_id: &str, router_id: Uuid) -> Result<NatChains> {
    let (pre, post) = nat_chain_names(&router_id);
    let pre_routing = controller
        .get_chain_by_name(tenant_id, &pre)?
        .ok_or_else(|| PluginError::not_found("chain", &pre))?;
    let post_routing = controller
        .get_chain_by_name(tenant_id, &post)?
        .ok_or_else(|| PluginError::not_found("chain", &post))?;
    Ok(NatChains {
        pre_routing,
        post_routing,
    })
}

pub fn delete_nat_chains(controller: &dyn Controller, tenant_id: &str, router_id: Uuid) -> Result<()> {
    let (pre, post) = nat_chain_names(&router_id);
    for name in [pre, post] {
        if let Some(chain) = controller.get_chain_by_name(tenant_id, &name)? {
            controller.delete_chain(chain.id)?;
        }
    }
    Ok(())
}

/// Installs the DNAT/SNAT pair of a floating IP, both at the chain heads.
pub fn add_static_nat(
    uow: &mut UnitOfWork<'_>,
    chains: &NatChains,
    fip_id: Uuid,
    floating: IpAddress,
    fixed: IpAddress,
    uplink: PortId,
) -> Result<()> {
    uow.add_rule(
        chains.pre_routing.id,
        &rules::static_dnat(fip_id, floating, fixed, uplink),
        1,
    )?;
    uow.add_rule(
        chains.post_routing.id,
        &rules::static_snat(fip_id, floating, fixed, uplink),
        1,
    )?;
    debug!(floating_ip = %fip_id, %floating, %fixed, "Added static NAT pair");
    Ok(())
}

/// Installs router-wide SNAT behind `gw_ip`.
pub fn add_dynamic_snat(
    uow: &mut UnitOfWork<'_>,
    chains: &NatChains,
    gw_ip: IpAddress,
    uplink: PortId,
) -> Result<()> {
    let (reverse, forward) = rules::dynamic_snat_pair(gw_ip, uplink);
    uow.add_rule(chains.pre_routing.id, &reverse, 1)?;
    uow.add_rule(chains.post_routing.id, &forward, 1)?;
    debug!(%gw_ip, %uplink, "Added dynamic SNAT pair");
    Ok(())
}

/// Removes rules tagged `key=value` from both chains of a router.
pub fn remove_tagged(
    controller: &dyn Controller,
    tenant_id: &str,
    router_id: Uuid,
    key: &str,
    value: &str,
) -> Result<usize> {
    let (pre, post) = nat_chain_names(&router_id);
    let mut removed = 0;
    for name in [pre, post] {
        removed += controller.remove_rules_by_property(tenant_id, &name, key, value)?;
    }
    Ok(removed)
}

pub fn remove_static_nat(controller: &dyn Controller, tenant_id: &str, router_id: Uuid, fip_id: Uuid) -> Result<usize> {
    remove_tagged(controller, tenant_id, router_id, FLOATING_IP_TAG, &fip_id.to_string())
}

pub fn remove_dynamic_snat(controller: &dyn Controller, tenant_id: &str, router_id: Uuid) -> Result<usize> {
    remove_tagged(controller, tenant_id, router_id, TENANT_ROUTER_RULE_TAG, SNAT_TAG_VALUE)
}
