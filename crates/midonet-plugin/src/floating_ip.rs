//! Floating IP association on tenant routers.
//!
//! An associated floating IP is a provider host route for the floating
//! address through the router's uplink plus a static DNAT/SNAT pair in the
//! router's NAT chains. Both are tagged with the floating IP id so they can
//! be removed without bookkeeping.

use crate::chains::nat;
use crate::error::{PluginError, Result};
use crate::model::FloatingIp;
use crate::topology::RouterTopologyManager;
use crate::txn::UnitOfWork;
use crate::{debug_log, info_log};
use midonet_client::api::DeviceId;
use midonet_client::RouterId;
use std::sync::Arc;
use uuid::Uuid;

const SOURCE: &str = "FloatingIPAssociator";

/// What an update does to an existing association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reassociation {
    Unchanged,
    Associate,
    Disassociate,
    Move,
}

impl Reassociation {
    pub fn between(old: &FloatingIp, new: &FloatingIp) -> Self {
        match (old.port_id, new.port_id) {
            (None, None) => Reassociation::Unchanged,
            (None, Some(_)) => Reassociation::Associate,
            (Some(_), None) => Reassociation::Disassociate,
            (Some(a), Some(b)) if a == b && old.fixed_ip_address == new.fixed_ip_address => {
                Reassociation::Unchanged
            }
            (Some(_), Some(_)) => Reassociation::Move,
        }
    }
}

#[derive(Debug)]
pub struct FloatingIpAssociator {
    topology: Arc<RouterTopologyManager>,
}

impl FloatingIpAssociator {
    pub fn new(topology: Arc<RouterTopologyManager>) -> Self {
        Self { topology }
    }

    /// Installs the provider route and the NAT pair for an associated
    /// floating IP.
    pub fn associate(&self, uow: &mut UnitOfWork<'_>, fip: &FloatingIp) -> Result<()> {
        let (router_id, fixed) = match (fip.router_id, fip.fixed_ip_address) {
            (Some(router_id), Some(fixed)) => (router_id, fixed),
            _ => {
                return Err(PluginError::invalid(format!(
                    "floating IP {} has no router or fixed address",
                    fip.id
                )))
            }
        };
        let router = RouterId::from_uuid(router_id);
        let uplink = self.topology.uplink_port(router)?.ok_or_else(|| {
            PluginError::invalid(format!("router {} has no external gateway", router_id))
        })?;

        self.topology
            .add_route_to_provider(uow, DeviceId::Router(router), fip.floating_ip_address)?;

        let chains = nat::nat_chains(uow.controller(), &fip.tenant_id, router_id)?;
        nat::add_static_nat(uow, &chains, fip.id, fip.floating_ip_address, fixed, uplink.id)?;

        info_log!(
            SOURCE,
            floating_ip = %fip.id,
            floating = %fip.floating_ip_address,
            %fixed,
            router = %router_id,
            "Associated floating IP"
        );
        Ok(())
    }

    /// Removes the provider route and NAT pair. A floating IP without a
    /// router is a no-op.
    pub fn disassociate(&self, uow: &mut UnitOfWork<'_>, fip: &FloatingIp) -> Result<()> {
        let Some(router_id) = fip.router_id else {
            debug_log!(SOURCE, floating_ip = %fip.id, "Not associated, nothing to remove");
            return Ok(());
        };
        let routes = self.topology.remove_route_from_provider(uow, fip.floating_ip_address)?;
        let rules = self.remove_nat(&fip.tenant_id, router_id, fip.id)?;
        info_log!(
            SOURCE,
            floating_ip = %fip.id,
            router = %router_id,
            routes,
            rules,
            "Disassociated floating IP"
        );
        Ok(())
    }

    /// Moves an association from `old` to `new`.
    pub fn reassociate(&self, uow: &mut UnitOfWork<'_>, old: &FloatingIp, new: &FloatingIp) -> Result<Reassociation> {
        let change = Reassociation::between(old, new);
        match change {
            Reassociation::Unchanged => {}
            Reassociation::Associate => self.associate(uow, new)?,
            Reassociation::Disassociate => self.disassociate(uow, old)?,
            Reassociation::Move => {
                self.disassociate(uow, old)?;
                self.associate(uow, new)?;
            }
        }
        Ok(change)
    }

    fn remove_nat(&self, tenant_id: &str, router_id: Uuid, fip_id: Uuid) -> Result<usize> {
        match nat::remove_static_nat(self.topology.controller(), tenant_id, router_id, fip_id) {
            Err(PluginError::Controller(e)) if e.is_not_found() => Ok(0),
            other => other,
        }
    }
}
