//! Transaction coordination between the local store and the controller.
//!
//! A logical mutation writes to the local store and to the controller, and
//! the controller has no transactions. [`TransactionCoordinator::run`] opens a
//! local transaction, hands the work a [`UnitOfWork`] that journals every
//! controller object it creates or removes, and commits. If anything fails,
//! the journal is walked newest first (created objects are deleted, removed
//! ones put back), the local transaction is rolled back and the original
//! error is returned.
//!
//! ```text
//!   run(label, f)
//!     begin ----> f(&mut uow) ----> commit ----> Ok
//!                     |                |
//!                     +---- Err -------+
//!                             |
//!                 compensate (reverse order) -> rollback -> Err(original)
//! ```

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::error::Result;
use crate::store::TransactionalStore;
use midonet_client::api::{
    Bridge, BridgeSpec, Chain, DhcpHost, DhcpSubnet, IpAddrGroup, Port, Route, RouteSpec, Router,
    RouterPortSpec, RouterSpec, Rule, RuleSpec,
};
use midonet_client::{
    BridgeId, ChainId, ClientResult, Controller, IpAddrGroupId, PortId, RouteId, RouterId, RuleId,
};
use midonet_orch_common::{CriticalSection, NamedLock};
use midonet_types::{IpAddress, IpPrefix};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Critical section every port mutation runs under.
pub const PORT_CRITICAL_SECTION: &str = "port-critical-section";

/// A controller object created inside a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatedObject {
    Bridge(BridgeId),
    Router(RouterId),
    Port(PortId),
    /// Link made from this port to its peer.
    Link(PortId),
    Chain(ChainId),
    Rule(RuleId),
    Route(RouteId),
    IpAddrGroup(IpAddrGroupId),
    IpAddrGroupMember(IpAddrGroupId, IpAddress),
    DhcpSubnet(BridgeId, IpPrefix),
    DhcpHost(BridgeId, IpPrefix, DhcpHost),
}

impl CreatedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            CreatedObject::Bridge(_) => "bridge",
            CreatedObject::Router(_) => "router",
            CreatedObject::Port(_) => "port",
            CreatedObject::Link(_) => "link",
            CreatedObject::Chain(_) => "chain",
            CreatedObject::Rule(_) => "rule",
            CreatedObject::Route(_) => "route",
            CreatedObject::IpAddrGroup(_) => "ip_addr_group",
            CreatedObject::IpAddrGroupMember(..) => "ip_addr_group_member",
            CreatedObject::DhcpSubnet(..) => "dhcp_subnet",
            CreatedObject::DhcpHost(..) => "dhcp_host",
        }
    }

    /// Deletes the object. An object that is already gone, for instance
    /// because an earlier undo cascaded to it, counts as undone.
    pub fn undo(&self, controller: &dyn Controller) -> ClientResult<()> {
        let result = match self {
            CreatedObject::Bridge(id) => controller.delete_bridge(*id),
            CreatedObject::Router(id) => controller.delete_router(*id),
            CreatedObject::Port(id) => controller.delete_port(*id),
            CreatedObject::Link(id) => controller.unlink(*id),
            CreatedObject::Chain(id) => controller.delete_chain(*id),
            CreatedObject::Rule(id) => controller.delete_rule(*id),
            CreatedObject::Route(id) => controller.delete_route(*id),
            CreatedObject::IpAddrGroup(id) => controller.delete_ip_addr_group(*id),
            CreatedObject::IpAddrGroupMember(id, addr) => {
                controller.remove_ip_addr_group_address(*id, *addr)
            }
            CreatedObject::DhcpSubnet(bridge, subnet) => {
                controller.delete_dhcp_subnet(*bridge, *subnet)
            }
            CreatedObject::DhcpHost(bridge, subnet, host) => {
                controller.remove_dhcp_host(*bridge, *subnet, host)
            }
        };
        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// A controller object removed inside a unit of work, with what it takes
/// to put it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovedObject {
    /// Rule that sat at `position` of `chain` when it was deleted.
    Rule {
        chain: ChainId,
        spec: RuleSpec,
        position: u32,
    },
    Route(RouterId, RouteSpec),
    IpAddrGroupMember(IpAddrGroupId, IpAddress),
    DhcpHost(BridgeId, IpPrefix, DhcpHost),
}

impl RemovedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            RemovedObject::Rule { .. } => "rule",
            RemovedObject::Route(..) => "route",
            RemovedObject::IpAddrGroupMember(..) => "ip_addr_group_member",
            RemovedObject::DhcpHost(..) => "dhcp_host",
        }
    }

    /// Recreates the object. Restored rules and routes get new ids.
    pub fn restore(&self, controller: &dyn Controller) -> ClientResult<()> {
        match self {
            RemovedObject::Rule {
                chain,
                spec,
                position,
            } => controller.add_rule(*chain, spec, *position).map(|_| ()),
            RemovedObject::Route(router, spec) => controller.add_route(*router, spec).map(|_| ()),
            RemovedObject::IpAddrGroupMember(id, addr) => {
                controller.add_ip_addr_group_address(*id, *addr)
            }
            RemovedObject::DhcpHost(bridge, subnet, host) => {
                controller.add_dhcp_host(*bridge, *subnet, host)
            }
        }
    }
}

/// One journaled change of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Created(CreatedObject),
    Removed(RemovedObject),
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Created(object) => object.kind(),
            Step::Removed(object) => object.kind(),
        }
    }

    fn undo(&self, controller: &dyn Controller) -> ClientResult<()> {
        match self {
            Step::Created(object) => object.undo(controller),
            Step::Removed(object) => object.restore(controller),
        }
    }
}

/// Controller access for one logical mutation.
///
/// Creating and removing calls go through the journaled methods below so
/// they can be undone. Reads and updates go through
/// [`UnitOfWork::controller`].
pub struct UnitOfWork<'a> {
    controller: &'a dyn Controller,
    label: String,
    correlation_id: String,
    journal: Vec<Step>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(controller: &'a dyn Controller, label: impl Into<String>) -> Self {
        Self {
            controller,
            label: label.into(),
            correlation_id: Uuid::new_v4().to_string(),
            journal: Vec::new(),
        }
    }

    pub fn controller(&self) -> &'a dyn Controller {
        self.controller
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Changes made so far, oldest first.
    pub fn journal(&self) -> &[Step] {
        &self.journal
    }

    /// Objects created so far, oldest first.
    pub fn created(&self) -> impl Iterator<Item = &CreatedObject> {
        self.journal.iter().filter_map(|step| match step {
            Step::Created(object) => Some(object),
            Step::Removed(_) => None,
        })
    }

    /// Tracks an object created outside the helpers below.
    pub fn track(&mut self, object: CreatedObject) {
        debug!(label = %self.label, kind = object.kind(), "Tracking created object");
        self.journal.push(Step::Created(object));
    }

    fn track_removed(&mut self, object: RemovedObject) {
        debug!(label = %self.label, kind = object.kind(), "Tracking removed object");
        self.journal.push(Step::Removed(object));
    }

    // ============ Tracked creators ============

    pub fn create_bridge(&mut self, spec: &BridgeSpec) -> ClientResult<Bridge> {
        let bridge = self.controller.create_bridge(spec)?;
        self.track(CreatedObject::Bridge(bridge.id));
        Ok(bridge)
    }

    pub fn create_router(&mut self, spec: &RouterSpec) -> ClientResult<Router> {
        let router = self.controller.create_router(spec)?;
        self.track(CreatedObject::Router(router.id));
        Ok(router)
    }

    pub fn create_bridge_port(
        &mut self,
        bridge: BridgeId,
        admin_state_up: bool,
    ) -> ClientResult<Port> {
        let port = self.controller.create_bridge_port(bridge, admin_state_up)?;
        self.track(CreatedObject::Port(port.id));
        Ok(port)
    }

    pub fn create_router_port(
        &mut self,
        router: RouterId,
        spec: &RouterPortSpec,
    ) -> ClientResult<Port> {
        let port = self.controller.create_router_port(router, spec)?;
        self.track(CreatedObject::Port(port.id));
        Ok(port)
    }

    pub fn link(&mut self, port: PortId, peer: PortId) -> ClientResult<()> {
        self.controller.link(port, peer)?;
        self.track(CreatedObject::Link(port));
        Ok(())
    }

    pub fn create_chain(&mut self, tenant_id: &str, name: &str) -> ClientResult<Chain> {
        let chain = self.controller.create_chain(tenant_id, name)?;
        self.track(CreatedObject::Chain(chain.id));
        Ok(chain)
    }

    pub fn add_rule(&mut self, chain: ChainId, spec: &RuleSpec, position: u32) -> ClientResult<Rule> {
        let rule = self.controller.add_rule(chain, spec, position)?;
        self.track(CreatedObject::Rule(rule.id));
        Ok(rule)
    }

    pub fn add_route(&mut self, router: RouterId, spec: &RouteSpec) -> ClientResult<Route> {
        let route = self.controller.add_route(router, spec)?;
        self.track(CreatedObject::Route(route.id));
        Ok(route)
    }

    pub fn create_ip_addr_group(
        &mut self,
        id: IpAddrGroupId,
        name: &str,
    ) -> ClientResult<IpAddrGroup> {
        let group = self.controller.create_ip_addr_group(id, name)?;
        self.track(CreatedObject::IpAddrGroup(group.id));
        Ok(group)
    }

    pub fn add_ip_addr_group_address(
        &mut self,
        id: IpAddrGroupId,
        addr: IpAddress,
    ) -> ClientResult<()> {
        self.controller.add_ip_addr_group_address(id, addr)?;
        self.track(CreatedObject::IpAddrGroupMember(id, addr));
        Ok(())
    }

    pub fn create_dhcp_subnet(&mut self, bridge: BridgeId, subnet: &DhcpSubnet) -> ClientResult<()> {
        self.controller.create_dhcp_subnet(bridge, subnet)?;
        self.track(CreatedObject::DhcpSubnet(bridge, subnet.subnet));
        Ok(())
    }

    pub fn add_dhcp_host(
        &mut self,
        bridge: BridgeId,
        subnet: IpPrefix,
        host: &DhcpHost,
    ) -> ClientResult<()> {
        self.controller.add_dhcp_host(bridge, subnet, host)?;
        self.track(CreatedObject::DhcpHost(bridge, subnet, *host));
        Ok(())
    }

    // ============ Journaled removers ============

    /// Deletes `rule`, remembering its position in the chain.
    pub fn delete_rule(&mut self, rule: &Rule) -> ClientResult<()> {
        let position = self
            .controller
            .list_rules(rule.chain_id)?
            .iter()
            .position(|r| r.id == rule.id)
            .map_or(1, |index| index as u32 + 1);
        self.controller.delete_rule(rule.id)?;
        self.track_removed(RemovedObject::Rule {
            chain: rule.chain_id,
            spec: rule.spec.clone(),
            position,
        });
        Ok(())
    }

    pub fn delete_route(&mut self, route: &Route) -> ClientResult<()> {
        self.controller.delete_route(route.id)?;
        self.track_removed(RemovedObject::Route(route.router_id, route.spec.clone()));
        Ok(())
    }

    pub fn remove_ip_addr_group_address(
        &mut self,
        id: IpAddrGroupId,
        addr: IpAddress,
    ) -> ClientResult<()> {
        self.controller.remove_ip_addr_group_address(id, addr)?;
        self.track_removed(RemovedObject::IpAddrGroupMember(id, addr));
        Ok(())
    }

    pub fn remove_dhcp_host(
        &mut self,
        bridge: BridgeId,
        subnet: IpPrefix,
        host: &DhcpHost,
    ) -> ClientResult<()> {
        self.controller.remove_dhcp_host(bridge, subnet, host)?;
        self.track_removed(RemovedObject::DhcpHost(bridge, subnet, *host));
        Ok(())
    }

    // ============ Compensation ============

    /// Undoes every journaled change, newest first. Failures are logged and
    /// counted; the walk always runs to the end.
    pub fn compensate(&mut self, cause: &str) -> usize {
        let mut failures = 0;
        let total = self.journal.len();
        while let Some(step) = self.journal.pop() {
            if let Err(e) = step.undo(self.controller) {
                failures += 1;
                error!(
                    label = %self.label,
                    kind = step.kind(),
                    step = ?step,
                    error = %e,
                    "Compensation step failed; controller and store disagree"
                );
            }
        }

        let mut record = AuditRecord::new(AuditCategory::Compensation, "TransactionCoordinator", &self.label)
            .with_correlation_id(self.correlation_id.clone())
            .with_details(serde_json::json!({
                "undone": total - failures,
                "failed": failures,
                "cause": cause,
            }));
        record = if failures == 0 {
            record.with_outcome(AuditOutcome::Success)
        } else {
            record.with_error(format!("{} compensation steps failed", failures))
        };
        audit_log!(record);
        failures
    }
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("label", &self.label)
            .field("correlation_id", &self.correlation_id)
            .field("journal", &self.journal.len())
            .finish()
    }
}

/// Counters for coordinated mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub committed: u64,
    pub compensated: u64,
    /// Compensation steps that failed and left the controller out of step.
    pub compensation_failures: u64,
}

/// Runs logical mutations atomically across the store and the controller.
pub struct TransactionCoordinator {
    controller: Arc<dyn Controller>,
    transactions: Arc<dyn TransactionalStore>,
    guard: Arc<dyn NamedLock>,
    stats: Mutex<TransactionStats>,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

impl TransactionCoordinator {
    pub fn new(
        controller: Arc<dyn Controller>,
        transactions: Arc<dyn TransactionalStore>,
        guard: Arc<dyn NamedLock>,
    ) -> Self {
        Self {
            controller,
            transactions,
            guard,
            stats: Mutex::new(TransactionStats::default()),
        }
    }

    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    pub fn stats(&self) -> TransactionStats {
        self.stats.lock().clone()
    }

    /// Runs `work` inside one local transaction. On failure, including a
    /// failed commit, controller objects created by `work` are deleted and
    /// the local transaction is rolled back before the error is returned.
    pub fn run<T, F>(&self, label: &str, work: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    {
        let txn = self.transactions.begin()?;
        let mut uow = UnitOfWork::new(self.controller.as_ref(), label);
        debug!(label, correlation_id = %uow.correlation_id(), "Begin unit of work");

        let outcome = work(&mut uow)
            .and_then(|value| self.transactions.commit(&txn).map(|()| value).map_err(Into::into));

        match outcome {
            Ok(value) => {
                self.stats.lock().committed += 1;
                debug!(label, steps = uow.journal().len(), "Committed unit of work");
                Ok(value)
            }
            Err(err) => {
                warn!(label, error = %err, steps = uow.journal().len(), "Unit of work failed, compensating");
                let failures = uow.compensate(&err.to_string());
                if let Err(e) = self.transactions.rollback(txn) {
                    error!(label, error = %e, "Local rollback failed");
                }
                let mut stats = self.stats.lock();
                stats.compensated += 1;
                stats.compensation_failures += failures as u64;
                Err(err)
            }
        }
    }

    /// Like [`run`](Self::run), holding the port critical section for the
    /// whole unit of work.
    pub fn run_port_scoped<T, F>(&self, label: &str, work: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    {
        let _section = CriticalSection::enter(self.guard.as_ref(), PORT_CRITICAL_SECTION)?;
        self.run(label, work)
    }
}
