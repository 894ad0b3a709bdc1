//! In-process store.
//!
//! Transactions are snapshots: `begin` copies the tables, `rollback` puts the
//! copy back, `commit` drops it. Snapshot stacks are kept per thread so
//! nested scopes from different request threads do not pair up with each
//! other. A rollback restores the whole table set, so it also discards writes
//! other threads committed meanwhile; this store is meant for tests and
//! single-writer tools.

use super::{
    NetworkStore, PortFilter, PortStore, RouterStore, SecurityGroupStore, StoreError, StoreResult,
    TransactionalStore, TxnHandle,
};
use crate::model::{
    DeviceOwner, FloatingIp, Network, Port, Router, SecurityGroup, SecurityGroupRule, Subnet,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    networks: BTreeMap<Uuid, Network>,
    subnets: BTreeMap<Uuid, Subnet>,
    // Insertion order is kept so listings are deterministic.
    ports: Vec<Port>,
    routers: BTreeMap<Uuid, Router>,
    floating_ips: BTreeMap<Uuid, FloatingIp>,
    security_groups: BTreeMap<Uuid, SecurityGroup>,
}

impl Tables {
    fn port_index(&self, id: Uuid) -> StoreResult<usize> {
        self.ports
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::NotFound { kind: "port", id })
    }

    fn group_mut(&mut self, id: Uuid) -> StoreResult<&mut SecurityGroup> {
        self.security_groups.get_mut(&id).ok_or(StoreError::NotFound {
            kind: "security_group",
            id,
        })
    }
}

/// Store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    snapshots: Mutex<HashMap<ThreadId, Vec<Tables>>>,
    failures: Mutex<Vec<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call to `operation` with a backend error.
    pub fn fail_on(&self, operation: &'static str) {
        self.failures.lock().push(operation);
    }

    /// Open transactions on the calling thread.
    pub fn open_transactions(&self) -> usize {
        self.snapshots
            .lock()
            .get(&thread::current().id())
            .map_or(0, Vec::len)
    }

    pub fn network_count(&self) -> usize {
        self.tables.lock().networks.len()
    }

    pub fn port_count(&self) -> usize {
        self.tables.lock().ports.len()
    }

    pub fn router_count(&self) -> usize {
        self.tables.lock().routers.len()
    }

    pub fn security_group_count(&self) -> usize {
        self.tables.lock().security_groups.len()
    }

    fn check(&self, operation: &'static str) -> StoreResult<()> {
        let mut failures = self.failures.lock();
        if let Some(pos) = failures.iter().position(|op| *op == operation) {
            failures.remove(pos);
            warn!(operation, "Injected store failure");
            return Err(StoreError::Backend {
                operation: operation.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl NetworkStore for MemoryStore {
    fn create_network(&self, network: Network) -> StoreResult<Network> {
        self.check("create_network")?;
        let mut tables = self.tables.lock();
        if tables.networks.contains_key(&network.id) {
            return Err(StoreError::Duplicate {
                kind: "network",
                id: network.id,
            });
        }
        tables.networks.insert(network.id, network.clone());
        Ok(network)
    }

    fn get_network(&self, id: Uuid) -> StoreResult<Option<Network>> {
        Ok(self.tables.lock().networks.get(&id).cloned())
    }

    fn update_network(&self, network: Network) -> StoreResult<Network> {
        self.check("update_network")?;
        let mut tables = self.tables.lock();
        let slot = tables.networks.get_mut(&network.id).ok_or(StoreError::NotFound {
            kind: "network",
            id: network.id,
        })?;
        *slot = network.clone();
        Ok(network)
    }

    fn delete_network(&self, id: Uuid) -> StoreResult<()> {
        self.check("delete_network")?;
        let mut tables = self.tables.lock();
        if !tables.networks.contains_key(&id) {
            return Err(StoreError::NotFound { kind: "network", id });
        }
        if let Some(port) = tables
            .ports
            .iter()
            .find(|p| p.network_id == id && p.device_owner != DeviceOwner::Dhcp)
        {
            return Err(StoreError::Referenced {
                kind: "network",
                id,
                by: format!("port {}", port.id),
            });
        }
        tables.ports.retain(|p| p.network_id != id);
        tables.subnets.retain(|_, s| s.network_id != id);
        tables.networks.remove(&id);
        Ok(())
    }

    fn create_subnet(&self, subnet: Subnet) -> StoreResult<Subnet> {
        self.check("create_subnet")?;
        let mut tables = self.tables.lock();
        if !tables.networks.contains_key(&subnet.network_id) {
            return Err(StoreError::NotFound {
                kind: "network",
                id: subnet.network_id,
            });
        }
        if tables.subnets.contains_key(&subnet.id) {
            return Err(StoreError::Duplicate {
                kind: "subnet",
                id: subnet.id,
            });
        }
        tables.subnets.insert(subnet.id, subnet.clone());
        Ok(subnet)
    }

    fn get_subnet(&self, id: Uuid) -> StoreResult<Option<Subnet>> {
        Ok(self.tables.lock().subnets.get(&id).cloned())
    }

    fn update_subnet(&self, subnet: Subnet) -> StoreResult<Subnet> {
        self.check("update_subnet")?;
        let mut tables = self.tables.lock();
        let slot = tables.subnets.get_mut(&subnet.id).ok_or(StoreError::NotFound {
            kind: "subnet",
            id: subnet.id,
        })?;
        *slot = subnet.clone();
        Ok(subnet)
    }

    fn delete_subnet(&self, id: Uuid) -> StoreResult<()> {
        self.check("delete_subnet")?;
        let mut tables = self.tables.lock();
        if !tables.subnets.contains_key(&id) {
            return Err(StoreError::NotFound { kind: "subnet", id });
        }
        if let Some(port) = tables.ports.iter().find(|p| {
            p.device_owner != DeviceOwner::Dhcp && p.fixed_ips.iter().any(|ip| ip.subnet_id == id)
        }) {
            return Err(StoreError::Referenced {
                kind: "subnet",
                id,
                by: format!("port {}", port.id),
            });
        }
        for port in tables.ports.iter_mut() {
            port.fixed_ips.retain(|ip| ip.subnet_id != id);
        }
        tables.subnets.remove(&id);
        Ok(())
    }

    fn list_subnets(&self, network_id: Uuid) -> StoreResult<Vec<Subnet>> {
        Ok(self
            .tables
            .lock()
            .subnets
            .values()
            .filter(|s| s.network_id == network_id)
            .cloned()
            .collect())
    }
}

impl PortStore for MemoryStore {
    fn create_port(&self, port: Port) -> StoreResult<Port> {
        self.check("create_port")?;
        let mut tables = self.tables.lock();
        if !tables.networks.contains_key(&port.network_id) {
            return Err(StoreError::NotFound {
                kind: "network",
                id: port.network_id,
            });
        }
        if let Some(ip) = port
            .fixed_ips
            .iter()
            .find(|ip| !tables.subnets.contains_key(&ip.subnet_id))
        {
            return Err(StoreError::NotFound {
                kind: "subnet",
                id: ip.subnet_id,
            });
        }
        if tables.ports.iter().any(|p| p.id == port.id) {
            return Err(StoreError::Duplicate {
                kind: "port",
                id: port.id,
            });
        }
        tables.ports.push(port.clone());
        Ok(port)
    }

    fn get_port(&self, id: Uuid) -> StoreResult<Option<Port>> {
        Ok(self.tables.lock().ports.iter().find(|p| p.id == id).cloned())
    }

    fn update_port(&self, port: Port) -> StoreResult<Port> {
        self.check("update_port")?;
        let mut tables = self.tables.lock();
        let index = tables.port_index(port.id)?;
        tables.ports[index] = port.clone();
        Ok(port)
    }

    fn delete_port(&self, id: Uuid) -> StoreResult<()> {
        self.check("delete_port")?;
        let mut tables = self.tables.lock();
        let index = tables.port_index(id)?;
        tables.ports.remove(index);
        for fip in tables.floating_ips.values_mut() {
            if fip.port_id == Some(id) {
                fip.port_id = None;
                fip.fixed_ip_address = None;
                fip.router_id = None;
            }
        }
        Ok(())
    }

    fn list_ports(&self, filter: &PortFilter) -> StoreResult<Vec<Port>> {
        Ok(self
            .tables
            .lock()
            .ports
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }
}

impl RouterStore for MemoryStore {
    fn create_router(&self, router: Router) -> StoreResult<Router> {
        self.check("create_router")?;
        let mut tables = self.tables.lock();
        if tables.routers.contains_key(&router.id) {
            return Err(StoreError::Duplicate {
                kind: "router",
                id: router.id,
            });
        }
        tables.routers.insert(router.id, router.clone());
        Ok(router)
    }

    fn get_router(&self, id: Uuid) -> StoreResult<Option<Router>> {
        Ok(self.tables.lock().routers.get(&id).cloned())
    }

    fn update_router(&self, router: Router) -> StoreResult<Router> {
        self.check("update_router")?;
        let mut tables = self.tables.lock();
        let slot = tables.routers.get_mut(&router.id).ok_or(StoreError::NotFound {
            kind: "router",
            id: router.id,
        })?;
        *slot = router.clone();
        Ok(router)
    }

    fn delete_router(&self, id: Uuid) -> StoreResult<()> {
        self.check("delete_router")?;
        let mut tables = self.tables.lock();
        if let Some(fip) = tables.floating_ips.values().find(|f| f.router_id == Some(id)) {
            return Err(StoreError::Referenced {
                kind: "router",
                id,
                by: format!("floating_ip {}", fip.id),
            });
        }
        tables
            .routers
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { kind: "router", id })
    }

    fn create_floating_ip(&self, fip: FloatingIp) -> StoreResult<FloatingIp> {
        self.check("create_floating_ip")?;
        let mut tables = self.tables.lock();
        if tables
            .floating_ips
            .values()
            .any(|f| f.floating_ip_address == fip.floating_ip_address)
        {
            return Err(StoreError::Duplicate {
                kind: "floating_ip",
                id: fip.id,
            });
        }
        tables.floating_ips.insert(fip.id, fip.clone());
        Ok(fip)
    }

    fn get_floating_ip(&self, id: Uuid) -> StoreResult<Option<FloatingIp>> {
        Ok(self.tables.lock().floating_ips.get(&id).cloned())
    }

    fn update_floating_ip(&self, fip: FloatingIp) -> StoreResult<FloatingIp> {
        self.check("update_floating_ip")?;
        let mut tables = self.tables.lock();
        let slot = tables.floating_ips.get_mut(&fip.id).ok_or(StoreError::NotFound {
            kind: "floating_ip",
            id: fip.id,
        })?;
        *slot = fip.clone();
        Ok(fip)
    }

    fn delete_floating_ip(&self, id: Uuid) -> StoreResult<()> {
        self.check("delete_floating_ip")?;
        self.tables
            .lock()
            .floating_ips
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                kind: "floating_ip",
                id,
            })
    }

    fn floating_ips_for_port(&self, port_id: Uuid) -> StoreResult<Vec<FloatingIp>> {
        Ok(self
            .tables
            .lock()
            .floating_ips
            .values()
            .filter(|f| f.port_id == Some(port_id))
            .cloned()
            .collect())
    }
}

impl SecurityGroupStore for MemoryStore {
    fn create_security_group(&self, group: SecurityGroup) -> StoreResult<SecurityGroup> {
        self.check("create_security_group")?;
        let mut tables = self.tables.lock();
        if tables.security_groups.contains_key(&group.id) {
            return Err(StoreError::Duplicate {
                kind: "security_group",
                id: group.id,
            });
        }
        tables.security_groups.insert(group.id, group.clone());
        Ok(group)
    }

    fn get_security_group(&self, id: Uuid) -> StoreResult<Option<SecurityGroup>> {
        Ok(self.tables.lock().security_groups.get(&id).cloned())
    }

    fn find_security_group(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> StoreResult<Option<SecurityGroup>> {
        Ok(self
            .tables
            .lock()
            .security_groups
            .values()
            .find(|g| g.tenant_id == tenant_id && g.name == name)
            .cloned())
    }

    fn delete_security_group(&self, id: Uuid) -> StoreResult<()> {
        self.check("delete_security_group")?;
        let mut tables = self.tables.lock();
        if let Some(port) = tables.ports.iter().find(|p| p.security_groups.contains(&id)) {
            return Err(StoreError::Referenced {
                kind: "security_group",
                id,
                by: format!("port {}", port.id),
            });
        }
        tables
            .security_groups
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                kind: "security_group",
                id,
            })
    }

    fn create_rule(&self, rule: SecurityGroupRule) -> StoreResult<SecurityGroupRule> {
        self.check("create_rule")?;
        let mut tables = self.tables.lock();
        let group = tables.group_mut(rule.security_group_id)?;
        if group.rules.iter().any(|r| r.id == rule.id) {
            return Err(StoreError::Duplicate {
                kind: "security_group_rule",
                id: rule.id,
            });
        }
        group.rules.push(rule.clone());
        Ok(rule)
    }

    fn get_rule(&self, id: Uuid) -> StoreResult<Option<SecurityGroupRule>> {
        Ok(self
            .tables
            .lock()
            .security_groups
            .values()
            .flat_map(|g| g.rules.iter())
            .find(|r| r.id == id)
            .cloned())
    }

    fn delete_rule(&self, id: Uuid) -> StoreResult<()> {
        self.check("delete_rule")?;
        let mut tables = self.tables.lock();
        for group in tables.security_groups.values_mut() {
            if let Some(pos) = group.rules.iter().position(|r| r.id == id) {
                group.rules.remove(pos);
                return Ok(());
            }
        }
        Err(StoreError::NotFound {
            kind: "security_group_rule",
            id,
        })
    }

    fn bind_port(&self, port_id: Uuid, groups: &[Uuid]) -> StoreResult<()> {
        self.check("bind_port")?;
        let mut tables = self.tables.lock();
        if let Some(missing) = groups
            .iter()
            .find(|id| !tables.security_groups.contains_key(id))
        {
            return Err(StoreError::NotFound {
                kind: "security_group",
                id: *missing,
            });
        }
        let index = tables.port_index(port_id)?;
        let port = &mut tables.ports[index];
        for group in groups {
            if !port.security_groups.contains(group) {
                port.security_groups.push(*group);
            }
        }
        Ok(())
    }

    fn unbind_port(&self, port_id: Uuid) -> StoreResult<Vec<Uuid>> {
        self.check("unbind_port")?;
        let mut tables = self.tables.lock();
        let index = tables.port_index(port_id)?;
        Ok(std::mem::take(&mut tables.ports[index].security_groups))
    }

    fn ports_bound_to(&self, group_id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .tables
            .lock()
            .ports
            .iter()
            .filter(|p| p.security_groups.contains(&group_id))
            .map(|p| p.id)
            .collect())
    }
}

impl TransactionalStore for MemoryStore {
    fn begin(&self) -> StoreResult<TxnHandle> {
        self.check("begin")?;
        let snapshot = self.tables.lock().clone();
        let mut snapshots = self.snapshots.lock();
        let stack = snapshots.entry(thread::current().id()).or_default();
        stack.push(snapshot);
        debug!(depth = stack.len(), "Began store transaction");
        Ok(TxnHandle::new(stack.len()))
    }

    fn commit(&self, txn: &TxnHandle) -> StoreResult<()> {
        self.check("commit")?;
        let mut snapshots = self.snapshots.lock();
        let stack = snapshots
            .get_mut(&thread::current().id())
            .ok_or(StoreError::NoTransaction)?;
        if stack.len() != txn.depth() {
            return Err(StoreError::TransactionMismatch {
                open: stack.len(),
                handle: txn.depth(),
            });
        }
        stack.pop();
        debug!(depth = txn.depth(), "Committed store transaction");
        Ok(())
    }

    fn rollback(&self, txn: TxnHandle) -> StoreResult<()> {
        let mut snapshots = self.snapshots.lock();
        let stack = snapshots
            .get_mut(&thread::current().id())
            .ok_or(StoreError::NoTransaction)?;
        if stack.len() != txn.depth() {
            return Err(StoreError::TransactionMismatch {
                open: stack.len(),
                handle: txn.depth(),
            });
        }
        let snapshot = stack.pop().ok_or(StoreError::NoTransaction)?;
        *self.tables.lock() = snapshot;
        debug!(depth = txn.depth(), "Rolled back store transaction");
        Ok(())
    }
}
