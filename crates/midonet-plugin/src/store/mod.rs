//! Relational store of logical resources.
//!
//! The plugin only needs a handful of capabilities from the store, each a
//! small trait. [`Stores`] bundles one handle per capability; a single
//! backend usually implements all of them and is shared through
//! [`Stores::from_shared`].
//!
//! ```text
//!            MidonetPlugin
//!                  |
//!               Stores
//!   +--------+-----+-------+---------------+
//!   |        |             |               |
//! networks  ports  routers (+fips)  security_groups     transactions
//! ```

pub mod memory;

pub use memory::MemoryStore;

use crate::model::{
    DeviceOwner, FloatingIp, Network, Port, Router, SecurityGroup, SecurityGroupRule, Subnet,
};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: Uuid },

    #[error("{kind} {id} is referenced by {by}")]
    Referenced {
        kind: &'static str,
        id: Uuid,
        by: String,
    },

    #[error("No open transaction")]
    NoTransaction,

    #[error("Transaction depth mismatch: open {open}, handle {handle}")]
    TransactionMismatch { open: usize, handle: usize },

    #[error("Store failure in {operation}: {message}")]
    Backend { operation: String, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Selects ports; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortFilter {
    pub network_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub device_owner: Option<DeviceOwner>,
    pub subnet_id: Option<Uuid>,
}

impl PortFilter {
    pub fn on_network(network_id: Uuid) -> Self {
        Self {
            network_id: Some(network_id),
            ..Self::default()
        }
    }

    pub fn on_subnet(subnet_id: Uuid) -> Self {
        Self {
            subnet_id: Some(subnet_id),
            ..Self::default()
        }
    }

    pub fn owned_by(mut self, owner: DeviceOwner) -> Self {
        self.device_owner = Some(owner);
        self
    }

    pub fn for_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn matches(&self, port: &Port) -> bool {
        self.network_id.map_or(true, |id| port.network_id == id)
            && self
                .device_id
                .as_deref()
                .map_or(true, |id| port.device_id == id)
            && self
                .device_owner
                .as_ref()
                .map_or(true, |owner| &port.device_owner == owner)
            && self
                .subnet_id
                .map_or(true, |id| port.fixed_ips.iter().any(|ip| ip.subnet_id == id))
    }
}

pub trait NetworkStore: Send + Sync {
    fn create_network(&self, network: Network) -> StoreResult<Network>;
    fn get_network(&self, id: Uuid) -> StoreResult<Option<Network>>;
    fn update_network(&self, network: Network) -> StoreResult<Network>;
    /// Removes the network with its subnets and DHCP ports. Fails while any
    /// other port is on it.
    fn delete_network(&self, id: Uuid) -> StoreResult<()>;

    fn create_subnet(&self, subnet: Subnet) -> StoreResult<Subnet>;
    fn get_subnet(&self, id: Uuid) -> StoreResult<Option<Subnet>>;
    fn update_subnet(&self, subnet: Subnet) -> StoreResult<Subnet>;
    /// Fails while a non-DHCP port holds an address on the subnet.
    fn delete_subnet(&self, id: Uuid) -> StoreResult<()>;
    fn list_subnets(&self, network_id: Uuid) -> StoreResult<Vec<Subnet>>;
}

pub trait PortStore: Send + Sync {
    fn create_port(&self, port: Port) -> StoreResult<Port>;
    fn get_port(&self, id: Uuid) -> StoreResult<Option<Port>>;
    fn update_port(&self, port: Port) -> StoreResult<Port>;
    fn delete_port(&self, id: Uuid) -> StoreResult<()>;
    fn list_ports(&self, filter: &PortFilter) -> StoreResult<Vec<Port>>;
}

pub trait RouterStore: Send + Sync {
    fn create_router(&self, router: Router) -> StoreResult<Router>;
    fn get_router(&self, id: Uuid) -> StoreResult<Option<Router>>;
    fn update_router(&self, router: Router) -> StoreResult<Router>;
    fn delete_router(&self, id: Uuid) -> StoreResult<()>;

    fn create_floating_ip(&self, fip: FloatingIp) -> StoreResult<FloatingIp>;
    fn get_floating_ip(&self, id: Uuid) -> StoreResult<Option<FloatingIp>>;
    fn update_floating_ip(&self, fip: FloatingIp) -> StoreResult<FloatingIp>;
    fn delete_floating_ip(&self, id: Uuid) -> StoreResult<()>;
    fn floating_ips_for_port(&self, port_id: Uuid) -> StoreResult<Vec<FloatingIp>>;
}

pub trait SecurityGroupStore: Send + Sync {
    fn create_security_group(&self, group: SecurityGroup) -> StoreResult<SecurityGroup>;
    fn get_security_group(&self, id: Uuid) -> StoreResult<Option<SecurityGroup>>;
    fn find_security_group(&self, tenant_id: &str, name: &str)
        -> StoreResult<Option<SecurityGroup>>;
    fn delete_security_group(&self, id: Uuid) -> StoreResult<()>;

    fn create_rule(&self, rule: SecurityGroupRule) -> StoreResult<SecurityGroupRule>;
    fn get_rule(&self, id: Uuid) -> StoreResult<Option<SecurityGroupRule>>;
    fn delete_rule(&self, id: Uuid) -> StoreResult<()>;

    /// Records that `port_id` belongs to every group in `groups`.
    fn bind_port(&self, port_id: Uuid, groups: &[Uuid]) -> StoreResult<()>;
    /// Drops every binding of `port_id`, returning the groups it had.
    fn unbind_port(&self, port_id: Uuid) -> StoreResult<Vec<Uuid>>;
    fn ports_bound_to(&self, group_id: Uuid) -> StoreResult<Vec<Uuid>>;
}

/// Handle for one open (possibly nested) transaction.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a transaction must be committed or rolled back"]
pub struct TxnHandle {
    depth: usize,
}

impl TxnHandle {
    pub fn new(depth: usize) -> Self {
        Self { depth }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Nested transactions. Handles must be closed innermost first. A failed
/// commit leaves the transaction open so the caller can still roll it back.
pub trait TransactionalStore: Send + Sync {
    fn begin(&self) -> StoreResult<TxnHandle>;
    fn commit(&self, txn: &TxnHandle) -> StoreResult<()>;
    fn rollback(&self, txn: TxnHandle) -> StoreResult<()>;
}

/// One handle per store capability.
#[derive(Clone)]
pub struct Stores {
    pub networks: Arc<dyn NetworkStore>,
    pub ports: Arc<dyn PortStore>,
    pub routers: Arc<dyn RouterStore>,
    pub security_groups: Arc<dyn SecurityGroupStore>,
    pub transactions: Arc<dyn TransactionalStore>,
}

impl Stores {
    /// Uses one backend for every capability.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: NetworkStore
            + PortStore
            + RouterStore
            + SecurityGroupStore
            + TransactionalStore
            + 'static,
    {
        Self {
            networks: store.clone(),
            ports: store.clone(),
            routers: store.clone(),
            security_groups: store.clone(),
            transactions: store,
        }
    }

    // ============ Required lookups ============

    pub fn network(&self, id: Uuid) -> StoreResult<Network> {
        self.networks
            .get_network(id)?
            .ok_or(StoreError::NotFound { kind: "network", id })
    }

    pub fn subnet(&self, id: Uuid) -> StoreResult<Subnet> {
        self.networks
            .get_subnet(id)?
            .ok_or(StoreError::NotFound { kind: "subnet", id })
    }

    pub fn port(&self, id: Uuid) -> StoreResult<Port> {
        self.ports
            .get_port(id)?
            .ok_or(StoreError::NotFound { kind: "port", id })
    }

    pub fn router(&self, id: Uuid) -> StoreResult<Router> {
        self.routers
            .get_router(id)?
            .ok_or(StoreError::NotFound { kind: "router", id })
    }

    pub fn floating_ip(&self, id: Uuid) -> StoreResult<FloatingIp> {
        self.routers
            .get_floating_ip(id)?
            .ok_or(StoreError::NotFound {
                kind: "floating_ip",
                id,
            })
    }

    pub fn security_group(&self, id: Uuid) -> StoreResult<SecurityGroup> {
        self.security_groups
            .get_security_group(id)?
            .ok_or(StoreError::NotFound {
                kind: "security_group",
                id,
            })
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
