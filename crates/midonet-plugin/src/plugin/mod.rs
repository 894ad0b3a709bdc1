//! The plugin facade: logical CRUD translated onto the controller.
//!
//! ```text
//!   request
//!      |
//!   MidonetPlugin ---- Stores (logical records)
//!      |
//!   TransactionCoordinator (port operations under port-critical-section)
//!      |
//!   UnitOfWork -> ResourceMapper names
//!              -> chains:: (port, security group and NAT chains)
//!              -> RouterTopologyManager / FloatingIpAssociator
//!              -> dhcp::
//!      |
//!   Controller
//! ```
//!
//! - [`network`]: Networks and subnets, DHCP mirroring, external networks
//! - [`port`]: Ports and their filter chains
//! - [`router`]: Routers, gateways and interfaces
//! - [`floating_ip`]: Floating IP records and association
//! - [`security_group`]: Security groups and their rules
//!
//! Every operation emits one audit record when it settles.

mod floating_ip;
mod network;
mod port;
mod router;
mod security_group;

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::{LockBackend, PluginConfig};
use crate::error::{PluginError, Result};
use crate::floating_ip::FloatingIpAssociator;
use crate::model::Subnet;
use crate::store::Stores;
use crate::topology::RouterTopologyManager;
use crate::txn::{TransactionCoordinator, TransactionStats};
use midonet_client::Controller;
use midonet_orch_common::{LeaseLock, LeaseStore, LocalLock, NamedLock, RetryPolicy};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SOURCE: &str = "MidonetPlugin";

pub struct MidonetPlugin {
    controller: Arc<dyn Controller>,
    stores: Stores,
    coordinator: TransactionCoordinator,
    topology: Arc<RouterTopologyManager>,
    floating_ips: FloatingIpAssociator,
    dhcp_poll: RetryPolicy,
}

impl std::fmt::Debug for MidonetPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidonetPlugin")
            .field("topology", &self.topology)
            .field("coordinator", &self.coordinator)
            .field("dhcp_poll", &self.dhcp_poll)
            .finish()
    }
}

impl MidonetPlugin {
    /// Builds the plugin with an in-process port lock.
    ///
    /// The lease backend needs a lease store shared with the other plugin
    /// processes, so a `lease` configuration is refused here with
    /// [`PluginError::ConfigurationFatal`]; use
    /// [`MidonetPlugin::with_lease_store`] instead.
    pub fn new(config: &PluginConfig, controller: Arc<dyn Controller>, stores: Stores) -> Result<Self> {
        match config.locking.backend {
            LockBackend::Local => Self::with_lock(config, controller, stores, Arc::new(LocalLock::new())),
            LockBackend::Lease => {
                let e = PluginError::ConfigurationFatal(
                    "lock backend \"lease\" needs a shared lease store".to_string(),
                );
                audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "initialize")
                    .with_error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Builds the plugin with a lease lock over `leases`, the store every
    /// plugin process of the deployment shares.
    pub fn with_lease_store(
        config: &PluginConfig,
        controller: Arc<dyn Controller>,
        stores: Stores,
        leases: Arc<dyn LeaseStore>,
    ) -> Result<Self> {
        let owner = config
            .locking
            .owner_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let lock = Arc::new(LeaseLock::new(leases, owner, config.lease_config()));
        Self::with_lock(config, controller, stores, lock)
    }

    /// Builds the plugin around an existing lock, for deployments where
    /// several processes share one lease store.
    ///
    /// Fails with [`PluginError::ConfigurationFatal`] before any controller
    /// call when the provider router is not configured.
    pub fn with_lock(
        config: &PluginConfig,
        controller: Arc<dyn Controller>,
        stores: Stores,
        lock: Arc<dyn NamedLock>,
    ) -> Result<Self> {
        let provider_router_id = match config.provider_router_id() {
            Ok(id) => id,
            Err(e) => {
                audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "initialize")
                    .with_error(e.to_string()));
                return Err(e);
            }
        };

        let topology = Arc::new(RouterTopologyManager::new(controller.clone(), provider_router_id));
        let coordinator =
            TransactionCoordinator::new(controller.clone(), stores.transactions.clone(), lock);

        info!(provider_router = %provider_router_id, "MidoNet plugin initialized");
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "initialize")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(provider_router_id.to_string())
            .with_object_type("provider_router"));

        Ok(Self {
            floating_ips: FloatingIpAssociator::new(topology.clone()),
            controller,
            stores,
            coordinator,
            topology,
            dhcp_poll: config.dhcp_poll_policy(),
        })
    }

    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn topology(&self) -> &RouterTopologyManager {
        &self.topology
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.coordinator.stats()
    }

    /// Subnets of the given ids that still exist.
    fn subnets(&self, ids: impl IntoIterator<Item = Uuid>) -> Result<Vec<Subnet>> {
        let mut subnets: Vec<Subnet> = Vec::new();
        for id in ids {
            if subnets.iter().any(|s| s.id == id) {
                continue;
            }
            if let Some(subnet) = self.stores.networks.get_subnet(id)? {
                subnets.push(subnet);
            }
        }
        Ok(subnets)
    }

    /// Emits the audit record for a settled operation.
    fn audit<T>(
        &self,
        category: AuditCategory,
        action: &str,
        object_type: &str,
        object_id: Option<Uuid>,
        result: &Result<T>,
    ) {
        let mut record = AuditRecord::new(category, SOURCE, action).with_object_type(object_type);
        if let Some(id) = object_id {
            record = record.with_object_id(id.to_string());
        }
        record = match result {
            Ok(_) => record.with_outcome(AuditOutcome::Success),
            Err(
                e @ (PluginError::InUse { .. }
                | PluginError::CannotRemoveDefaultGroup(_)
                | PluginError::L3PortInUse { .. }),
            ) => record
                .with_outcome(AuditOutcome::Denied)
                .with_error(e.to_string()),
            Err(e) => record.with_error(e.to_string()),
        };
        audit_log!(record);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NetworkRequest, PortRequest};
    use crate::store::MemoryStore;
    use crate::txn::PORT_CRITICAL_SECTION;
    use midonet_client::api::RouterSpec;
    use midonet_client::{MemoryController, RouterId};
    use midonet_orch_common::MemoryLeaseStore;
    use midonet_types::MacAddress;

    #[test]
    fn test_missing_provider_router_is_fatal_before_controller_calls() {
        let controller = Arc::new(MemoryController::new());
        let store = Arc::new(MemoryStore::new());
        let result = MidonetPlugin::new(
            &PluginConfig::default(),
            controller.clone(),
            Stores::from_shared(store),
        );
        assert!(matches!(result, Err(PluginError::ConfigurationFatal(_))));
        assert!(controller.calls().is_empty());
    }

    fn lease_config(provider: RouterId, owner: &str) -> PluginConfig {
        let mut config = PluginConfig::default();
        config.midonet.provider_router_id = Some(provider.to_string());
        config.locking.backend = LockBackend::Lease;
        config.locking.owner_id = Some(owner.to_string());
        config.locking.max_retries = 2;
        config.locking.retry_backoff_ms = 1;
        config
    }

    #[test]
    fn test_lease_backend_needs_shared_store() {
        let controller = Arc::new(MemoryController::new());
        let config = lease_config(RouterId::from_uuid(Uuid::new_v4()), "node-1");
        let result = MidonetPlugin::new(&config, controller.clone(), Stores::from_shared(Arc::new(MemoryStore::new())));
        assert!(matches!(result, Err(PluginError::ConfigurationFatal(_))));
        assert!(controller.calls().is_empty());
    }

    #[test]
    fn test_plugins_sharing_lease_store_exclude_each_other() {
        let controller = Arc::new(MemoryController::new());
        let provider = controller
            .create_router(&RouterSpec::new("admin", "provider"))
            .unwrap()
            .id;
        let store = Arc::new(MemoryStore::new());
        let leases = Arc::new(MemoryLeaseStore::new());
        let first = MidonetPlugin::with_lease_store(
            &lease_config(provider, "node-1"),
            controller.clone(),
            Stores::from_shared(store.clone()),
            leases.clone(),
        )
        .unwrap();
        let second = MidonetPlugin::with_lease_store(
            &lease_config(provider, "node-2"),
            controller.clone(),
            Stores::from_shared(store),
            leases.clone(),
        )
        .unwrap();
        let network = first
            .create_network(NetworkRequest::new("tenant", "net"))
            .unwrap();

        let key = LeaseLock::lease_key(PORT_CRITICAL_SECTION);
        let seen = first
            .coordinator
            .run_port_scoped("hold", |_| {
                let holder = leases.holder(&key).unwrap().unwrap();
                let blocked = second.create_port(PortRequest::new(
                    "tenant",
                    network.id,
                    MacAddress::new([0xfa, 0x16, 0x3e, 0, 0, 1]),
                ));
                Ok((holder.owner, blocked))
            })
            .unwrap();
        assert_eq!(seen.0, "node-1");
        assert!(matches!(seen.1, Err(PluginError::Lock(_))));

        assert!(leases.holder(&key).unwrap().is_none());
        second
            .create_port(PortRequest::new("tenant", network.id, MacAddress::new([0xfa, 0x16, 0x3e, 0, 0, 1])))
            .unwrap();
    }
}
