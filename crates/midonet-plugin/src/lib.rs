//! Translation layer between a logical network model and MidoNet.
//!
//! Callers manage networks, subnets, ports, routers, floating IPs and
//! security groups through [`MidonetPlugin`]. Each logical change is recorded
//! in a relational [`store`] and pushed to the controller as bridges,
//! routers, ports, rule chains, routes, IP address groups and DHCP entries.
//!
//! - [`mapper`]: Deterministic controller names and id correlation
//! - [`chains`]: Port, security group and router NAT chains
//! - [`txn`]: Units of work with compensation, port critical section
//! - [`topology`]: Provider router links, gateways and interfaces
//! - [`floating_ip`]: Floating IP association
//! - [`dhcp`]: DHCP mirroring onto bridges
//! - [`plugin`]: The CRUD facade tying it together
//! - [`config`], [`audit`], [`error`]: Ambient plumbing
//!
//! # Example
//!
//! ```
//! use midonet_client::{api::RouterSpec, Controller, MemoryController};
//! use midonet_plugin::{MemoryStore, MidonetPlugin, NetworkRequest, PluginConfig, Stores};
//! use std::sync::Arc;
//!
//! let controller = Arc::new(MemoryController::new());
//! let provider = controller
//!     .create_router(&RouterSpec::new("admin", "provider"))
//!     .unwrap();
//!
//! let mut config = PluginConfig::default();
//! config.midonet.provider_router_id = Some(provider.id.to_string());
//!
//! let stores = Stores::from_shared(Arc::new(MemoryStore::new()));
//! let plugin = MidonetPlugin::new(&config, controller.clone(), stores).unwrap();
//! let network = plugin
//!     .create_network(NetworkRequest::new("tenant-a", "net-1"))
//!     .unwrap();
//! assert_eq!(controller.bridge_count(), 1);
//! assert_eq!(plugin.get_network(network.id).unwrap().name, "net-1");
//! ```

pub mod audit;
pub mod chains;
pub mod config;
pub mod dhcp;
pub mod error;
pub mod floating_ip;
pub mod mapper;
pub mod model;
pub mod plugin;
pub mod store;
pub mod topology;
pub mod txn;

pub use audit::{AuditCategory, AuditOutcome, AuditRecord};
pub use config::PluginConfig;
pub use error::{PluginError, Result};
pub use floating_ip::{FloatingIpAssociator, Reassociation};
pub use model::{
    DeviceOwner, FixedIp, FloatingIp, FloatingIpRequest, FloatingIpUpdate, GatewayRequest,
    InterfaceTarget, Network, NetworkRequest, NetworkUpdate, Port, PortRequest, PortUpdate, Router,
    RouterRequest, RouterUpdate, SecurityGroup, SecurityGroupRequest, SecurityGroupRule,
    SecurityGroupRuleRequest, Subnet, SubnetRequest, SubnetUpdate,
};
pub use plugin::MidonetPlugin;
pub use store::{MemoryStore, Stores};
pub use topology::{RouterLinkState, RouterTopologyManager};
pub use txn::{TransactionCoordinator, TransactionStats, UnitOfWork};
