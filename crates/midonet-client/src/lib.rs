//! Typed model of the MidoNet controller API.
//!
//! The plugin never talks to the controller through untyped maps; every
//! object crossing the boundary is one of the types in [`api`], addressed by
//! a kind-checked [`ObjectId`].
//!
//! # Architecture
//!
//! - [`types`]: Kind-checked controller object IDs
//! - [`error`]: Error type returned by every controller call
//! - [`api`]: Bridges, routers, ports, chains, rules, routes, IP address
//!   groups and DHCP configuration
//! - [`controller`]: The [`Controller`] trait the plugin is written against
//! - [`memory`]: An in-process [`MemoryController`] with a call log and
//!   failure injection, used by tests and dry runs
//!
//! # Example
//!
//! ```
//! use midonet_client::{Controller, MemoryController, api::BridgeSpec};
//!
//! let controller = MemoryController::new();
//! let bridge = controller
//!     .create_bridge(&BridgeSpec::new("tenant-a", "net-1"))
//!     .unwrap();
//! assert_eq!(controller.get_bridge(bridge.id).unwrap().name, "net-1");
//! ```

pub mod api;
pub mod controller;
pub mod error;
pub mod memory;
pub mod types;

pub use controller::Controller;
pub use error::{ClientError, ClientResult};
pub use memory::{ControllerCall, MemoryController};
pub use types::{
    BridgeId, BridgeKind, ChainId, ChainKind, IpAddrGroupId, IpAddrGroupKind, ObjectId,
    ObjectKind, PortId, PortKind, RouteId, RouteKind, RouterId, RouterKind, RuleId, RuleKind,
};
