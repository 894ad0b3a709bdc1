//! Coordination primitives for the MidoNet plugin.
//!
//! - [`NamedLock`]: Trait for named mutual exclusion, with the RAII
//!   [`CriticalSection`] guard
//! - [`LocalLock`]: In-process implementation (blocks until free)
//! - [`LeaseLock`]: Cluster-wide implementation over a [`LeaseStore`], with
//!   TTL-bounded leases and bounded acquisition retries
//! - [`RetryPolicy`]: Explicit bounded polling with a fixed delay
//!
//! # Example
//!
//! ```
//! use midonet_orch_common::{CriticalSection, LocalLock};
//!
//! let lock = LocalLock::new();
//! {
//!     let section = CriticalSection::enter(&lock, "port-critical-section").unwrap();
//!     assert_eq!(section.name(), "port-critical-section");
//!     // controller calls for one port mutation happen here
//! }
//! // released on drop
//! assert!(!lock.is_held("port-critical-section"));
//! ```

mod lease;
mod lock;
mod retry;

pub use lease::{LeaseConfig, LeaseLock, LeaseStore, LockHolder, MemoryLeaseStore};
pub use lock::{CriticalSection, LocalLock, LockError, LockResult, LockToken, NamedLock};
pub use retry::RetryPolicy;
