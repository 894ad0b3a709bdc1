//! Filter and NAT chain construction.
//!
//! ```text
//!     port inbound ----jump----> group egress chain
//!     port outbound ---jump----> group ingress chain
//!     router pre-routing  : DNAT / reverse SNAT
//!     router post-routing : SNAT
//! ```
//!
//! - [`rules`]: Rule specs, pure
//! - [`port`]: Port chain pair, anti-spoofing and group jumps
//! - [`security_group`]: Group chain pair, accept rules and IP address group
//!   membership
//! - [`nat`]: Router NAT chains, static and dynamic NAT rules
//!
//! Everything that creates controller objects takes a
//! [`UnitOfWork`](crate::txn::UnitOfWork) so a failed mutation can be undone.

pub mod nat;
pub mod port;
pub mod rules;
pub mod security_group;

pub use nat::NatChains;
pub use port::PortChains;
pub use security_group::GroupChains;
