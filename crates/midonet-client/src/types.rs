//! Kind-checked controller object IDs.
//!
//! Controller objects are addressed by UUIDs. Wrapping them in a typed ID
//! keeps a chain ID from being passed where a port ID is expected, even though
//! both are the same 128 bits on the wire.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ClientError;

/// Marker trait for controller object kinds.
pub trait ObjectKind: Send + Sync + 'static {
    /// Returns the object kind name used in logs and errors.
    fn type_name() -> &'static str;
}

/// A type-safe controller object ID.
///
/// # Examples
///
/// ```
/// use midonet_client::{BridgeId, PortId};
/// use uuid::Uuid;
///
/// let raw = Uuid::new_v4();
/// let bridge = BridgeId::from_uuid(raw);
/// assert_eq!(bridge.as_uuid(), raw);
///
/// // This would fail to compile:
/// // fn takes_port(p: PortId) {}
/// // takes_port(bridge);
/// ```
#[derive(Clone, Copy)]
pub struct ObjectId<K: ObjectKind> {
    uuid: Uuid,
    _marker: PhantomData<K>,
}

impl<K: ObjectKind> ObjectId<K> {
    /// Generates a fresh random ID.
    pub fn new_v4() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl<K: ObjectKind> fmt::Debug for ObjectId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", K::type_name(), self.uuid)
    }
}

impl<K: ObjectKind> fmt::Display for ObjectId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uuid.fmt(f)
    }
}

impl<K: ObjectKind> PartialEq for ObjectId<K> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<K: ObjectKind> Eq for ObjectId<K> {}

impl<K: ObjectKind> PartialOrd for ObjectId<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: ObjectKind> Ord for ObjectId<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<K: ObjectKind> Hash for ObjectId<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<K: ObjectKind> From<Uuid> for ObjectId<K> {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<K: ObjectKind> FromStr for ObjectId<K> {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self::from_uuid)
            .map_err(|_| ClientError::invalid_request(format!("invalid {} id: {}", K::type_name(), s)))
    }
}

// ============================================================================
// Object Kind Markers
// ============================================================================

macro_rules! define_object_kind {
    ($name:ident, $type_name:literal, $id_alias:ident) => {
        #[doc = concat!("Marker type for controller ", $type_name, " objects.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl ObjectKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        #[doc = concat!("ID of a controller ", $type_name, ".")]
        pub type $id_alias = ObjectId<$name>;
    };
}

define_object_kind!(BridgeKind, "bridge", BridgeId);
define_object_kind!(RouterKind, "router", RouterId);
define_object_kind!(PortKind, "port", PortId);
define_object_kind!(ChainKind, "chain", ChainId);
define_object_kind!(RuleKind, "rule", RuleId);
define_object_kind!(RouteKind, "route", RouteId);
define_object_kind!(IpAddrGroupKind, "ip_addr_group", IpAddrGroupId);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_id_roundtrips_uuid() {
        let raw = Uuid::new_v4();
        let port = PortId::from_uuid(raw);
        assert_eq!(port.as_uuid(), raw);
        assert_eq!(port.to_string(), raw.to_string());
        assert_eq!(format!("{:?}", port), format!("port({})", raw));
    }

    #[test]
    fn test_parse_id() {
        let raw = Uuid::new_v4();
        let chain: ChainId = raw.to_string().parse().unwrap();
        assert_eq!(chain.as_uuid(), raw);

        let err = "not-a-uuid".parse::<ChainId>().unwrap_err();
        assert!(err.to_string().contains("invalid chain id"));
    }

    #[test]
    fn test_same_uuid_different_kinds_share_value() {
        let raw = Uuid::new_v4();
        let bridge = BridgeId::from_uuid(raw);
        let port = PortId::from_uuid(raw);
        assert_eq!(bridge.as_uuid(), port.as_uuid());
    }
}
