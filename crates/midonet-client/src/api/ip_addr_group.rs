//! IP address groups: named address sets that rules match against.

use crate::types::IpAddrGroupId;
use midonet_types::IpAddress;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddrGroup {
    pub id: IpAddrGroupId,
    pub name: String,
    pub addresses: BTreeSet<IpAddress>,
}
