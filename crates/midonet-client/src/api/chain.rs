//! Packet-filter chains and rules.
//!
//! Rules are evaluated in position order (position 1 is the head). A rule
//! matches when every populated match field matches; the `inv_*` flags negate
//! the field they sit next to.

use crate::types::{ChainId, IpAddrGroupId, PortId, RuleId};
use midonet_types::{EtherType, IpAddress, IpPrefix, IpProtocol, MacAddress, PortRange};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub id: ChainId,
    pub tenant_id: String,
    pub name: String,
}

/// Address and port window a NAT rule rewrites to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatTarget {
    pub address_from: IpAddress,
    pub address_to: IpAddress,
    pub port_from: u16,
    pub port_to: u16,
}

impl NatTarget {
    /// Rewrite to exactly one address, leaving L4 ports untouched.
    pub fn address(addr: IpAddress) -> Self {
        Self {
            address_from: addr,
            address_to: addr,
            port_from: 0,
            port_to: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    Accept,
    Drop,
    /// Continue evaluation in another chain; the name is kept so jump rules
    /// can be found without resolving IDs.
    Jump { chain_id: ChainId, chain_name: String },
    Dnat(Vec<NatTarget>),
    Snat(Vec<NatTarget>),
    /// Undo a dynamic SNAT on the return path.
    RevSnat,
}

/// Everything about a rule except its identity and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub action: RuleAction,
    pub dl_type: Option<EtherType>,
    pub inv_dl_type: bool,
    pub dl_src: Option<MacAddress>,
    pub inv_dl_src: bool,
    pub nw_src: Option<IpPrefix>,
    pub inv_nw_src: bool,
    pub nw_dst: Option<IpPrefix>,
    pub nw_proto: Option<IpProtocol>,
    pub tp_src: Option<PortRange>,
    pub tp_dst: Option<PortRange>,
    pub ip_addr_group_src: Option<IpAddrGroupId>,
    pub ip_addr_group_dst: Option<IpAddrGroupId>,
    pub match_forward_flow: bool,
    pub match_return_flow: bool,
    pub in_ports: Vec<PortId>,
    pub out_ports: Vec<PortId>,
    /// Free-form tags used to find rules again without tracking their IDs.
    pub properties: BTreeMap<String, String>,
}

impl RuleSpec {
    /// A rule that matches everything and performs `action`.
    pub fn new(action: RuleAction) -> Self {
        Self {
            action,
            dl_type: None,
            inv_dl_type: false,
            dl_src: None,
            inv_dl_src: false,
            nw_src: None,
            inv_nw_src: false,
            nw_dst: None,
            nw_proto: None,
            tp_src: None,
            tp_dst: None,
            ip_addr_group_src: None,
            ip_addr_group_dst: None,
            match_forward_flow: false,
            match_return_flow: false,
            in_ports: Vec::new(),
            out_ports: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_dl_type(mut self, ethertype: EtherType, inverted: bool) -> Self {
        self.dl_type = Some(ethertype);
        self.inv_dl_type = inverted;
        self
    }

    pub fn with_dl_src(mut self, mac: MacAddress, inverted: bool) -> Self {
        self.dl_src = Some(mac);
        self.inv_dl_src = inverted;
        self
    }

    pub fn with_nw_src(mut self, prefix: IpPrefix, inverted: bool) -> Self {
        self.nw_src = Some(prefix);
        self.inv_nw_src = inverted;
        self
    }

    pub fn with_nw_dst(mut self, prefix: IpPrefix) -> Self {
        self.nw_dst = Some(prefix);
        self
    }

    pub fn with_nw_proto(mut self, proto: IpProtocol) -> Self {
        self.nw_proto = Some(proto);
        self
    }

    pub fn with_tp_src(mut self, range: PortRange) -> Self {
        self.tp_src = Some(range);
        self
    }

    pub fn with_tp_dst(mut self, range: PortRange) -> Self {
        self.tp_dst = Some(range);
        self
    }

    pub fn with_ip_addr_group_src(mut self, group: IpAddrGroupId) -> Self {
        self.ip_addr_group_src = Some(group);
        self
    }

    pub fn with_ip_addr_group_dst(mut self, group: IpAddrGroupId) -> Self {
        self.ip_addr_group_dst = Some(group);
        self
    }

    pub fn matching_forward_flow(mut self, forward: bool) -> Self {
        self.match_forward_flow = forward;
        self
    }

    pub fn matching_return_flow(mut self) -> Self {
        self.match_return_flow = true;
        self
    }

    pub fn with_in_port(mut self, port: PortId) -> Self {
        self.in_ports.push(port);
        self
    }

    pub fn with_out_port(mut self, port: PortId) -> Self {
        self.out_ports.push(port);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Name of the chain this rule jumps to, if it is a jump rule.
    pub fn jump_target_name(&self) -> Option<&str> {
        match &self.action {
            RuleAction::Jump { chain_name, .. } => Some(chain_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub chain_id: ChainId,
    pub spec: RuleSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_populates_fields() {
        let mac: MacAddress = "fa:16:3e:00:00:01".parse().unwrap();
        let spec = RuleSpec::new(RuleAction::Drop)
            .with_dl_src(mac, true)
            .with_property("OS_SG_RULE_ID", "r1");

        assert_eq!(spec.dl_src, Some(mac));
        assert!(spec.inv_dl_src);
        assert_eq!(spec.property("OS_SG_RULE_ID"), Some("r1"));
        assert_eq!(spec.property("missing"), None);
        assert_eq!(spec.jump_target_name(), None);
    }

    #[test]
    fn test_jump_target_name() {
        let spec = RuleSpec::new(RuleAction::Jump {
            chain_id: ChainId::new_v4(),
            chain_name: "OS_SG_x_EGRESS".to_string(),
        });
        assert_eq!(spec.jump_target_name(), Some("OS_SG_x_EGRESS"));
    }
}
