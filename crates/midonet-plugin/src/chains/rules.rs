//! Rule specs the plugin installs. Pure; nothing here talks to the controller.

use crate::error::{PluginError, Result};
use crate::mapper::{ip_addr_group_id, FLOATING_IP_TAG, SG_RULE_TAG, SNAT_TAG_VALUE, TENANT_ROUTER_RULE_TAG};
use crate::model::{Direction, SecurityGroupRule};
use midonet_client::api::{Chain, NatTarget, RuleAction, RuleSpec};
use midonet_client::PortId;
use midonet_types::{EtherType, IpAddress, IpPrefix, MacAddress, PortRange};
use uuid::Uuid;

/// Ports a dynamic SNAT may allocate from.
pub const SNAT_PORT_RANGE: PortRange = PortRange {
    start: 1,
    end: 65535,
};

// ============ Port chains ============

/// Drops everything that is not ARP. Ends both port chains.
pub fn drop_non_arp() -> RuleSpec {
    RuleSpec::new(RuleAction::Drop).with_dl_type(EtherType::Arp, true)
}

pub fn return_flow_accept() -> RuleSpec {
    RuleSpec::new(RuleAction::Accept).matching_return_flow()
}

/// Drops frames whose source MAC is not the port's.
pub fn mac_anti_spoof(mac: MacAddress) -> RuleSpec {
    RuleSpec::new(RuleAction::Drop).with_dl_src(mac, true)
}

/// Drops IP traffic of `addr`'s family whose source is not `addr`.
pub fn ip_anti_spoof(addr: IpAddress) -> RuleSpec {
    RuleSpec::new(RuleAction::Drop)
        .with_dl_type(EtherType::for_address(&addr), false)
        .with_nw_src(IpPrefix::host(addr), true)
}

pub fn is_ip_anti_spoof(spec: &RuleSpec) -> bool {
    spec.action == RuleAction::Drop && spec.inv_nw_src && spec.nw_src.is_some()
}

pub fn jump(target: &Chain) -> RuleSpec {
    RuleSpec::new(RuleAction::Jump {
        chain_id: target.id,
        chain_name: target.name.clone(),
    })
}

// ============ Security groups ============

/// Accept rule for one security group rule.
///
/// Chains are applied from the port's point of view, so an egress rule
/// matches its remote side as the destination of forward flows and an
/// ingress rule matches it as the source of return flows.
pub fn sg_accept_rule(rule: &SecurityGroupRule) -> Result<RuleSpec> {
    let mut spec = RuleSpec::new(RuleAction::Accept)
        .with_dl_type(rule.ethertype, false)
        .with_property(SG_RULE_TAG, rule.id.to_string());

    if let Some(proto) = rule.protocol {
        spec = spec.with_nw_proto(proto);
    }

    match rule.direction {
        Direction::Egress => {
            if let Some(group) = rule.remote_group_id {
                spec = spec.with_ip_addr_group_dst(ip_addr_group_id(group));
            }
            if let Some(prefix) = rule.remote_ip_prefix {
                spec = spec.with_nw_dst(prefix);
            }
            spec = spec.matching_forward_flow(true);
        }
        Direction::Ingress => {
            if let Some(group) = rule.remote_group_id {
                spec = spec.with_ip_addr_group_src(ip_addr_group_id(group));
            }
            if let Some(prefix) = rule.remote_ip_prefix {
                spec = spec.with_nw_src(prefix, false);
            }
            spec = spec.matching_forward_flow(false);
        }
    }

    if let Some(range) = destination_ports(rule)? {
        spec = spec.with_tp_dst(range);
    }
    Ok(spec)
}

fn destination_ports(rule: &SecurityGroupRule) -> Result<Option<PortRange>> {
    // ICMP keeps type/code in the port fields; only the upper bound is used.
    if rule.protocol.map_or(false, |p| p.is_icmp()) {
        return Ok(rule.port_range_max.map(PortRange::single));
    }
    // A missing end leaves that side of the range open.
    match (rule.port_range_min, rule.port_range_max) {
        (None, None) => Ok(None),
        (min, max) => PortRange::new(min.unwrap_or(0), max.unwrap_or(u16::MAX))
            .map(Some)
            .map_err(|e| PluginError::invalid(format!("security group rule {}: {}", rule.id, e))),
    }
}

// ============ NAT ============

/// Pre-routing DNAT of a floating IP to its fixed address.
pub fn static_dnat(fip_id: Uuid, floating: IpAddress, fixed: IpAddress, uplink: PortId) -> RuleSpec {
    RuleSpec::new(RuleAction::Dnat(vec![NatTarget::address(fixed)]))
        .with_nw_dst(IpPrefix::host(floating))
        .with_in_port(uplink)
        .with_property(FLOATING_IP_TAG, fip_id.to_string())
}

/// Post-routing SNAT of a fixed address to its floating IP.
pub fn static_snat(fip_id: Uuid, floating: IpAddress, fixed: IpAddress, uplink: PortId) -> RuleSpec {
    RuleSpec::new(RuleAction::Snat(vec![NatTarget::address(floating)]))
        .with_nw_src(IpPrefix::host(fixed), false)
        .with_out_port(uplink)
        .with_property(FLOATING_IP_TAG, fip_id.to_string())
}

/// Router-wide source NAT behind `gw_ip`: the reverse rule for pre-routing
/// and the translating rule for post-routing.
pub fn dynamic_snat_pair(gw_ip: IpAddress, uplink: PortId) -> (RuleSpec, RuleSpec) {
    let reverse = RuleSpec::new(RuleAction::RevSnat)
        .with_nw_dst(IpPrefix::host(gw_ip))
        .with_in_port(uplink)
        .with_property(TENANT_ROUTER_RULE_TAG, SNAT_TAG_VALUE);

    let target = NatTarget {
        address_from: gw_ip,
        address_to: gw_ip,
        port_from: SNAT_PORT_RANGE.start,
        port_to: SNAT_PORT_RANGE.end,
    };
    let forward = RuleSpec::new(RuleAction::Snat(vec![target]))
        .with_out_port(uplink)
        .with_property(TENANT_ROUTER_RULE_TAG, SNAT_TAG_VALUE);

    (reverse, forward)
}
