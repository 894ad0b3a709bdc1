//! End-to-end tests of the plugin against the in-memory controller and store.
//!
//! Each test builds a small topology through the public API and checks the
//! controller objects it leaves behind.

use midonet_client::api::{DeviceId, RuleAction};
use midonet_client::{Controller, MemoryController, PortId, RouterId};
use midonet_orch_common::MemoryLeaseStore;
use midonet_plugin::chains::nat::nat_chains;
use midonet_plugin::chains::port::find_port_chains;
use midonet_plugin::chains::rules::drop_non_arp;
use midonet_plugin::chains::security_group::group_chains;
use midonet_plugin::config::LockBackend;
use midonet_plugin::mapper::ip_addr_group_id;
use midonet_plugin::model::Direction;
use midonet_plugin::{
    DeviceOwner, GatewayRequest, MemoryStore, MidonetPlugin, Network, NetworkRequest, PluginConfig,
    PluginError, Port, PortRequest, RouterLinkState, RouterRequest, SecurityGroupRequest,
    SecurityGroupRuleRequest, Stores, Subnet, SubnetRequest,
};
use midonet_types::{EtherType, IpAddress, IpPrefix, IpProtocol, MacAddress, PortRange};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const TENANT: &str = "tenant-a";

struct Deployment {
    controller: Arc<MemoryController>,
    store: Arc<MemoryStore>,
    plugin: Arc<MidonetPlugin>,
    provider: RouterId,
}

fn deploy_with(controller: MemoryController, backend: LockBackend) -> Deployment {
    let controller = Arc::new(controller);
    let provider = controller
        .create_router(&midonet_client::api::RouterSpec::new("admin", "provider"))
        .unwrap()
        .id;
    let store = Arc::new(MemoryStore::new());

    let mut config = PluginConfig::default();
    config.midonet.provider_router_id = Some(provider.to_string());
    config.locking.backend = backend;
    config.dhcp.port_poll_attempts = 1;
    config.dhcp.port_poll_interval_ms = 1;

    let stores = Stores::from_shared(store.clone());
    let plugin = match backend {
        LockBackend::Local => MidonetPlugin::new(&config, controller.clone(), stores),
        LockBackend::Lease => MidonetPlugin::with_lease_store(
            &config,
            controller.clone(),
            stores,
            Arc::new(MemoryLeaseStore::new()),
        ),
    }
    .unwrap();
    Deployment {
        controller,
        store,
        plugin: Arc::new(plugin),
        provider,
    }
}

fn deploy() -> Deployment {
    deploy_with(MemoryController::new(), LockBackend::Local)
}

fn mac(suffix: u8) -> MacAddress {
    MacAddress::new([0xfa, 0x16, 0x3e, 0, 1, suffix])
}

impl Deployment {
    fn network(&self, request: NetworkRequest, cidr: IpPrefix, gateway: IpAddress) -> (Network, Subnet) {
        let network = self.plugin.create_network(request).unwrap();
        let subnet = self
            .plugin
            .create_subnet(SubnetRequest::new(network.id, network.tenant_id.as_str(), cidr).with_gateway(gateway))
            .unwrap();
        (network, subnet)
    }

    fn private_network(&self) -> (Network, Subnet) {
        self.network(
            NetworkRequest::new(TENANT, "private"),
            IpPrefix::v4(10, 0, 0, 0, 24),
            IpAddress::v4(10, 0, 0, 1),
        )
    }

    fn public_network(&self) -> (Network, Subnet) {
        self.network(
            NetworkRequest::new("admin", "public").external(),
            IpPrefix::v4(200, 0, 0, 0, 24),
            IpAddress::v4(200, 0, 0, 1),
        )
    }

    fn vm_port(&self, subnet: &Subnet, host: u8, groups: Option<Vec<Uuid>>) -> Port {
        let mut request = PortRequest::new(TENANT, subnet.network_id, mac(host))
            .with_owner(DeviceOwner::from("compute:nova"), format!("vm-{}", host))
            .with_fixed_ip(subnet.id, IpAddress::v4(10, 0, 0, host));
        request.security_groups = groups;
        self.plugin.create_port(request).unwrap()
    }

    fn inbound_jumps(&self, port: &Port) -> Vec<String> {
        let chains = find_port_chains(self.controller.as_ref(), TENANT, port.id)
            .unwrap()
            .unwrap();
        self.controller
            .list_rules(chains.inbound.id)
            .unwrap()
            .iter()
            .filter_map(|r| r.spec.jump_target_name().map(str::to_string))
            .collect()
    }
}

#[test]
fn test_gateway_router_gets_snat_behind_external_ip() {
    let d = deploy();
    let (public, public_subnet) = d.public_network();
    let router = d
        .plugin
        .create_router(RouterRequest::new(TENANT, "edge").with_gateway(GatewayRequest::new(
            public.id,
            public_subnet.id,
            IpAddress::v4(200, 0, 0, 5),
        )))
        .unwrap();

    assert_eq!(
        d.plugin.topology().link_state(TENANT, router.id).unwrap(),
        RouterLinkState::SnatConfigured
    );
    let chains = nat_chains(d.controller.as_ref(), TENANT, router.id).unwrap();
    let post = d.controller.list_rules(chains.post_routing.id).unwrap();
    let snat = post
        .iter()
        .find_map(|r| match &r.spec.action {
            RuleAction::Snat(targets) => Some(targets.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(snat[0].address_from, IpAddress::v4(200, 0, 0, 5));
    let pre = d.controller.list_rules(chains.pre_routing.id).unwrap();
    assert!(pre.iter().any(|r| r.spec.action == RuleAction::RevSnat));

    let controller_router = d.controller.get_router(RouterId::from_uuid(router.id)).unwrap();
    assert_eq!(controller_router.inbound_filter, Some(chains.pre_routing.id));
    assert_eq!(controller_router.outbound_filter, Some(chains.post_routing.id));
}

#[test]
fn test_gateway_without_snat_is_only_linked() {
    let d = deploy();
    let (public, public_subnet) = d.public_network();
    let router = d
        .plugin
        .create_router(
            RouterRequest::new(TENANT, "edge").with_gateway(
                GatewayRequest::new(public.id, public_subnet.id, IpAddress::v4(200, 0, 0, 6)).without_snat(),
            ),
        )
        .unwrap();
    assert_eq!(
        d.plugin.topology().link_state(TENANT, router.id).unwrap(),
        RouterLinkState::Linked
    );
}

#[test]
fn test_ssh_rule_reaches_vm_through_group_chain() {
    let d = deploy();
    let (_, subnet) = d.private_network();
    let ssh = d
        .plugin
        .create_security_group(SecurityGroupRequest::new(TENANT, "ssh"))
        .unwrap();
    d.plugin
        .create_security_group_rule(
            SecurityGroupRuleRequest::new(ssh.id, TENANT, Direction::Ingress, EtherType::Ipv4)
                .with_protocol(IpProtocol::TCP)
                .with_ports(22, 22),
        )
        .unwrap();
    let port = d.vm_port(&subnet, 10, Some(vec![ssh.id]));

    let group = group_chains(d.controller.as_ref(), TENANT, ssh.id).unwrap();
    let chains = find_port_chains(d.controller.as_ref(), TENANT, port.id)
        .unwrap()
        .unwrap();
    let outbound = d.controller.list_rules(chains.outbound.id).unwrap();
    assert!(outbound
        .iter()
        .any(|r| r.spec.jump_target_name() == Some(group.ingress.name.as_str())));
    assert_eq!(outbound.last().unwrap().spec, drop_non_arp());

    let ingress = d.controller.list_rules(group.ingress.id).unwrap();
    assert_eq!(ingress.len(), 1);
    assert_eq!(ingress[0].spec.nw_proto, Some(IpProtocol::TCP));
    assert_eq!(ingress[0].spec.tp_dst, Some(PortRange::single(22)));

    let members = d.controller.get_ip_addr_group(ip_addr_group_id(ssh.id)).unwrap();
    assert!(members.addresses.contains(&IpAddress::v4(10, 0, 0, 10)));
}

#[test]
fn test_jump_order_ignores_bind_order() {
    let d = deploy();
    let (_, subnet) = d.private_network();
    let web = d
        .plugin
        .create_security_group(SecurityGroupRequest::new(TENANT, "web"))
        .unwrap();
    let db = d
        .plugin
        .create_security_group(SecurityGroupRequest::new(TENANT, "db"))
        .unwrap();

    let first = d.vm_port(&subnet, 11, Some(vec![web.id, db.id]));
    let second = d.vm_port(&subnet, 12, Some(vec![db.id, web.id]));

    let jumps = d.inbound_jumps(&first);
    assert_eq!(jumps.len(), 2);
    assert_eq!(jumps, d.inbound_jumps(&second));

    let chains = find_port_chains(d.controller.as_ref(), TENANT, first.id)
        .unwrap()
        .unwrap();
    let inbound = d.controller.list_rules(chains.inbound.id).unwrap();
    assert_eq!(inbound.last().unwrap().spec, drop_non_arp());
}

#[test]
fn test_group_in_use_keeps_its_resources() {
    let d = deploy();
    let (_, subnet) = d.private_network();
    let web = d
        .plugin
        .create_security_group(SecurityGroupRequest::new(TENANT, "web"))
        .unwrap();
    let port = d.vm_port(&subnet, 13, Some(vec![web.id]));
    let chains_before = d.controller.chain_names();

    assert!(matches!(
        d.plugin.delete_security_group(web.id),
        Err(PluginError::InUse { .. })
    ));
    assert_eq!(d.controller.chain_names(), chains_before);
    assert!(d.controller.get_ip_addr_group(ip_addr_group_id(web.id)).is_ok());

    d.plugin.delete_port(port.id, true).unwrap();
    d.plugin.delete_security_group(web.id).unwrap();
    assert!(group_chains(d.controller.as_ref(), TENANT, web.id).is_err());
    assert!(d.controller.get_ip_addr_group(ip_addr_group_id(web.id)).is_err());
}

#[test]
fn test_failed_port_leaves_no_trace() {
    let d = deploy();
    let (network, subnet) = d.private_network();
    let ports_before = d.controller.port_count();
    let chains_before = d.controller.chain_names();

    d.controller.fail_on_nth("add_rule", 2);
    let result = d.plugin.create_port(
        PortRequest::new(TENANT, network.id, mac(14)).with_fixed_ip(subnet.id, IpAddress::v4(10, 0, 0, 14)),
    );
    assert!(result.is_err());

    assert_eq!(d.controller.port_count(), ports_before);
    assert_eq!(d.controller.chain_names(), chains_before);
    assert_eq!(d.store.port_count(), 0);
    assert_eq!(d.store.open_transactions(), 0);
    let stats = d.plugin.transaction_stats();
    assert_eq!(stats.compensated, 1);
    assert_eq!(stats.compensation_failures, 0);
}

#[test]
fn test_network_with_ports_cannot_be_deleted() {
    let d = deploy();
    let (network, subnet) = d.private_network();
    let port = d.vm_port(&subnet, 15, None);

    assert!(matches!(
        d.plugin.delete_network(network.id),
        Err(PluginError::InUse { .. })
    ));
    assert!(d.controller.get_bridge(midonet_client::BridgeId::from_uuid(network.id)).is_ok());

    d.plugin.delete_port(port.id, true).unwrap();
    d.plugin.delete_network(network.id).unwrap();
    assert_eq!(d.controller.bridge_count(), 0);
    assert!(d
        .controller
        .list_ports(DeviceId::Router(d.provider))
        .unwrap()
        .is_empty());
}

#[test]
fn test_concurrent_port_creation_is_serialized() {
    let d = deploy_with(
        MemoryController::new().with_latency(Duration::from_millis(1)),
        LockBackend::Local,
    );
    let (_, subnet) = d.private_network();
    d.controller.clear_calls();

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let plugin = d.plugin.clone();
            let subnet = subnet.clone();
            thread::spawn(move || {
                let host = 20 + i;
                plugin
                    .create_port(
                        PortRequest::new(TENANT, subnet.network_id, mac(host))
                            .with_fixed_ip(subnet.id, IpAddress::v4(10, 0, 0, host)),
                    )
                    .unwrap()
            })
        })
        .collect();
    let ports: Vec<Port> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ports.len(), 4);

    // Each thread's controller calls form one contiguous run.
    let calls = d.controller.calls();
    let mut runs = Vec::new();
    for call in &calls {
        if runs.last() != Some(&call.thread) {
            runs.push(call.thread);
        }
    }
    assert_eq!(runs.len(), 4);
}
