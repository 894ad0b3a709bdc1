//! Logical network resources as the plugin's callers see them.

use midonet_types::{EtherType, IpAddress, IpPrefix, IpProtocol, MacAddress};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of the security group every tenant gets automatically.
pub const DEFAULT_SECURITY_GROUP_NAME: &str = "default";

// ============ Networks and subnets ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
    /// External networks hang off the provider router.
    pub external: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRoute {
    pub destination: IpPrefix,
    pub nexthop: IpAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: Uuid,
    pub network_id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub cidr: IpPrefix,
    pub gateway_ip: Option<IpAddress>,
    pub dns_nameservers: Vec<IpAddress>,
    pub host_routes: Vec<HostRoute>,
    pub enable_dhcp: bool,
}

impl Subnet {
    pub fn is_ipv4(&self) -> bool {
        self.cidr.is_ipv4()
    }
}

// ============ Ports ============

/// Who a port belongs to. Decides which controller wiring the port gets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceOwner {
    /// A VM interface or anything else not owned by the network service.
    /// The string is kept as given, possibly empty.
    Compute(String),
    Dhcp,
    RouterInterface,
    RouterGateway,
    FloatingIp,
}

impl DeviceOwner {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceOwner::Compute(s) => s,
            DeviceOwner::Dhcp => "network:dhcp",
            DeviceOwner::RouterInterface => "network:router_interface",
            DeviceOwner::RouterGateway => "network:router_gateway",
            DeviceOwner::FloatingIp => "network:floatingip",
        }
    }

    /// Plain VM ports: the only ones that get filter chains.
    pub fn is_vif(&self) -> bool {
        matches!(self, DeviceOwner::Compute(_))
    }
}

impl From<&str> for DeviceOwner {
    fn from(s: &str) -> Self {
        match s {
            "network:router_interface" => DeviceOwner::RouterInterface,
            "network:router_gateway" => DeviceOwner::RouterGateway,
            "network:floatingip" => DeviceOwner::FloatingIp,
            _ if s.starts_with("network:dhcp") => DeviceOwner::Dhcp,
            other => DeviceOwner::Compute(other.to_string()),
        }
    }
}

impl From<String> for DeviceOwner {
    fn from(s: String) -> Self {
        DeviceOwner::from(s.as_str())
    }
}

impl From<DeviceOwner> for String {
    fn from(owner: DeviceOwner) -> Self {
        owner.as_str().to_string()
    }
}

impl fmt::Display for DeviceOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: Uuid,
    pub ip_address: IpAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortStatus {
    Active,
    Down,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: Uuid,
    pub tenant_id: String,
    pub network_id: Uuid,
    pub name: String,
    pub mac_address: MacAddress,
    pub fixed_ips: Vec<FixedIp>,
    pub device_owner: DeviceOwner,
    pub device_id: String,
    pub security_groups: Vec<Uuid>,
    pub admin_state_up: bool,
    pub status: PortStatus,
}

impl Port {
    pub fn addresses(&self) -> impl Iterator<Item = IpAddress> + '_ {
        self.fixed_ips.iter().map(|ip| ip.ip_address)
    }

    /// Router id for router-owned ports.
    pub fn router_id(&self) -> Option<Uuid> {
        match self.device_owner {
            DeviceOwner::RouterInterface | DeviceOwner::RouterGateway => {
                Uuid::parse_str(&self.device_id).ok()
            }
            _ => None,
        }
    }
}

// ============ Routers ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub network_id: Uuid,
    pub subnet_id: Uuid,
    pub external_ip: IpAddress,
    pub enable_snat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
    pub gateway: Option<GatewayInfo>,
    pub gw_port_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterInterface {
    pub router_id: Uuid,
    pub subnet_id: Uuid,
    pub port_id: Uuid,
}

// ============ Floating IPs ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: Uuid,
    pub tenant_id: String,
    pub floating_network_id: Uuid,
    pub floating_ip_address: IpAddress,
    pub port_id: Option<Uuid>,
    pub fixed_ip_address: Option<IpAddress>,
    pub router_id: Option<Uuid>,
}

impl FloatingIp {
    pub fn is_associated(&self) -> bool {
        self.port_id.is_some()
    }
}

// ============ Security groups ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub id: Uuid,
    pub security_group_id: Uuid,
    pub tenant_id: String,
    pub direction: Direction,
    pub ethertype: EtherType,
    pub protocol: Option<IpProtocol>,
    pub port_range_min: Option<u16>,
    pub port_range_max: Option<u16>,
    pub remote_group_id: Option<Uuid>,
    pub remote_ip_prefix: Option<IpPrefix>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
    pub rules: Vec<SecurityGroupRule>,
}

impl SecurityGroup {
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_SECURITY_GROUP_NAME
    }
}

// ============ Requests ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
    pub external: bool,
}

impl NetworkRequest {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: name.into(),
            admin_state_up: true,
            external: false,
        }
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkUpdate {
    pub name: Option<String>,
    pub admin_state_up: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRequest {
    pub network_id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub cidr: IpPrefix,
    pub gateway_ip: Option<IpAddress>,
    pub dns_nameservers: Vec<IpAddress>,
    pub host_routes: Vec<HostRoute>,
    pub enable_dhcp: bool,
}

impl SubnetRequest {
    pub fn new(network_id: Uuid, tenant_id: impl Into<String>, cidr: IpPrefix) -> Self {
        Self {
            network_id,
            tenant_id: tenant_id.into(),
            name: String::new(),
            cidr,
            gateway_ip: None,
            dns_nameservers: Vec::new(),
            host_routes: Vec::new(),
            enable_dhcp: true,
        }
    }

    pub fn with_gateway(mut self, gateway_ip: IpAddress) -> Self {
        self.gateway_ip = Some(gateway_ip);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the gateway.
    pub gateway_ip: Option<Option<IpAddress>>,
    pub dns_nameservers: Option<Vec<IpAddress>>,
    pub host_routes: Option<Vec<HostRoute>>,
    pub enable_dhcp: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRequest {
    pub tenant_id: String,
    pub network_id: Uuid,
    pub name: String,
    pub mac_address: MacAddress,
    pub fixed_ips: Vec<FixedIp>,
    pub device_owner: DeviceOwner,
    pub device_id: String,
    /// `None` binds the tenant's default group; `Some(vec![])` binds nothing.
    pub security_groups: Option<Vec<Uuid>>,
    pub admin_state_up: bool,
}

impl PortRequest {
    pub fn new(tenant_id: impl Into<String>, network_id: Uuid, mac_address: MacAddress) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            network_id,
            name: String::new(),
            mac_address,
            fixed_ips: Vec::new(),
            device_owner: DeviceOwner::Compute(String::new()),
            device_id: String::new(),
            security_groups: None,
            admin_state_up: true,
        }
    }

    pub fn with_fixed_ip(mut self, subnet_id: Uuid, ip_address: IpAddress) -> Self {
        self.fixed_ips.push(FixedIp {
            subnet_id,
            ip_address,
        });
        self
    }

    pub fn with_owner(mut self, owner: DeviceOwner, device_id: impl Into<String>) -> Self {
        self.device_owner = owner;
        self.device_id = device_id.into();
        self
    }

    pub fn with_security_groups(mut self, groups: Vec<Uuid>) -> Self {
        self.security_groups = Some(groups);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortUpdate {
    pub name: Option<String>,
    pub admin_state_up: Option<bool>,
    pub fixed_ips: Option<Vec<FixedIp>>,
    pub security_groups: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterRequest {
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
    pub gateway: Option<GatewayRequest>,
}

impl RouterRequest {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: name.into(),
            admin_state_up: true,
            gateway: None,
        }
    }

    pub fn with_gateway(mut self, gateway: GatewayRequest) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

/// External gateway for a router. Addresses are chosen by the caller; the
/// gateway port gets exactly `external_ip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayRequest {
    pub network_id: Uuid,
    pub external_ip: FixedIp,
    pub enable_snat: bool,
}

impl GatewayRequest {
    pub fn new(network_id: Uuid, subnet_id: Uuid, ip_address: IpAddress) -> Self {
        Self {
            network_id,
            external_ip: FixedIp {
                subnet_id,
                ip_address,
            },
            enable_snat: true,
        }
    }

    pub fn without_snat(mut self) -> Self {
        self.enable_snat = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterUpdate {
    pub name: Option<String>,
    pub admin_state_up: Option<bool>,
    /// `Some(None)` clears the gateway; `Some(Some(_))` sets or replaces it.
    pub gateway: Option<Option<GatewayRequest>>,
}

/// What to attach a router to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceTarget {
    /// Create a new interface port at the subnet's gateway address.
    Subnet(Uuid),
    /// Use an existing port on the subnet's network.
    Port(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIpRequest {
    pub tenant_id: String,
    pub floating_network_id: Uuid,
    pub floating_ip_address: IpAddress,
    pub port_id: Option<Uuid>,
    pub fixed_ip_address: Option<IpAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FloatingIpUpdate {
    /// `None` disassociates.
    pub port_id: Option<Uuid>,
    pub fixed_ip_address: Option<IpAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRequest {
    pub tenant_id: String,
    pub name: String,
    pub description: String,
}

impl SecurityGroupRequest {
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: name.into(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRuleRequest {
    pub security_group_id: Uuid,
    pub tenant_id: String,
    pub direction: Direction,
    pub ethertype: EtherType,
    pub protocol: Option<IpProtocol>,
    pub port_range_min: Option<u16>,
    pub port_range_max: Option<u16>,
    pub remote_group_id: Option<Uuid>,
    pub remote_ip_prefix: Option<IpPrefix>,
}

impl SecurityGroupRuleRequest {
    pub fn new(
        security_group_id: Uuid,
        tenant_id: impl Into<String>,
        direction: Direction,
        ethertype: EtherType,
    ) -> Self {
        Self {
            security_group_id,
            tenant_id: tenant_id.into(),
            direction,
            ethertype,
            protocol: None,
            port_range_min: None,
            port_range_max: None,
            remote_group_id: None,
            remote_ip_prefix: None,
        }
    }

    pub fn with_protocol(mut self, protocol: IpProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_ports(mut self, min: u16, max: u16) -> Self {
        self.port_range_min = Some(min);
        self.port_range_max = Some(max);
        self
    }

    pub fn with_remote_group(mut self, group: Uuid) -> Self {
        self.remote_group_id = Some(group);
        self
    }

    pub fn with_remote_prefix(mut self, prefix: IpPrefix) -> Self {
        self.remote_ip_prefix = Some(prefix);
        self
    }

    pub fn into_rule(self, id: Uuid) -> SecurityGroupRule {
        SecurityGroupRule {
            id,
            security_group_id: self.security_group_id,
            tenant_id: self.tenant_id,
            direction: self.direction,
            ethertype: self.ethertype,
            protocol: self.protocol,
            port_range_min: self.port_range_min,
            port_range_max: self.port_range_max,
            remote_group_id: self.remote_group_id,
            remote_ip_prefix: self.remote_ip_prefix,
        }
    }
}
