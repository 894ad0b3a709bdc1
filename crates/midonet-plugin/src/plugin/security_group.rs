use super::MidonetPlugin;
use crate::audit::AuditCategory;
use crate::chains::security_group as sg_chains;
use crate::error::{PluginError, Result};
use crate::model::{
    Direction, SecurityGroup, SecurityGroupRequest, SecurityGroupRule, SecurityGroupRuleRequest,
    DEFAULT_SECURITY_GROUP_NAME,
};
use crate::txn::UnitOfWork;
use midonet_types::EtherType;
use tracing::info;
use uuid::Uuid;

/// Rules every default group starts with: all egress, and ingress from
/// members of the group itself.
fn default_rules(group_id: Uuid, tenant_id: &str) -> Vec<SecurityGroupRule> {
    let mut rules = Vec::with_capacity(4);
    for ethertype in [EtherType::Ipv4, EtherType::Ipv6] {
        rules.push(
            SecurityGroupRuleRequest::new(group_id, tenant_id, Direction::Egress, ethertype)
                .into_rule(Uuid::new_v4()),
        );
        rules.push(
            SecurityGroupRuleRequest::new(group_id, tenant_id, Direction::Ingress, ethertype)
                .with_remote_group(group_id)
                .into_rule(Uuid::new_v4()),
        );
    }
    rules
}

impl MidonetPlugin {
    /// The tenant's default group, created with its rules if missing.
    pub fn ensure_default_security_group(&self, tenant_id: &str) -> Result<SecurityGroup> {
        self.coordinator
            .run("ensure_default_security_group", |uow| {
                self.ensure_default_group_in(uow, tenant_id)
            })
    }

    pub(super) fn ensure_default_group_in(&self, uow: &mut UnitOfWork<'_>, tenant_id: &str) -> Result<SecurityGroup> {
        if let Some(group) = self
            .stores
            .security_groups
            .find_security_group(tenant_id, DEFAULT_SECURITY_GROUP_NAME)?
        {
            return Ok(group);
        }
        let group = self.create_group_in(uow, SecurityGroupRequest::new(tenant_id, DEFAULT_SECURITY_GROUP_NAME))?;
        info!(tenant = tenant_id, security_group = %group.id, "Created default security group");
        Ok(group)
    }

    fn create_group_in(&self, uow: &mut UnitOfWork<'_>, request: SecurityGroupRequest) -> Result<SecurityGroup> {
        let id = Uuid::new_v4();
        let is_default = request.name == DEFAULT_SECURITY_GROUP_NAME;
        let rules = if is_default {
            default_rules(id, &request.tenant_id)
        } else {
            Vec::new()
        };
        let group = self.stores.security_groups.create_security_group(SecurityGroup {
            id,
            tenant_id: request.tenant_id,
            name: request.name,
            description: request.description,
            rules,
        })?;
        sg_chains::create_group_resources(uow, &group)?;
        Ok(group)
    }

    // ============ Security groups ============

    /// Creates the group with its IP address group and chains. A tenant gets
    /// its default group alongside its first group.
    pub fn create_security_group(&self, request: SecurityGroupRequest) -> Result<SecurityGroup> {
        let result = self.coordinator.run("create_security_group", |uow| {
            let tenant_id = request.tenant_id.clone();
            if request.name == DEFAULT_SECURITY_GROUP_NAME {
                if self
                    .stores
                    .security_groups
                    .find_security_group(&tenant_id, DEFAULT_SECURITY_GROUP_NAME)?
                    .is_some()
                {
                    return Err(PluginError::invalid(format!(
                        "tenant {} already has a default security group",
                        tenant_id
                    )));
                }
                return self.create_group_in(uow, request);
            }
            let group = self.create_group_in(uow, request)?;
            self.ensure_default_group_in(uow, &tenant_id)?;
            Ok(group)
        });
        self.audit(
            AuditCategory::SecurityPolicy,
            "create_security_group",
            "security_group",
            result.as_ref().ok().map(|g| g.id),
            &result,
        );
        result
    }

    pub fn get_security_group(&self, id: Uuid) -> Result<SecurityGroup> {
        Ok(self.stores.security_group(id)?)
    }

    /// Deletes a group no port is bound to. The default group cannot be
    /// deleted.
    pub fn delete_security_group(&self, id: Uuid) -> Result<()> {
        let result = self.coordinator.run("delete_security_group", |uow| {
            let group = self.stores.security_group(id)?;
            if group.is_default() {
                return Err(PluginError::CannotRemoveDefaultGroup(id));
            }
            let bound = self.stores.security_groups.ports_bound_to(id)?;
            if let Some(port) = bound.first() {
                return Err(PluginError::in_use(
                    "security_group",
                    id,
                    format!("bound to {} port(s), including {}", bound.len(), port),
                ));
            }
            self.stores.security_groups.delete_security_group(id)?;
            sg_chains::delete_group_resources(uow.controller(), &group.tenant_id, id)?;
            Ok(())
        });
        self.audit(
            AuditCategory::SecurityPolicy,
            "delete_security_group",
            "security_group",
            Some(id),
            &result,
        );
        result
    }

    // ============ Rules ============

    pub fn create_security_group_rule(&self, request: SecurityGroupRuleRequest) -> Result<SecurityGroupRule> {
        let mut created = self.create_security_group_rules(vec![request])?;
        created
            .pop()
            .ok_or_else(|| PluginError::invalid("no security group rule created"))
    }

    /// Creates every rule or none: a failure part way removes the accept
    /// rules already added.
    pub fn create_security_group_rules(
        &self,
        requests: Vec<SecurityGroupRuleRequest>,
    ) -> Result<Vec<SecurityGroupRule>> {
        let count = requests.len();
        let result = self.coordinator.run("create_security_group_rules", |uow| {
            let mut created = Vec::with_capacity(requests.len());
            for request in requests {
                let group = self.stores.security_group(request.security_group_id)?;
                let rule = self
                    .stores
                    .security_groups
                    .create_rule(request.into_rule(Uuid::new_v4()))?;
                let chains = sg_chains::group_chains(uow.controller(), &group.tenant_id, group.id)?;
                sg_chains::add_group_rule(uow, &chains, &rule)?;
                created.push(rule);
            }
            info!(rules = created.len(), "Created security group rules");
            Ok(created)
        });
        let object_id = match &result {
            Ok(rules) if count == 1 => rules.first().map(|r| r.id),
            _ => None,
        };
        self.audit(
            AuditCategory::SecurityPolicy,
            "create_security_group_rules",
            "security_group_rule",
            object_id,
            &result,
        );
        result
    }

    pub fn delete_security_group_rule(&self, id: Uuid) -> Result<()> {
        let result = self.coordinator.run("delete_security_group_rule", |uow| {
            let rule = self
                .stores
                .security_groups
                .get_rule(id)?
                .ok_or_else(|| PluginError::not_found("security_group_rule", id))?;
            let group = self.stores.security_group(rule.security_group_id)?;
            self.stores.security_groups.delete_rule(id)?;
            sg_chains::remove_group_rule(uow.controller(), &group.tenant_id, &rule)?;
            Ok(())
        });
        self.audit(
            AuditCategory::SecurityPolicy,
            "delete_security_group_rule",
            "security_group_rule",
            Some(id),
            &result,
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::chains::security_group::group_chains;
    use crate::error::PluginError;
    use crate::model::{Direction, SecurityGroupRequest, SecurityGroupRuleRequest};
    use crate::plugin::testing::harness;
    use midonet_client::api::RuleAction;
    use midonet_client::Controller;
    use midonet_types::{EtherType, IpPrefix, IpProtocol, PortRange};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_group_rules() {
        let h = harness();
        let group = h.plugin.ensure_default_security_group("tenant").unwrap();
        assert!(group.is_default());
        assert_eq!(group.rules.len(), 4);

        let chains = group_chains(h.controller.as_ref(), "tenant", group.id).unwrap();
        assert_eq!(h.controller.list_rules(chains.egress.id).unwrap().len(), 2);
        let ingress = h.controller.list_rules(chains.ingress.id).unwrap();
        assert_eq!(ingress.len(), 2);
        assert!(ingress.iter().all(|r| r.spec.ip_addr_group_src.is_some()));

        let again = h.plugin.ensure_default_security_group("tenant").unwrap();
        assert_eq!(again.id, group.id);
    }

    #[test]
    fn test_create_group_ensures_default() {
        let h = harness();
        let group = h
            .plugin
            .create_security_group(SecurityGroupRequest::new("tenant", "web"))
            .unwrap();
        assert!(group.rules.is_empty());
        assert_eq!(h.store.security_group_count(), 2);
        assert_eq!(h.controller.ip_addr_group_count(), 2);

        assert!(matches!(
            h.plugin
                .create_security_group(SecurityGroupRequest::new("tenant", "default")),
            Err(PluginError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_default_group_cannot_be_deleted() {
        let h = harness();
        let group = h.plugin.ensure_default_security_group("tenant").unwrap();
        assert!(matches!(
            h.plugin.delete_security_group(group.id),
            Err(PluginError::CannotRemoveDefaultGroup(id)) if id == group.id
        ));
    }

    #[test]
    fn test_ingress_tcp_22_rule() {
        let h = harness();
        let group = h
            .plugin
            .create_security_group(SecurityGroupRequest::new("tenant", "ssh"))
            .unwrap();
        let rule = h
            .plugin
            .create_security_group_rule(
                SecurityGroupRuleRequest::new(group.id, "tenant", Direction::Ingress, EtherType::Ipv4)
                    .with_protocol(IpProtocol::TCP)
                    .with_ports(22, 22)
                    .with_remote_prefix(IpPrefix::ANY_V4),
            )
            .unwrap();

        let chains = group_chains(h.controller.as_ref(), "tenant", group.id).unwrap();
        let ingress = h.controller.list_rules(chains.ingress.id).unwrap();
        assert_eq!(ingress.len(), 1);
        assert_eq!(ingress[0].spec.action, RuleAction::Accept);
        assert_eq!(ingress[0].spec.tp_dst, Some(PortRange::single(22)));
        assert_eq!(ingress[0].spec.property("OS_SG_RULE_ID"), Some(rule.id.to_string().as_str()));
        assert!(h.controller.list_rules(chains.egress.id).unwrap().is_empty());

        h.plugin.delete_security_group_rule(rule.id).unwrap();
        assert!(h.controller.list_rules(chains.ingress.id).unwrap().is_empty());
        assert!(h.plugin.get_security_group(group.id).unwrap().rules.is_empty());
    }

    #[test]
    fn test_bulk_rules_are_all_or_nothing() {
        let h = harness();
        let group = h
            .plugin
            .create_security_group(SecurityGroupRequest::new("tenant", "web"))
            .unwrap();
        let chains = group_chains(h.controller.as_ref(), "tenant", group.id).unwrap();
        let rule = |port| {
            SecurityGroupRuleRequest::new(group.id, "tenant", Direction::Ingress, EtherType::Ipv4)
                .with_protocol(IpProtocol::TCP)
                .with_ports(port, port)
        };

        h.controller.fail_on_nth("add_rule", 1);
        let result = h
            .plugin
            .create_security_group_rules(vec![rule(80), rule(443)]);
        assert!(result.is_err());
        assert!(h.controller.list_rules(chains.ingress.id).unwrap().is_empty());
        assert!(h.plugin.get_security_group(group.id).unwrap().rules.is_empty());

        let created = h
            .plugin
            .create_security_group_rules(vec![rule(80), rule(443)])
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(h.controller.list_rules(chains.ingress.id).unwrap().len(), 2);
    }
}
