//! Scope-level access evaluation for the in-memory backend.
//!
//! # Purpose and responsibility
//! Builds a Casbin enforcer for one scope from the backend role policies and
//! the role bindings that apply inside that scope, then answers
//! `(subject, scope, kind, verb)` questions.
//!
//! # Key invariants and assumptions
//! - Policies describe what a backend role may do; they are the same in every
//!   scope.
//! - Groupings come from role bindings stored in the scope itself plus
//!   propagating bindings stored in its ancestors.
//!
//! # Security considerations
//! - An enforcer is built per decision from current bindings; no decision
//!   outlives the call that made it.
use crate::model::ResourceKind;
use crate::store::Verb;
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi, Result};
use stratus_authz::{
    POLICY_WILDCARD, ROLE_ADMIN, ROLE_CF_USER, ROLE_ORGANIZATION_AUDITOR,
    ROLE_ORGANIZATION_BILLING_MANAGER, ROLE_ORGANIZATION_MANAGER, ROLE_ORGANIZATION_USER,
    ROLE_SPACE_AUDITOR, ROLE_SPACE_DEVELOPER, ROLE_SPACE_MANAGER, ROLE_SPACE_SUPPORTER, RoleTable,
    casbin_model,
};

/// Backend role name held by cluster administrators.
pub const CLUSTER_ADMIN_ROLE: &str = "stratus-cluster-admin";

/// Casbin domain standing in for the cluster-level (empty) scope.
const CLUSTER_DOMAIN: &str = "::cluster";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub role: String,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(role: impl Into<String>, object: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            object: object.into(),
            action: action.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingRule {
    pub subject: String,
    pub role: String,
}

/// Default permissions for the backend roles named by `roles`.
///
/// Roles missing from the table get no rules.
pub fn standard_policies(roles: &RoleTable) -> Vec<PolicyRule> {
    const READ: [Verb; 3] = [Verb::Get, Verb::List, Verb::Watch];
    const ALL: &str = POLICY_WILDCARD;

    let mut rules = vec![PolicyRule::new(CLUSTER_ADMIN_ROLE, ALL, ALL)];
    let mut grant = |role_type: &str, kinds: &[ResourceKind], verbs: &[Verb]| {
        let Some(config) = roles.get(role_type) else {
            return;
        };
        for kind in kinds {
            for verb in verbs {
                rules.push(PolicyRule::new(
                    config.backend_role.clone(),
                    kind.as_str(),
                    verb.as_str(),
                ));
            }
        }
    };

    use ResourceKind::{App, Build, Org, Route, RoleBinding, ServicePlan, Space};

    let write = [Verb::Create, Verb::Patch, Verb::Delete];
    let workloads = [Route, Build, App];

    grant(ROLE_ADMIN, &ResourceKind::all(), &READ);
    grant(ROLE_ADMIN, &ResourceKind::all(), &write);
    grant(ROLE_CF_USER, &[ServicePlan], &READ);

    grant(ROLE_ORGANIZATION_MANAGER, &[Org, Space, RoleBinding], &READ);
    grant(ROLE_ORGANIZATION_MANAGER, &[Org, Space, RoleBinding], &write);
    grant(ROLE_ORGANIZATION_MANAGER, &workloads, &READ);
    for role_type in [
        ROLE_ORGANIZATION_USER,
        ROLE_ORGANIZATION_AUDITOR,
        ROLE_ORGANIZATION_BILLING_MANAGER,
    ] {
        grant(role_type, &[Org, Space, RoleBinding], &READ);
    }

    grant(ROLE_SPACE_DEVELOPER, &workloads, &READ);
    grant(ROLE_SPACE_DEVELOPER, &workloads, &write);
    grant(ROLE_SPACE_DEVELOPER, &[RoleBinding], &READ);
    grant(ROLE_SPACE_MANAGER, &workloads, &READ);
    grant(ROLE_SPACE_MANAGER, &[RoleBinding], &READ);
    grant(ROLE_SPACE_MANAGER, &[RoleBinding], &write);
    grant(ROLE_SPACE_AUDITOR, &workloads, &READ);
    grant(ROLE_SPACE_AUDITOR, &[RoleBinding], &READ);
    grant(ROLE_SPACE_SUPPORTER, &workloads, &READ);
    grant(ROLE_SPACE_SUPPORTER, &[RoleBinding], &READ);
    grant(ROLE_SPACE_SUPPORTER, &[App], &[Verb::Patch]);

    rules
}

/// Build an in-memory Casbin enforcer for one scope.
///
/// # Errors
/// - Returns Casbin errors for an invalid model or policy insertion failures.
pub async fn build_enforcer(
    policies: &[PolicyRule],
    groupings: &[GroupingRule],
    domain: &str,
) -> Result<Enforcer> {
    let model = casbin_model().await?;
    let adapter = MemoryAdapter::default();
    let mut enforcer = Enforcer::new(model, adapter).await?;

    for policy in policies {
        enforcer
            .add_policy(vec![
                policy.role.clone(),
                domain.to_string(),
                policy.object.clone(),
                policy.action.clone(),
            ])
            .await?;
    }

    for grouping in groupings {
        enforcer
            .add_grouping_policy(vec![
                grouping.subject.clone(),
                grouping.role.clone(),
                domain.to_string(),
            ])
            .await?;
    }

    enforcer.build_role_links()?;
    Ok(enforcer)
}

/// Decide whether `subject` may perform `verb` on `kind` inside `domain`.
pub async fn is_allowed(
    policies: &[PolicyRule],
    groupings: &[GroupingRule],
    domain: &str,
    subject: &str,
    kind: ResourceKind,
    verb: Verb,
) -> Result<bool> {
    if groupings.is_empty() {
        return Ok(false);
    }
    let domain = if domain.is_empty() {
        CLUSTER_DOMAIN
    } else {
        domain
    };
    let enforcer = build_enforcer(policies, groupings, domain).await?;
    enforcer.enforce((subject, domain, kind.as_str(), verb.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouping(subject: &str, role: &str) -> GroupingRule {
        GroupingRule {
            subject: subject.to_string(),
            role: role.to_string(),
        }
    }

    #[tokio::test]
    async fn space_developer_can_write_routes_but_not_bindings() {
        let policies = standard_policies(&RoleTable::defaults());
        let groupings = vec![grouping("User:alice", "stratus-space-developer")];

        assert!(
            is_allowed(&policies, &groupings, "space-a", "User:alice", ResourceKind::Route, Verb::Create)
                .await
                .expect("enforce")
        );
        assert!(
            !is_allowed(
                &policies,
                &groupings,
                "space-a",
                "User:alice",
                ResourceKind::RoleBinding,
                Verb::Create
            )
            .await
            .expect("enforce")
        );
    }

    #[tokio::test]
    async fn cluster_admin_role_allows_everything() {
        let policies = standard_policies(&RoleTable::defaults());
        let groupings = vec![grouping("ServiceAccount:system:serviceaccount:cf:api", CLUSTER_ADMIN_ROLE)];
        assert!(
            is_allowed(
                &policies,
                &groupings,
                "",
                "ServiceAccount:system:serviceaccount:cf:api",
                ResourceKind::Scope,
                Verb::List
            )
            .await
            .expect("enforce")
        );
    }

    #[tokio::test]
    async fn no_groupings_means_denied() {
        let policies = standard_policies(&RoleTable::defaults());
        assert!(
            !is_allowed(&policies, &[], "space-a", "User:bob", ResourceKind::Route, Verb::List)
                .await
                .expect("enforce")
        );
    }

    #[test]
    fn policies_skip_unknown_roles() {
        let policies = standard_policies(&RoleTable::new());
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].role, CLUSTER_ADMIN_ROLE);
    }
}
