//! Namespace permission index.
//!
//! # Purpose
//! Computes, per call, the scopes in which an identity holds a recognized
//! role, by reading role bindings and scope descriptors through the
//! privileged client.
//!
//! # Key invariants
//! - Nothing is cached; every call reads current bindings.
//! - A propagating binding in an org scope also grants the org's spaces, and a
//!   propagating root binding grants every scope of the requested level. This
//!   mirrors how the backend evaluates access.
//! - Zero bindings is an empty set, not an error.
use crate::errors::{RepoResult, StoreResultExt};
use crate::model::{
    Object, PROPAGATE_NONE_ANNOTATION, ResourceKind, RoleBindingSpec, ScopeSpec, Spec,
};
use crate::store::{ListOptions, ObjectClient};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use stratus_authz::{Identity, RoleLevel, RoleTable};

const ROLE_BINDING_RESOURCE: &str = "Role";

/// Checks whether an identity holds any recognized role in a scope.
#[async_trait]
pub trait AuthorizedIn: Send + Sync {
    async fn authorized_in(&self, identity: &Identity, scope: &str) -> RepoResult<bool>;
}

pub struct PermissionIndex {
    privileged: Arc<dyn ObjectClient>,
    roles: RoleTable,
}

struct ScopeTree {
    scopes: HashMap<String, ScopeSpec>,
}

impl ScopeTree {
    fn level_of(&self, scope: &str) -> Option<RoleLevel> {
        self.scopes.get(scope).map(|spec| spec.level)
    }

    /// `scope` plus every scope below it, restricted to `level`.
    fn reachable(&self, scope: &str, level: RoleLevel) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![scope.to_string()];
        while let Some(current) = frontier.pop() {
            if !found.insert(current.clone()) {
                continue;
            }
            for (name, spec) in &self.scopes {
                if spec.parent.as_deref() == Some(current.as_str()) {
                    frontier.push(name.clone());
                }
            }
        }
        found
            .into_iter()
            .filter(|name| self.level_of(name) == Some(level))
            .collect()
    }
}

impl PermissionIndex {
    pub fn new(privileged: Arc<dyn ObjectClient>, roles: RoleTable) -> Self {
        Self { privileged, roles }
    }

    /// Scopes of `level` in which `identity` holds a recognized role.
    pub async fn authorized_scopes(
        &self,
        identity: &Identity,
        level: RoleLevel,
    ) -> RepoResult<BTreeSet<String>> {
        let bindings = self.bindings_for(identity).await?;
        if bindings.is_empty() {
            return Ok(BTreeSet::new());
        }
        let tree = self.scope_tree().await?;

        let mut scopes = BTreeSet::new();
        for binding in &bindings {
            let scope = binding.meta.scope.as_str();
            let Some(binding_level) = tree.level_of(scope) else {
                continue;
            };
            if binding_level == level {
                scopes.insert(scope.to_string());
            }
            if propagates(binding) && binding_level != level {
                scopes.extend(tree.reachable(scope, level));
            }
        }
        tracing::debug!(
            identity = %identity,
            level = %level,
            count = scopes.len(),
            "computed authorized scopes"
        );
        Ok(scopes)
    }

    async fn bindings_for(&self, identity: &Identity) -> RepoResult<Vec<Object>> {
        let subject = identity.subject_name();
        let bindings = self
            .privileged
            .list(ResourceKind::RoleBinding, &ListOptions::cluster_wide())
            .await
            .for_resource(ROLE_BINDING_RESOURCE, "failed to list role bindings")?;
        Ok(bindings
            .into_iter()
            .filter(|object| match &object.spec {
                Spec::RoleBinding(RoleBindingSpec { role, subject: s }) => {
                    s.kind == identity.kind()
                        && s.name == subject
                        && self.roles.is_recognized_backend_role(role)
                }
                _ => false,
            })
            .collect())
    }

    async fn scope_tree(&self) -> RepoResult<ScopeTree> {
        let scopes = self
            .privileged
            .list(ResourceKind::Scope, &ListOptions::cluster_wide())
            .await
            .for_resource("Scope", "failed to list scopes")?;
        Ok(ScopeTree {
            scopes: scopes
                .into_iter()
                .filter_map(|object| match object.spec {
                    Spec::Scope(spec) => Some((object.meta.name, spec)),
                    _ => None,
                })
                .collect(),
        })
    }
}

fn propagates(binding: &Object) -> bool {
    binding.meta.annotation(PROPAGATE_NONE_ANNOTATION) != Some("true")
}

#[async_trait]
impl AuthorizedIn for PermissionIndex {
    async fn authorized_in(&self, identity: &Identity, scope: &str) -> RepoResult<bool> {
        let tree = self.scope_tree().await?;
        let Some(level) = tree.level_of(scope) else {
            return Ok(false);
        };
        Ok(self
            .authorized_scopes(identity, level)
            .await?
            .contains(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BindingSubject, ObjectMeta};
    use crate::store::Backend;
    use crate::store::memory::InMemoryBackend;
    use stratus_authz::SubjectKind;

    async fn setup() -> (Arc<dyn ObjectClient>, PermissionIndex) {
        let backend = InMemoryBackend::new(&RoleTable::defaults());
        let admin = Identity::service_account("cf", "api");
        backend.register_cluster_admin(admin.clone()).await;
        backend
            .create_scope("cf", RoleLevel::Root, None)
            .await
            .expect("root");
        for org in ["org-a", "org-b"] {
            backend
                .create_scope(org, RoleLevel::Org, Some("cf"))
                .await
                .expect("org");
        }
        backend
            .create_scope("space-a1", RoleLevel::Space, Some("org-a"))
            .await
            .expect("space");
        backend
            .create_scope("space-a2", RoleLevel::Space, Some("org-a"))
            .await
            .expect("space");
        backend
            .create_scope("space-b1", RoleLevel::Space, Some("org-b"))
            .await
            .expect("space");
        let privileged = backend.client_for(&admin);
        let index = PermissionIndex::new(privileged.clone(), RoleTable::defaults());
        (privileged, index)
    }

    async fn bind(
        client: &Arc<dyn ObjectClient>,
        scope: &str,
        name: &str,
        kind: SubjectKind,
        subject: &str,
        role: &str,
        propagate: bool,
    ) {
        let mut meta = ObjectMeta::new(scope, name);
        if !propagate {
            meta = meta.with_annotation(PROPAGATE_NONE_ANNOTATION, "true");
        }
        client
            .create(Object::new(
                meta,
                Spec::RoleBinding(RoleBindingSpec {
                    role: role.to_string(),
                    subject: BindingSubject {
                        kind,
                        name: subject.to_string(),
                    },
                }),
            ))
            .await
            .expect("binding");
    }

    #[tokio::test]
    async fn no_bindings_is_empty_set() {
        let (_privileged, index) = setup().await;
        let scopes = index
            .authorized_scopes(&Identity::user("nobody"), RoleLevel::Org)
            .await
            .expect("scopes");
        assert!(scopes.is_empty());
    }

    #[tokio::test]
    async fn org_and_space_levels_are_partitioned() {
        let (privileged, index) = setup().await;
        let user = SubjectKind::User;
        bind(&privileged, "org-a", "b1", user, "alice", "stratus-organization-user", false).await;
        bind(&privileged, "space-b1", "b2", user, "alice", "stratus-space-developer", false).await;
        bind(&privileged, "space-a1", "b3", user, "bob", "stratus-space-developer", false).await;

        let alice = Identity::user("alice");
        let orgs = index
            .authorized_scopes(&alice, RoleLevel::Org)
            .await
            .expect("orgs");
        let spaces = index
            .authorized_scopes(&alice, RoleLevel::Space)
            .await
            .expect("spaces");
        assert_eq!(orgs, BTreeSet::from(["org-a".to_string()]));
        assert_eq!(spaces, BTreeSet::from(["space-b1".to_string()]));
    }

    #[tokio::test]
    async fn propagating_org_role_includes_child_spaces() {
        let (privileged, index) = setup().await;
        bind(
            &privileged,
            "org-a",
            "b1",
            SubjectKind::User,
            "olivia",
            "stratus-organization-manager",
            true,
        )
        .await;
        let spaces = index
            .authorized_scopes(&Identity::user("olivia"), RoleLevel::Space)
            .await
            .expect("spaces");
        assert_eq!(
            spaces,
            BTreeSet::from(["space-a1".to_string(), "space-a2".to_string()])
        );
    }

    #[tokio::test]
    async fn service_accounts_match_by_composite_name() {
        let (privileged, index) = setup().await;
        bind(
            &privileged,
            "space-a1",
            "b1",
            SubjectKind::ServiceAccount,
            "system:serviceaccount:space-a1:deployer",
            "stratus-space-developer",
            false,
        )
        .await;

        let same = Identity::service_account("space-a1", "deployer");
        let other_home = Identity::service_account("space-b1", "deployer");
        assert_eq!(
            index
                .authorized_scopes(&same, RoleLevel::Space)
                .await
                .expect("spaces")
                .len(),
            1
        );
        assert!(
            index
                .authorized_scopes(&other_home, RoleLevel::Space)
                .await
                .expect("spaces")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unrecognized_backend_roles_are_ignored() {
        let (privileged, index) = setup().await;
        bind(&privileged, "org-a", "b1", SubjectKind::User, "eve", "edit", false).await;
        assert!(
            !index
                .authorized_in(&Identity::user("eve"), "org-a")
                .await
                .expect("check")
        );
    }

    #[tokio::test]
    async fn authorized_in_reflects_current_bindings() {
        let (privileged, index) = setup().await;
        let alice = Identity::user("alice");
        assert!(!index.authorized_in(&alice, "org-a").await.expect("before"));
        bind(&privileged, "org-a", "b1", SubjectKind::User, "alice", "stratus-organization-auditor", false).await;
        assert!(index.authorized_in(&alice, "org-a").await.expect("after"));
        assert!(!index.authorized_in(&alice, "org-b").await.expect("other org"));
        assert!(!index.authorized_in(&alice, "missing").await.expect("missing"));
    }
}
