//! In-memory implementation of the backend object store.
//!
//! # Purpose
//! Implements [`Backend`] and [`ObjectClient`] entirely in memory using
//! `HashMap`s guarded by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - exercising the repository protocols against a backend that enforces
//!   per-scope access control and publishes change events
//!
//! # Access control
//! Every client call is authorized for the client's identity before the
//! target is looked up. Decisions are made by a Casbin enforcer built from:
//! - backend role policies (what each role may do), and
//! - the `RoleBinding` objects stored in the target scope, plus bindings in
//!   ancestor scopes that are not annotated as non-propagating.
//!
//! Cluster administrators hold [`CLUSTER_ADMIN_ROLE`] in every domain,
//! including the cluster-level domain used by cluster-wide lists.
//!
//! # Change events
//! Mutations publish a [`WatchEvent`] on a `tokio::sync::broadcast` channel.
//! Subscribers that fall behind the channel capacity observe
//! [`StoreError::WatchLagged`]. [`InMemoryBackend::shutdown`] drops the sender,
//! which ends every open watch.
//!
//! # Reconciler-facing operations
//! `create_scope`, `delete_scope`, `update_status`, and `events` are not part of
//! [`ObjectClient`]; they stand in for the out-of-process reconciler.
//!
//! # Metrics
//! `stratus_backend_objects{kind}` tracks the number of stored objects.
use super::policy::{CLUSTER_ADMIN_ROLE, GroupingRule, PolicyRule, is_allowed, standard_policies};
use super::{
    Backend, ListOptions, ObjectClient, ObjectPatch, StoreError, StoreResult, Verb, Watch,
    WatchEvent, WatchEventType,
};
use crate::model::{
    CLUSTER_SCOPE, Condition, Object, ObjectKey, ObjectMeta, PROPAGATE_NONE_ANNOTATION,
    ResourceKind, ScopeSpec, Spec, set_condition,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use stratus_authz::{Identity, RoleLevel, RoleTable, SubjectKind};
use tokio::sync::{RwLock, broadcast};

pub const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// Casbin subject for a binding subject or identity.
fn subject_key(kind: SubjectKind, subject_name: &str) -> String {
    format!("{kind}:{subject_name}")
}

fn identity_key(identity: &Identity) -> String {
    subject_key(identity.kind(), &identity.subject_name())
}

/// In-memory backend shared by every client it hands out.
#[derive(Clone)]
pub struct InMemoryBackend {
    /// Backend role permissions, identical in every scope.
    policies: Arc<Vec<PolicyRule>>,
    /// Authoritative objects keyed by `(kind, scope, name)`.
    objects: Arc<RwLock<HashMap<ObjectKey, Object>>>,
    /// Bearer tokens accepted by `review_token`.
    tokens: Arc<RwLock<HashMap<String, Identity>>>,
    /// Identities holding the cluster administrator role.
    cluster_admins: Arc<RwLock<HashSet<Identity>>>,
    /// Change-event sender; `None` after shutdown.
    events: Arc<RwLock<Option<broadcast::Sender<WatchEvent>>>>,
    next_version: Arc<AtomicU64>,
}

impl InMemoryBackend {
    pub fn new(roles: &RoleTable) -> Self {
        Self::with_policies(standard_policies(roles), DEFAULT_WATCH_CAPACITY)
    }

    pub fn with_policies(policies: Vec<PolicyRule>, watch_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(watch_capacity.max(1));
        Self {
            policies: Arc::new(policies),
            objects: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            cluster_admins: Arc::new(RwLock::new(HashSet::new())),
            events: Arc::new(RwLock::new(Some(sender))),
            next_version: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn register_token(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.write().await.insert(token.into(), identity);
    }

    pub async fn register_cluster_admin(&self, identity: Identity) {
        self.cluster_admins.write().await.insert(identity);
    }

    /// Create a scope descriptor. `parent` must already exist.
    pub async fn create_scope(
        &self,
        name: &str,
        level: RoleLevel,
        parent: Option<&str>,
    ) -> StoreResult<Object> {
        let object = Object::new(
            ObjectMeta::new(CLUSTER_SCOPE, name),
            Spec::Scope(ScopeSpec {
                level,
                parent: parent.map(str::to_string),
            }),
        );
        let mut objects = self.objects.write().await;
        if let Some(parent) = parent {
            if !scope_exists(&objects, parent) {
                return Err(StoreError::NotFound(format!("scope {parent}")));
            }
        }
        let stored = self.insert_locked(&mut objects, object)?;
        drop(objects);
        self.emit(WatchEventType::Added, stored.clone()).await;
        Ok(stored)
    }

    /// Remove a scope, its descendant scopes, and every object stored in them.
    pub async fn delete_scope(&self, name: &str) -> StoreResult<()> {
        let removed = {
            let mut objects = self.objects.write().await;
            if !scope_exists(&objects, name) {
                return Err(StoreError::NotFound(format!("scope {name}")));
            }
            let doomed = descendant_scopes(&objects, name);
            let keys: Vec<ObjectKey> = objects
                .keys()
                .filter(|key| {
                    doomed.contains(&key.scope)
                        || (key.kind == ResourceKind::Scope && doomed.contains(&key.name))
                })
                .cloned()
                .collect();
            let removed: Vec<Object> = keys
                .iter()
                .filter_map(|key| objects.remove(key))
                .collect();
            record_object_gauges(&objects);
            removed
        };
        for mut object in removed {
            object.meta.deleted_at = Some(Utc::now());
            self.emit(WatchEventType::Deleted, object).await;
        }
        Ok(())
    }

    /// Merge `conditions` into the object's status and publish the change.
    pub async fn update_status(
        &self,
        key: &ObjectKey,
        conditions: Vec<Condition>,
    ) -> StoreResult<Object> {
        let updated = {
            let mut objects = self.objects.write().await;
            let object = objects
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            for condition in conditions {
                set_condition(&mut object.status.conditions, condition);
            }
            object.meta.resource_version = self.next_version.fetch_add(1, Ordering::SeqCst);
            object.clone()
        };
        self.emit(WatchEventType::Modified, updated.clone()).await;
        Ok(updated)
    }

    /// Subscribe to every change in the backend; `None` after shutdown.
    pub async fn events(&self) -> Option<broadcast::Receiver<WatchEvent>> {
        self.events.read().await.as_ref().map(|sender| sender.subscribe())
    }

    /// Close every open watch. Later mutations publish nothing.
    pub async fn shutdown(&self) {
        self.events.write().await.take();
    }

    async fn emit(&self, event_type: WatchEventType, object: Object) {
        if let Some(sender) = self.events.read().await.as_ref() {
            // No receivers is not an error for the writer.
            let _ = sender.send(WatchEvent { event_type, object });
        }
    }

    fn insert_locked(
        &self,
        objects: &mut HashMap<ObjectKey, Object>,
        mut object: Object,
    ) -> StoreResult<Object> {
        if object.meta.name.trim().is_empty() {
            return Err(StoreError::Invalid("object name must not be empty".into()));
        }
        let key = object.key();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        object.meta.created_at = Some(Utc::now());
        object.meta.updated_at = None;
        object.meta.deleted_at = None;
        object.meta.resource_version = self.next_version.fetch_add(1, Ordering::SeqCst);
        object.status = Default::default();
        objects.insert(key, object.clone());
        record_object_gauges(objects);
        Ok(object)
    }

    /// Authorize `identity` for `verb` on `kind` in `scope` (`None` = cluster-wide).
    async fn authorize(
        &self,
        identity: &Identity,
        verb: Verb,
        kind: ResourceKind,
        scope: Option<&str>,
    ) -> StoreResult<()> {
        let domain = scope.unwrap_or(CLUSTER_SCOPE);
        let mut groupings: Vec<GroupingRule> = self
            .cluster_admins
            .read()
            .await
            .iter()
            .map(|admin| GroupingRule {
                subject: identity_key(admin),
                role: CLUSTER_ADMIN_ROLE.to_string(),
            })
            .collect();
        if !domain.is_empty() {
            let objects = self.objects.read().await;
            groupings.extend(bindings_in_effect(&objects, domain));
        }

        let subject = identity_key(identity);
        let allowed = is_allowed(&self.policies, &groupings, domain, &subject, kind, verb)
            .await
            .map_err(|err| StoreError::Unexpected(anyhow::anyhow!("rbac evaluation: {err}")))?;
        if allowed {
            return Ok(());
        }
        tracing::debug!(
            subject = %subject,
            verb = verb.as_str(),
            kind = kind.as_str(),
            scope = domain,
            "backend request denied"
        );
        Err(StoreError::Forbidden(format!(
            "{subject} cannot {} {} in scope {:?}",
            verb.as_str(),
            kind.as_str(),
            domain
        )))
    }
}

fn scope_exists(objects: &HashMap<ObjectKey, Object>, name: &str) -> bool {
    objects.contains_key(&ObjectKey::new(ResourceKind::Scope, CLUSTER_SCOPE, name))
}

fn parent_scope(objects: &HashMap<ObjectKey, Object>, name: &str) -> Option<String> {
    match objects
        .get(&ObjectKey::new(ResourceKind::Scope, CLUSTER_SCOPE, name))
        .map(|object| &object.spec)
    {
        Some(Spec::Scope(spec)) => spec.parent.clone(),
        _ => None,
    }
}

fn descendant_scopes(objects: &HashMap<ObjectKey, Object>, root: &str) -> HashSet<String> {
    let mut found = HashSet::from([root.to_string()]);
    loop {
        let before = found.len();
        for object in objects.values() {
            if let Spec::Scope(ScopeSpec {
                parent: Some(parent),
                ..
            }) = &object.spec
            {
                if found.contains(parent) {
                    found.insert(object.meta.name.clone());
                }
            }
        }
        if found.len() == before {
            return found;
        }
    }
}

/// Role bindings that apply inside `scope`: its own bindings plus propagating
/// bindings of every ancestor.
fn bindings_in_effect(objects: &HashMap<ObjectKey, Object>, scope: &str) -> Vec<GroupingRule> {
    let mut rules = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(scope.to_string());
    let mut inherited = false;
    while let Some(name) = current {
        if !visited.insert(name.clone()) {
            break;
        }
        for object in objects.values() {
            if object.meta.scope != name {
                continue;
            }
            let Spec::RoleBinding(binding) = &object.spec else {
                continue;
            };
            if inherited && object.meta.annotation(PROPAGATE_NONE_ANNOTATION) == Some("true") {
                continue;
            }
            rules.push(GroupingRule {
                subject: subject_key(binding.subject.kind, &binding.subject.name),
                role: binding.role.clone(),
            });
        }
        current = parent_scope(objects, &name);
        inherited = true;
    }
    rules
}

fn record_object_gauges(objects: &HashMap<ObjectKey, Object>) {
    for kind in ResourceKind::all() {
        let count = objects.keys().filter(|key| key.kind == kind).count();
        metrics::gauge!("stratus_backend_objects", "kind" => kind.as_str()).set(count as f64);
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn review_token(&self, token: &str) -> StoreResult<Option<Identity>> {
        if token.trim().is_empty() {
            return Ok(None);
        }
        Ok(self.tokens.read().await.get(token).cloned())
    }

    fn client_for(&self, identity: &Identity) -> Arc<dyn ObjectClient> {
        Arc::new(MemoryClient {
            backend: self.clone(),
            identity: identity.clone(),
        })
    }
}

/// Client bound to one identity.
pub struct MemoryClient {
    backend: InMemoryBackend,
    identity: Identity,
}

#[async_trait]
impl ObjectClient for MemoryClient {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn get(&self, key: &ObjectKey) -> StoreResult<Object> {
        self.backend
            .authorize(&self.identity, Verb::Get, key.kind, Some(&key.scope))
            .await?;
        self.backend
            .objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, kind: ResourceKind, options: &ListOptions) -> StoreResult<Vec<Object>> {
        self.backend
            .authorize(&self.identity, Verb::List, kind, options.scope.as_deref())
            .await?;
        let objects = self.backend.objects.read().await;
        let mut items: Vec<Object> = objects
            .values()
            .filter(|object| object.kind() == kind && options.matches(object))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(items)
    }

    async fn create(&self, object: Object) -> StoreResult<Object> {
        let kind = object.kind();
        let scope = object.meta.scope.clone();
        self.backend
            .authorize(&self.identity, Verb::Create, kind, Some(&scope))
            .await?;
        let stored = {
            let mut objects = self.backend.objects.write().await;
            if !scope.is_empty() && !scope_exists(&objects, &scope) {
                return Err(StoreError::NotFound(format!("scope {scope}")));
            }
            self.backend.insert_locked(&mut objects, object)?
        };
        self.backend
            .emit(WatchEventType::Added, stored.clone())
            .await;
        Ok(stored)
    }

    async fn patch(&self, key: &ObjectKey, patch: ObjectPatch) -> StoreResult<Object> {
        self.backend
            .authorize(&self.identity, Verb::Patch, key.kind, Some(&key.scope))
            .await?;
        let updated = {
            let mut objects = self.backend.objects.write().await;
            let object = objects
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            if let Some(spec) = &patch.spec {
                if spec.kind() != key.kind {
                    return Err(StoreError::Invalid(format!(
                        "cannot replace {} spec with {} spec",
                        key.kind,
                        spec.kind()
                    )));
                }
            }
            patch.metadata.apply(&mut object.meta);
            if let Some(spec) = patch.spec {
                object.spec = spec;
            }
            object.meta.updated_at = Some(Utc::now());
            object.meta.resource_version = self.backend.next_version.fetch_add(1, Ordering::SeqCst);
            object.clone()
        };
        self.backend
            .emit(WatchEventType::Modified, updated.clone())
            .await;
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.backend
            .authorize(&self.identity, Verb::Delete, key.kind, Some(&key.scope))
            .await?;
        let mut removed = {
            let mut objects = self.backend.objects.write().await;
            let removed = objects
                .remove(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            record_object_gauges(&objects);
            removed
        };
        removed.meta.deleted_at = Some(Utc::now());
        self.backend.emit(WatchEventType::Deleted, removed).await;
        Ok(())
    }

    async fn watch(&self, key: &ObjectKey) -> StoreResult<Watch> {
        self.backend
            .authorize(&self.identity, Verb::Watch, key.kind, Some(&key.scope))
            .await?;
        // Subscribe before reading the current object so no change is missed.
        let receiver = self.backend.events().await.ok_or_else(|| {
            StoreError::Unexpected(anyhow::anyhow!("backend is shut down"))
        })?;
        let current = self.backend.objects.read().await.get(key).cloned();
        Ok(Watch::new(key.clone(), current, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BindingSubject, CONDITION_READY, ConditionStatus, RoleBindingSpec, RouteSpec, SpaceSpec,
    };

    const ADMIN: &str = "admin-token";

    fn route(scope: &str, name: &str) -> Object {
        Object::new(
            ObjectMeta::new(scope, name),
            Spec::Route(RouteSpec {
                host: name.to_string(),
                path: String::new(),
                protocol: "http".to_string(),
                domain_guid: "domain-1".to_string(),
                destinations: Vec::new(),
            }),
        )
    }

    fn binding(scope: &str, name: &str, user: &str, role: &str) -> Object {
        Object::new(
            ObjectMeta::new(scope, name),
            Spec::RoleBinding(RoleBindingSpec {
                role: role.to_string(),
                subject: BindingSubject {
                    kind: SubjectKind::User,
                    name: user.to_string(),
                },
            }),
        )
    }

    async fn backend_with_tree() -> (InMemoryBackend, Arc<dyn ObjectClient>) {
        let backend = InMemoryBackend::new(&RoleTable::defaults());
        let admin = Identity::service_account("cf", "api");
        backend.register_cluster_admin(admin.clone()).await;
        backend.register_token(ADMIN, admin.clone()).await;
        backend
            .create_scope("cf", RoleLevel::Root, None)
            .await
            .expect("root");
        backend
            .create_scope("org-a", RoleLevel::Org, Some("cf"))
            .await
            .expect("org");
        backend
            .create_scope("space-a", RoleLevel::Space, Some("org-a"))
            .await
            .expect("space");
        let privileged = backend.client_for(&admin);
        (backend, privileged)
    }

    #[tokio::test]
    async fn forbidden_is_reported_before_not_found() {
        let (backend, privileged) = backend_with_tree().await;
        privileged
            .create(route("space-a", "r1"))
            .await
            .expect("create");
        let stranger = backend.client_for(&Identity::user("mallory"));

        let existing = stranger
            .get(&ObjectKey::new(ResourceKind::Route, "space-a", "r1"))
            .await
            .expect_err("hidden");
        let missing = stranger
            .get(&ObjectKey::new(ResourceKind::Route, "space-a", "nope"))
            .await
            .expect_err("missing");
        let no_scope = stranger
            .get(&ObjectKey::new(ResourceKind::Route, "space-zzz", "r1"))
            .await
            .expect_err("no scope");
        assert!(matches!(existing, StoreError::Forbidden(_)));
        assert!(matches!(missing, StoreError::Forbidden(_)));
        assert!(matches!(no_scope, StoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn create_collision_reports_already_exists() {
        let (_backend, privileged) = backend_with_tree().await;
        privileged
            .create(route("space-a", "r1"))
            .await
            .expect("create");
        let err = privileged
            .create(route("space-a", "r1"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_in_missing_scope_is_not_found_for_admin() {
        let (_backend, privileged) = backend_with_tree().await;
        let err = privileged
            .create(route("space-missing", "r1"))
            .await
            .expect_err("missing scope");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn propagating_org_binding_applies_in_child_space() {
        let (backend, privileged) = backend_with_tree().await;
        privileged
            .create(binding("org-a", "b1", "olivia", "stratus-organization-manager"))
            .await
            .expect("binding");
        privileged
            .create(route("space-a", "r1"))
            .await
            .expect("route");

        let olivia = backend.client_for(&Identity::user("olivia"));
        let routes = olivia
            .list(ResourceKind::Route, &ListOptions::in_scope("space-a"))
            .await
            .expect("list");
        assert_eq!(routes.len(), 1);
    }

    #[tokio::test]
    async fn non_propagating_binding_stays_in_its_scope() {
        let (backend, privileged) = backend_with_tree().await;
        let mut object = binding("org-a", "b1", "olivia", "stratus-organization-manager");
        object.meta = object
            .meta
            .with_annotation(PROPAGATE_NONE_ANNOTATION, "true");
        privileged.create(object).await.expect("binding");

        let olivia = backend.client_for(&Identity::user("olivia"));
        olivia
            .list(ResourceKind::Space, &ListOptions::in_scope("org-a"))
            .await
            .expect("own scope");
        let err = olivia
            .list(ResourceKind::Route, &ListOptions::in_scope("space-a"))
            .await
            .expect_err("child scope");
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn cluster_wide_list_requires_cluster_admin() {
        let (backend, privileged) = backend_with_tree().await;
        privileged
            .create(binding("space-a", "b1", "dev", "stratus-space-developer"))
            .await
            .expect("binding");
        let dev = backend.client_for(&Identity::user("dev"));
        let err = dev
            .list(ResourceKind::Route, &ListOptions::cluster_wide())
            .await
            .expect_err("cluster-wide");
        assert!(matches!(err, StoreError::Forbidden(_)));

        let scopes = privileged
            .list(ResourceKind::Scope, &ListOptions::cluster_wide())
            .await
            .expect("scopes");
        assert_eq!(scopes.len(), 3);
    }

    #[tokio::test]
    async fn patch_rejects_spec_of_another_kind() {
        let (_backend, privileged) = backend_with_tree().await;
        let created = privileged
            .create(route("space-a", "r1"))
            .await
            .expect("route");
        let err = privileged
            .patch(
                &created.key(),
                ObjectPatch::spec(Spec::Space(SpaceSpec {
                    display_name: "x".to_string(),
                })),
            )
            .await
            .expect_err("kind mismatch");
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn watch_yields_current_state_then_status_updates() {
        let (backend, privileged) = backend_with_tree().await;
        let created = privileged
            .create(route("space-a", "r1"))
            .await
            .expect("route");
        let mut watch = privileged.watch(&created.key()).await.expect("watch");

        let first = watch.next().await.expect("initial").expect("ok");
        assert_eq!(first.object.meta.name, "r1");

        backend
            .update_status(
                &created.key(),
                vec![Condition::new(CONDITION_READY, ConditionStatus::True)],
            )
            .await
            .expect("status");
        let second = watch.next().await.expect("update").expect("ok");
        assert_eq!(second.event_type, WatchEventType::Modified);
        assert_eq!(second.object.status.conditions.len(), 1);

        backend.shutdown().await;
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn delete_scope_cascades_to_children() {
        let (backend, privileged) = backend_with_tree().await;
        privileged
            .create(route("space-a", "r1"))
            .await
            .expect("route");
        backend.delete_scope("org-a").await.expect("delete");

        let scopes = privileged
            .list(ResourceKind::Scope, &ListOptions::cluster_wide())
            .await
            .expect("scopes");
        assert_eq!(scopes.len(), 1);
        let routes = privileged
            .list(ResourceKind::Route, &ListOptions::cluster_wide())
            .await
            .expect("routes");
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn review_token_resolves_registered_identities_only() {
        let (backend, _privileged) = backend_with_tree().await;
        assert!(backend.review_token(ADMIN).await.expect("review").is_some());
        assert!(backend.review_token("bogus").await.expect("review").is_none());
        assert!(backend.review_token("").await.expect("review").is_none());
    }
}
