#![allow(dead_code)]

use async_trait::async_trait;
use repositories::client::AuthInfo;
use repositories::config::RepositoryConfig;
use repositories::model::{
    BindingSubject, CONDITION_READY, Condition, ConditionStatus, Object, ObjectKey, ObjectMeta,
    PROPAGATE_NONE_ANNOTATION, ROLE_GUID_LABEL, ResourceKind, RoleBindingSpec, Spec,
};
use repositories::repositories::{
    CreateOrgMessage, CreateSpaceMessage, OrgRecord, Repositories, SpaceRecord,
};
use repositories::store::memory::InMemoryBackend;
use repositories::store::{
    Backend, ListOptions, ObjectClient, ObjectPatch, StoreError, StoreResult, Watch,
    WatchEventType,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stratus_authz::{Identity, ROLE_ADMIN, RoleLevel, fingerprint_name};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const ROOT: &str = "cf";
pub const ADMIN_TOKEN: &str = "admin-token";
/// Objects carrying this annotation are ignored by the test reconciler.
pub const SKIP_RECONCILE: &str = "test.stratus.dev/skip-reconcile";

/// In-memory backend, wired repositories, and an optional reconciler task.
pub struct TestEnv {
    pub backend: InMemoryBackend,
    pub config: RepositoryConfig,
    pub repos: Repositories,
    reconciler: Option<JoinHandle<()>>,
}

impl TestEnv {
    /// Environment whose reconciler readies orgs and spaces as they appear.
    pub async fn new() -> Self {
        let mut env = Self::without_reconciler(Duration::from_secs(5)).await;
        env.reconciler = Some(spawn_reconciler(env.backend.clone()).await);
        env
    }

    /// Environment where nothing ever becomes ready on its own.
    pub async fn without_reconciler(await_timeout: Duration) -> Self {
        let config = RepositoryConfig {
            await_timeout,
            list_concurrency: 4,
            ..RepositoryConfig::default()
        };
        let backend = InMemoryBackend::new(&config.roles);
        backend
            .register_cluster_admin(config.privileged_identity.clone())
            .await;
        backend
            .create_scope(ROOT, RoleLevel::Root, None)
            .await
            .expect("root scope");
        backend
            .register_token(ADMIN_TOKEN, Identity::user("admin"))
            .await;
        let repos = Repositories::new(&config, Arc::new(backend.clone()));
        let env = Self {
            backend,
            config,
            repos,
            reconciler: None,
        };
        env.grant(ROOT, ROLE_ADMIN, &Identity::user("admin")).await;
        env
    }

    pub fn admin(&self) -> AuthInfo {
        AuthInfo::bearer(ADMIN_TOKEN)
    }

    /// Register a token for a user and return its credentials.
    pub async fn user(&self, name: &str) -> AuthInfo {
        let token = format!("{name}-token");
        self.backend
            .register_token(token.clone(), Identity::user(name))
            .await;
        AuthInfo::bearer(token)
    }

    /// Repositories wired over `backend` but sharing this environment's
    /// config and data.
    pub fn repos_over(&self, backend: InstrumentedBackend) -> Repositories {
        Repositories::new(&self.config, Arc::new(backend))
    }

    pub fn instrumented(&self) -> InstrumentedBackend {
        InstrumentedBackend::new(self.backend.clone())
    }

    pub fn privileged(&self) -> Arc<dyn ObjectClient> {
        self.backend.client_for(&self.config.privileged_identity)
    }

    /// Bind `role_type` to `subject` in `scope` the way a role grant would,
    /// bypassing the role repository. Returns the role GUID.
    pub async fn grant(&self, scope: &str, role_type: &str, subject: &Identity) -> String {
        self.grant_as(scope, role_type, subject, &Uuid::new_v4().to_string())
            .await
    }

    pub async fn grant_as(
        &self,
        scope: &str,
        role_type: &str,
        subject: &Identity,
        guid: &str,
    ) -> String {
        let config = self.config.roles.require(role_type).expect("known role");
        let mut meta = ObjectMeta::new(scope, fingerprint_name(role_type, subject))
            .with_label(ROLE_GUID_LABEL, guid);
        if !config.propagate {
            meta = meta.with_annotation(PROPAGATE_NONE_ANNOTATION, "true");
        }
        self.privileged()
            .create(Object::new(
                meta,
                Spec::RoleBinding(RoleBindingSpec {
                    role: config.backend_role.clone(),
                    subject: BindingSubject {
                        kind: subject.kind(),
                        name: subject.subject_name(),
                    },
                }),
            ))
            .await
            .expect("role binding");
        guid.to_string()
    }

    pub async fn org(&self, name: &str) -> OrgRecord {
        self.repos
            .orgs
            .create_org(
                &self.admin(),
                CreateOrgMessage {
                    name: name.to_string(),
                    ..CreateOrgMessage::default()
                },
            )
            .await
            .expect("create org")
    }

    pub async fn space(&self, org_guid: &str, name: &str) -> SpaceRecord {
        self.repos
            .spaces
            .create_space(
                &self.admin(),
                CreateSpaceMessage {
                    name: name.to_string(),
                    organization_guid: org_guid.to_string(),
                    ..CreateSpaceMessage::default()
                },
            )
            .await
            .expect("create space")
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        if let Some(task) = self.reconciler.take() {
            task.abort();
        }
    }
}

/// Backend wrapper that counts org listings and can refuse role bindings in
/// the root scope.
#[derive(Clone)]
pub struct InstrumentedBackend {
    inner: InMemoryBackend,
    org_lists: Arc<AtomicUsize>,
    reject_root_bindings: bool,
}

impl InstrumentedBackend {
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            org_lists: Arc::new(AtomicUsize::new(0)),
            reject_root_bindings: false,
        }
    }

    pub fn rejecting_root_bindings(mut self) -> Self {
        self.reject_root_bindings = true;
        self
    }

    pub fn org_lists(&self) -> usize {
        self.org_lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for InstrumentedBackend {
    async fn review_token(&self, token: &str) -> StoreResult<Option<Identity>> {
        self.inner.review_token(token).await
    }

    fn client_for(&self, identity: &Identity) -> Arc<dyn ObjectClient> {
        Arc::new(InstrumentedClient {
            inner: self.inner.client_for(identity),
            org_lists: self.org_lists.clone(),
            reject_root_bindings: self.reject_root_bindings,
        })
    }
}

struct InstrumentedClient {
    inner: Arc<dyn ObjectClient>,
    org_lists: Arc<AtomicUsize>,
    reject_root_bindings: bool,
}

#[async_trait]
impl ObjectClient for InstrumentedClient {
    fn identity(&self) -> &Identity {
        self.inner.identity()
    }

    async fn get(&self, key: &ObjectKey) -> StoreResult<Object> {
        self.inner.get(key).await
    }

    async fn list(&self, kind: ResourceKind, options: &ListOptions) -> StoreResult<Vec<Object>> {
        if kind == ResourceKind::Org {
            self.org_lists.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.list(kind, options).await
    }

    async fn create(&self, object: Object) -> StoreResult<Object> {
        if self.reject_root_bindings
            && object.kind() == ResourceKind::RoleBinding
            && object.scope() == ROOT
        {
            return Err(StoreError::Invalid("root scope is read-only".to_string()));
        }
        self.inner.create(object).await
    }

    async fn patch(&self, key: &ObjectKey, patch: ObjectPatch) -> StoreResult<Object> {
        self.inner.patch(key, patch).await
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn watch(&self, key: &ObjectKey) -> StoreResult<Watch> {
        self.inner.watch(key).await
    }
}

/// Stand-in for the external reconciler: gives every new org and space a
/// scope of its own and marks it ready.
async fn spawn_reconciler(backend: InMemoryBackend) -> JoinHandle<()> {
    let mut events = backend.events().await.expect("backend running");
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            };
            if event.event_type != WatchEventType::Added
                || event.object.meta.annotation(SKIP_RECONCILE).is_some()
            {
                continue;
            }
            let level = match event.object.kind() {
                ResourceKind::Org => RoleLevel::Org,
                ResourceKind::Space => RoleLevel::Space,
                _ => continue,
            };
            let object = event.object;
            if backend
                .create_scope(object.name(), level, Some(object.scope()))
                .await
                .is_err()
            {
                continue;
            }
            let _ = backend
                .update_status(
                    &object.key(),
                    vec![Condition::new(CONDITION_READY, ConditionStatus::True)],
                )
                .await;
        }
    })
}
