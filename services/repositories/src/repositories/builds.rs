//! Build repository.
//!
//! # Build state
//! The state is derived from two reconciler conditions:
//! - `Staging` false and `Succeeded` true: `STAGED`, the droplet shares the
//!   build's GUID.
//! - `Staging` false and `Succeeded` false: `FAILED`, with the error taken
//!   from the `Succeeded` reason and message.
//! - anything else: `STAGING`.
use super::awaiter::{AwaitOutcome, ConditionAwaiter};
use super::locator::GlobalLocator;
use super::sorter::{SortOrder, Sorter};
use super::{BUILD_RESOURCE, unexpected_spec};
use crate::client::{AuthInfo, ClientFactory};
use crate::errors::{RepoError, RepoResult, StoreResultExt, format_reason};
use crate::model::{
    APP_GUID_LABEL, BuildSpec, CONDITION_STAGING, CONDITION_SUCCEEDED, Condition,
    ConditionStatus, Object, ObjectKey, ObjectMeta, ResourceKind, Spec, find_condition,
    is_condition_false,
};
use crate::store::{ListOptions, ObjectClient};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Staging,
    Staged,
    Failed,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Staging => "STAGING",
            BuildState::Staged => "STAGED",
            BuildState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateBuildMessage {
    pub app_guid: String,
    pub package_guid: String,
    pub space_guid: String,
    pub staging_memory_mb: u32,
    pub staging_disk_mb: u32,
    pub lifecycle_type: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub guid: String,
    pub state: BuildState,
    pub app_guid: String,
    pub package_guid: String,
    pub space_guid: String,
    pub droplet_guid: Option<String>,
    pub staging_error: Option<String>,
    pub staging_memory_mb: u32,
    pub staging_disk_mb: u32,
    pub lifecycle_type: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BuildRecord {
    fn from_object(object: &Object) -> RepoResult<Self> {
        let Spec::Build(spec) = &object.spec else {
            return Err(unexpected_spec(BUILD_RESOURCE, object));
        };
        let state = build_state(&object.status.conditions);
        Ok(Self {
            guid: object.meta.name.clone(),
            state,
            app_guid: spec.app_guid.clone(),
            package_guid: spec.package_guid.clone(),
            space_guid: object.meta.scope.clone(),
            droplet_guid: (state == BuildState::Staged).then(|| object.meta.name.clone()),
            staging_error: failure(&object.status.conditions)
                .map(|condition| format_reason(&condition.reason, &condition.message)),
            staging_memory_mb: spec.staging_memory_mb,
            staging_disk_mb: spec.staging_disk_mb,
            lifecycle_type: spec.lifecycle_type.clone(),
            labels: object.meta.labels.clone(),
            annotations: object.meta.annotations.clone(),
            created_at: object.meta.created_at.unwrap_or_default(),
            updated_at: object.meta.updated_at,
        })
    }
}

fn build_state(conditions: &[Condition]) -> BuildState {
    if !is_condition_false(conditions, CONDITION_STAGING) {
        return BuildState::Staging;
    }
    match find_condition(conditions, CONDITION_SUCCEEDED).map(|condition| condition.status) {
        Some(ConditionStatus::True) => BuildState::Staged,
        Some(ConditionStatus::False) => BuildState::Failed,
        _ => BuildState::Staging,
    }
}

/// The `Succeeded` condition of a failed build.
fn failure(conditions: &[Condition]) -> Option<&Condition> {
    match build_state(conditions) {
        BuildState::Failed => find_condition(conditions, CONDITION_SUCCEEDED),
        _ => None,
    }
}

fn staged_or_failed(object: &Object) -> AwaitOutcome {
    let conditions = &object.status.conditions;
    match build_state(conditions) {
        BuildState::Staging => AwaitOutcome::Pending,
        BuildState::Staged => AwaitOutcome::Satisfied,
        BuildState::Failed => {
            let (reason, message) = failure(conditions)
                .map(|condition| (condition.reason.clone(), condition.message.clone()))
                .unwrap_or_default();
            AwaitOutcome::Failed { reason, message }
        }
    }
}

pub struct BuildRepo {
    clients: ClientFactory,
    locator: GlobalLocator,
    awaiter: ConditionAwaiter,
    sorter: Arc<dyn Sorter<Object>>,
}

impl BuildRepo {
    pub fn new(
        clients: ClientFactory,
        locator: GlobalLocator,
        awaiter: ConditionAwaiter,
        sorter: Arc<dyn Sorter<Object>>,
    ) -> Self {
        Self {
            clients,
            locator,
            awaiter,
            sorter,
        }
    }

    pub async fn create_build(
        &self,
        auth: &AuthInfo,
        message: CreateBuildMessage,
    ) -> RepoResult<BuildRecord> {
        let client = self.clients.build_client(auth).await?;
        let guid = Uuid::new_v4().to_string();
        let mut meta = ObjectMeta::new(&message.space_guid, &guid);
        meta.labels = message.labels;
        meta.annotations = message.annotations;
        meta.labels
            .insert(APP_GUID_LABEL.to_string(), message.app_guid.clone());
        let created = client
            .create(Object::new(
                meta,
                Spec::Build(BuildSpec {
                    app_guid: message.app_guid,
                    package_guid: message.package_guid,
                    staging_memory_mb: message.staging_memory_mb,
                    staging_disk_mb: message.staging_disk_mb,
                    lifecycle_type: message.lifecycle_type,
                }),
            ))
            .await
            .for_resource(BUILD_RESOURCE, "failed to create build")?;
        tracing::info!(guid = %guid, space = %message.space_guid, "created build");
        BuildRecord::from_object(&created)
    }

    pub async fn get_build(&self, auth: &AuthInfo, guid: &str) -> RepoResult<BuildRecord> {
        let client = self.clients.build_client(auth).await?;
        let build = self.fetch(client.as_ref(), guid).await?;
        BuildRecord::from_object(&build)
    }

    /// Most recently created build of `app_guid` in `space_guid`.
    pub async fn get_latest_build_by_app(
        &self,
        auth: &AuthInfo,
        space_guid: &str,
        app_guid: &str,
    ) -> RepoResult<BuildRecord> {
        let client = self.clients.build_client(auth).await?;
        let mut builds = client
            .list(
                ResourceKind::Build,
                &ListOptions::in_scope(space_guid).with_label_in(APP_GUID_LABEL, [app_guid]),
            )
            .await
            .for_resource(BUILD_RESOURCE, "failed to list builds")?;
        if builds.is_empty() {
            return Err(RepoError::not_found(
                BUILD_RESOURCE,
                format!("builds for app {app_guid:?} in space {space_guid:?} not found"),
            ));
        }
        self.sorter.sort(&mut builds, SortOrder::newest_first());
        BuildRecord::from_object(&builds[0])
    }

    /// Wait until the build is staged.
    ///
    /// # Errors
    /// - [`RepoError::NotReady`] carrying `"<reason>: <message>"` when staging
    ///   fails.
    /// - [`RepoError::Timeout`] when staging outlasts the awaiter deadline.
    pub async fn await_build_staged(&self, auth: &AuthInfo, guid: &str) -> RepoResult<BuildRecord> {
        let client = self.clients.build_client(auth).await?;
        let build = self.fetch(client.as_ref(), guid).await?;
        let staged = self
            .awaiter
            .await_predicate(client.as_ref(), &build, staged_or_failed)
            .await
            .map_err(|err| err.into_repo_error(BUILD_RESOURCE))?;
        BuildRecord::from_object(&staged)
    }

    async fn fetch(&self, client: &dyn ObjectClient, guid: &str) -> RepoResult<Object> {
        let scope = self
            .locator
            .locate_scope(ResourceKind::Build, guid, BUILD_RESOURCE)
            .await?;
        client
            .get(&ObjectKey::new(ResourceKind::Build, scope, guid))
            .await
            .for_resource(BUILD_RESOURCE, "failed to get build")
            .map_err(|err| err.hide_forbidden())
    }
}
