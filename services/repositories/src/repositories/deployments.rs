//! Deployment repository.
//!
//! A deployment is a projection of an app: creating one bumps the app's
//! revision annotation, points it at a droplet and marks it started. The
//! deployment status is read from the app's deployment-status label.
use super::lister::AggregatingLister;
use super::locator::GlobalLocator;
use super::predicates::PredicateChain;
use super::sorter::{SortOrder, Sorter};
use super::{DEPLOYMENT_RESOURCE, unexpected_spec};
use crate::authorization::PermissionIndex;
use crate::client::{AuthInfo, ClientFactory};
use crate::errors::{RepoResult, StoreResultExt, ValidationError};
use crate::model::{
    APP_REV_ANNOTATION, AppSpec, DEPLOYMENT_STATUS_LABEL, DesiredState, MetadataPatch, Object,
    ObjectKey, ResourceKind, Spec,
};
use crate::store::{ListOptions, ObjectClient, ObjectPatch};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use stratus_authz::RoleLevel;

const FINALIZED_LABEL_VALUE: &str = "FINALIZED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatusValue {
    Active,
    Finalized,
}

impl DeploymentStatusValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatusValue::Active => "ACTIVE",
            DeploymentStatusValue::Finalized => "FINALIZED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatusReason {
    Deploying,
    Deployed,
}

impl DeploymentStatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatusReason::Deploying => "DEPLOYING",
            DeploymentStatusReason::Deployed => "DEPLOYED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub value: DeploymentStatusValue,
    pub reason: DeploymentStatusReason,
}

impl DeploymentStatus {
    fn of(object: &Object) -> Self {
        if object.meta.label(DEPLOYMENT_STATUS_LABEL) == Some(FINALIZED_LABEL_VALUE) {
            return Self {
                value: DeploymentStatusValue::Finalized,
                reason: DeploymentStatusReason::Deployed,
            };
        }
        Self {
            value: DeploymentStatusValue::Active,
            reason: DeploymentStatusReason::Deploying,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateDeploymentMessage {
    pub app_guid: String,
    /// Droplet to deploy; the app's current droplet when `None`.
    pub droplet_guid: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListDeploymentsMessage {
    pub app_guids: Vec<String>,
    pub status_values: Vec<DeploymentStatusValue>,
    /// `created_at` or `updated_at`, `-` prefixed for descending order.
    pub order_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub guid: String,
    pub droplet_guid: Option<String>,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    fn from_object(object: &Object) -> RepoResult<Self> {
        let spec = app_spec(object)?;
        Ok(Self {
            guid: object.meta.name.clone(),
            droplet_guid: spec.current_droplet.clone(),
            status: DeploymentStatus::of(object),
            created_at: object.meta.created_at.unwrap_or_default(),
            updated_at: object.meta.updated_at,
        })
    }
}

fn app_spec(object: &Object) -> RepoResult<&AppSpec> {
    match &object.spec {
        Spec::App(spec) => Ok(spec),
        _ => Err(unexpected_spec(DEPLOYMENT_RESOURCE, object)),
    }
}

/// Next app revision. An app without a revision is at revision zero.
fn bump_app_rev(current: Option<&str>) -> Result<String, ValidationError> {
    let Some(current) = current else {
        return Ok("1".to_string());
    };
    let revision: i64 = current
        .parse()
        .map_err(|_| ValidationError::InvalidAppRevision(current.to_string()))?;
    Ok((revision + 1).to_string())
}

pub struct DeploymentRepo {
    clients: ClientFactory,
    permissions: Arc<PermissionIndex>,
    lister: AggregatingLister,
    locator: GlobalLocator,
    sorter: Arc<dyn Sorter<Object>>,
}

impl DeploymentRepo {
    pub fn new(
        clients: ClientFactory,
        permissions: Arc<PermissionIndex>,
        lister: AggregatingLister,
        locator: GlobalLocator,
        sorter: Arc<dyn Sorter<Object>>,
    ) -> Self {
        Self {
            clients,
            permissions,
            lister,
            locator,
            sorter,
        }
    }

    pub async fn create_deployment(
        &self,
        auth: &AuthInfo,
        message: CreateDeploymentMessage,
    ) -> RepoResult<DeploymentRecord> {
        let client = self.clients.build_client(auth).await?;
        let app = self.fetch(client.as_ref(), &message.app_guid).await?;
        let mut spec = app_spec(&app)?.clone();

        let revision = bump_app_rev(app.meta.annotation(APP_REV_ANNOTATION))?;
        if let Some(droplet) = message.droplet_guid.filter(|guid| !guid.is_empty()) {
            spec.current_droplet = Some(droplet);
        }
        spec.desired_state = DesiredState::Started;

        let mut metadata = MetadataPatch::default();
        metadata
            .annotations
            .insert(APP_REV_ANNOTATION.to_string(), Some(revision.clone()));
        let patched = client
            .patch(
                &app.key(),
                ObjectPatch {
                    metadata,
                    spec: Some(Spec::App(spec)),
                },
            )
            .await
            .for_resource(DEPLOYMENT_RESOURCE, "failed to patch app for deployment")?;
        tracing::info!(
            app = %message.app_guid,
            revision = %revision,
            identity = %client.identity(),
            "created deployment"
        );
        DeploymentRecord::from_object(&patched)
    }

    pub async fn get_deployment(&self, auth: &AuthInfo, guid: &str) -> RepoResult<DeploymentRecord> {
        let client = self.clients.build_client(auth).await?;
        let app = self.fetch(client.as_ref(), guid).await?;
        DeploymentRecord::from_object(&app)
    }

    /// List deployments of every app the caller can see.
    ///
    /// # Errors
    /// [`ValidationError::UnsupportedOrdering`] for an unknown `order_by`,
    /// reported before anything is listed.
    pub async fn list_deployments(
        &self,
        auth: &AuthInfo,
        message: ListDeploymentsMessage,
    ) -> RepoResult<Vec<DeploymentRecord>> {
        let order = SortOrder::parse(&message.order_by)?;
        let client = self.clients.build_client(auth).await?;
        let scopes = self
            .permissions
            .authorized_scopes(client.identity(), RoleLevel::Space)
            .await?;

        let statuses = message.status_values;
        let filters = PredicateChain::<Object>::new()
            .field_in(message.app_guids, |app| Some(app.name()))
            .matching(move |app| {
                statuses.is_empty() || statuses.contains(&DeploymentStatus::of(app).value)
            });
        let mut apps = self
            .lister
            .list_across(
                client.as_ref(),
                ResourceKind::App,
                scopes,
                &ListOptions::default(),
                &filters,
                DEPLOYMENT_RESOURCE,
            )
            .await?;
        match order {
            Some(order) => self.sorter.sort(&mut apps, order),
            None => apps.sort_by(|a, b| a.key().cmp(&b.key())),
        }
        apps.iter().map(DeploymentRecord::from_object).collect()
    }

    async fn fetch(&self, client: &dyn ObjectClient, guid: &str) -> RepoResult<Object> {
        let scope = self
            .locator
            .locate_scope(ResourceKind::App, guid, DEPLOYMENT_RESOURCE)
            .await?;
        client
            .get(&ObjectKey::new(ResourceKind::App, scope, guid))
            .await
            .for_resource(DEPLOYMENT_RESOURCE, "failed to get app")
            .map_err(|err| err.hide_forbidden())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectMeta;

    fn app(status_label: Option<&str>) -> Object {
        let mut meta = ObjectMeta::new("space-a", "app-1");
        if let Some(value) = status_label {
            meta = meta.with_label(DEPLOYMENT_STATUS_LABEL, value);
        }
        Object::new(
            meta,
            Spec::App(AppSpec {
                display_name: "dora".to_string(),
                desired_state: DesiredState::Stopped,
                current_droplet: None,
            }),
        )
    }

    #[test]
    fn app_rev_bumps_integers() {
        assert_eq!(bump_app_rev(None).expect("missing"), "1");
        assert_eq!(bump_app_rev(Some("0")).expect("zero"), "1");
        assert_eq!(bump_app_rev(Some("41")).expect("int"), "42");
    }

    #[test]
    fn non_integer_app_rev_is_rejected() {
        assert_eq!(
            bump_app_rev(Some("one")),
            Err(ValidationError::InvalidAppRevision("one".to_string()))
        );
    }

    #[test]
    fn finalized_label_means_deployed() {
        assert_eq!(
            DeploymentStatus::of(&app(Some("FINALIZED"))),
            DeploymentStatus {
                value: DeploymentStatusValue::Finalized,
                reason: DeploymentStatusReason::Deployed,
            }
        );
        for label in [None, Some("ACTIVE"), Some("weird")] {
            assert_eq!(
                DeploymentStatus::of(&app(label)).value,
                DeploymentStatusValue::Active
            );
        }
    }
}
