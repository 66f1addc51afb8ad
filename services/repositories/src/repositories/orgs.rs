//! Organization repository.
//!
//! Orgs live in the root scope. Listing reads through the privileged client
//! and keeps only ready orgs whose scope the caller holds a role in; writes
//! always go through the caller's own client.
use super::awaiter::ConditionAwaiter;
use super::predicates::PredicateChain;
use super::{ORG_RESOURCE, unexpected_spec};
use crate::authorization::PermissionIndex;
use crate::client::{AuthInfo, ClientFactory};
use crate::errors::{RepoError, RepoResult, StoreResultExt};
use crate::model::{
    CONDITION_READY, MetadataPatch, Object, ObjectKey, ObjectMeta, OrgSpec, ResourceKind, Spec,
    is_condition_true,
};
use crate::store::{ListOptions, ObjectPatch};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratus_authz::RoleLevel;
use uuid::Uuid;

pub const ORG_PREFIX: &str = "cf-org-";

#[derive(Debug, Clone, Default)]
pub struct CreateOrgMessage {
    pub name: String,
    pub suspended: bool,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOrgsMessage {
    pub names: Vec<String>,
    pub guids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgRecord {
    pub guid: String,
    pub name: String,
    pub suspended: bool,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl OrgRecord {
    fn from_object(object: &Object) -> RepoResult<Self> {
        let Spec::Org(spec) = &object.spec else {
            return Err(unexpected_spec(ORG_RESOURCE, object));
        };
        Ok(Self {
            guid: object.meta.name.clone(),
            name: spec.display_name.clone(),
            suspended: spec.suspended,
            labels: object.meta.labels.clone(),
            annotations: object.meta.annotations.clone(),
            created_at: object.meta.created_at.unwrap_or_default(),
            updated_at: object.meta.updated_at,
            deleted_at: object.meta.deleted_at,
        })
    }
}

pub struct OrgRepo {
    clients: ClientFactory,
    permissions: Arc<PermissionIndex>,
    awaiter: ConditionAwaiter,
    root_namespace: String,
}

impl OrgRepo {
    pub fn new(
        clients: ClientFactory,
        permissions: Arc<PermissionIndex>,
        awaiter: ConditionAwaiter,
        root_namespace: impl Into<String>,
    ) -> Self {
        Self {
            clients,
            permissions,
            awaiter,
            root_namespace: root_namespace.into(),
        }
    }

    /// Create an org and wait until the reconciler reports it ready.
    ///
    /// # Errors
    /// - [`RepoError::Forbidden`] when the caller may not create orgs.
    /// - [`RepoError::Timeout`] when the org is not ready in time; the org is
    ///   left in place.
    pub async fn create_org(
        &self,
        auth: &AuthInfo,
        message: CreateOrgMessage,
    ) -> RepoResult<OrgRecord> {
        let client = self.clients.build_client(auth).await?;
        let guid = format!("{ORG_PREFIX}{}", Uuid::new_v4());
        let mut meta = ObjectMeta::new(&self.root_namespace, &guid);
        meta.labels = message.labels;
        meta.annotations = message.annotations;
        let object = Object::new(
            meta,
            Spec::Org(OrgSpec {
                display_name: message.name,
                suspended: message.suspended,
            }),
        );

        let created = client
            .create(object)
            .await
            .for_resource(ORG_RESOURCE, "failed to create org")?;
        tracing::info!(guid = %guid, identity = %client.identity(), "created org");

        let ready = self
            .awaiter
            .await_condition(client.as_ref(), &created, CONDITION_READY)
            .await
            .map_err(|err| err.into_repo_error(ORG_RESOURCE))?;
        OrgRecord::from_object(&ready)
    }

    pub async fn list_orgs(
        &self,
        auth: &AuthInfo,
        message: ListOrgsMessage,
    ) -> RepoResult<Vec<OrgRecord>> {
        let identity = self.clients.authenticate(auth).await?;
        let authorized = self
            .permissions
            .authorized_scopes(&identity, RoleLevel::Org)
            .await?;
        let orgs = self
            .clients
            .privileged()
            .list(
                ResourceKind::Org,
                &ListOptions::in_scope(&self.root_namespace),
            )
            .await
            .for_resource(ORG_RESOURCE, "failed to list orgs")?;

        let filters = PredicateChain::<Object>::new()
            .matching(move |org| authorized.contains(org.name()))
            .matching(|org| is_condition_true(&org.status.conditions, CONDITION_READY))
            .field_in(message.guids, |org| Some(org.name()))
            .field_in(message.names, |org| match &org.spec {
                Spec::Org(spec) => Some(spec.display_name.as_str()),
                _ => None,
            });
        filters
            .apply(orgs)
            .iter()
            .map(OrgRecord::from_object)
            .collect()
    }

    pub async fn get_org(&self, auth: &AuthInfo, guid: &str) -> RepoResult<OrgRecord> {
        let mut orgs = self
            .list_orgs(
                auth,
                ListOrgsMessage {
                    guids: vec![guid.to_string()],
                    ..ListOrgsMessage::default()
                },
            )
            .await?;
        if orgs.is_empty() {
            return Err(RepoError::not_found(
                ORG_RESOURCE,
                format!("org {guid} not found or not authorized"),
            ));
        }
        Ok(orgs.remove(0))
    }

    pub async fn delete_org(&self, auth: &AuthInfo, guid: &str) -> RepoResult<()> {
        let client = self.clients.build_client(auth).await?;
        client
            .delete(&self.key(guid))
            .await
            .for_resource(ORG_RESOURCE, "failed to delete org")?;
        tracing::info!(guid, identity = %client.identity(), "deleted org");
        Ok(())
    }

    pub async fn patch_org_metadata(
        &self,
        auth: &AuthInfo,
        guid: &str,
        metadata: MetadataPatch,
    ) -> RepoResult<OrgRecord> {
        let client = self.clients.build_client(auth).await?;
        let patched = client
            .patch(&self.key(guid), ObjectPatch::metadata(metadata))
            .await
            .for_resource(ORG_RESOURCE, "failed to patch org metadata")?;
        OrgRecord::from_object(&patched)
    }

    fn key(&self, guid: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::Org, &self.root_namespace, guid)
    }
}
