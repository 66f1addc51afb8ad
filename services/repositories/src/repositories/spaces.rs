//! Space repository.
//!
//! Spaces live in their org's scope. Listing fans out over the org scopes the
//! caller holds a role in and keeps ready spaces whose own scope the caller is
//! authorized in.
use super::awaiter::ConditionAwaiter;
use super::lister::AggregatingLister;
use super::locator::GlobalLocator;
use super::orgs::OrgRepo;
use super::predicates::PredicateChain;
use super::{SPACE_RESOURCE, unexpected_spec};
use crate::authorization::PermissionIndex;
use crate::client::{AuthInfo, ClientFactory};
use crate::errors::{RepoResult, StoreResultExt};
use crate::model::{
    CONDITION_READY, MetadataPatch, Object, ObjectKey, ObjectMeta, ResourceKind, Spec, SpaceSpec,
    is_condition_true,
};
use crate::store::{ListOptions, ObjectPatch};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stratus_authz::RoleLevel;
use uuid::Uuid;

pub const SPACE_PREFIX: &str = "cf-space-";

#[derive(Debug, Clone, Default)]
pub struct CreateSpaceMessage {
    pub name: String,
    pub organization_guid: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListSpacesMessage {
    pub names: Vec<String>,
    pub guids: Vec<String>,
    pub organization_guids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteSpaceMessage {
    pub guid: String,
    pub organization_guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceRecord {
    pub guid: String,
    pub name: String,
    pub organization_guid: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SpaceRecord {
    fn from_object(object: &Object) -> RepoResult<Self> {
        let Spec::Space(spec) = &object.spec else {
            return Err(unexpected_spec(SPACE_RESOURCE, object));
        };
        Ok(Self {
            guid: object.meta.name.clone(),
            name: spec.display_name.clone(),
            organization_guid: object.meta.scope.clone(),
            labels: object.meta.labels.clone(),
            annotations: object.meta.annotations.clone(),
            created_at: object.meta.created_at.unwrap_or_default(),
            updated_at: object.meta.updated_at,
            deleted_at: object.meta.deleted_at,
        })
    }
}

pub struct SpaceRepo {
    clients: ClientFactory,
    orgs: Arc<OrgRepo>,
    permissions: Arc<PermissionIndex>,
    lister: AggregatingLister,
    locator: GlobalLocator,
    awaiter: ConditionAwaiter,
}

impl SpaceRepo {
    pub fn new(
        clients: ClientFactory,
        orgs: Arc<OrgRepo>,
        permissions: Arc<PermissionIndex>,
        lister: AggregatingLister,
        locator: GlobalLocator,
        awaiter: ConditionAwaiter,
    ) -> Self {
        Self {
            clients,
            orgs,
            permissions,
            lister,
            locator,
            awaiter,
        }
    }

    /// Create a space in an org the caller can see, then wait for it to be
    /// ready.
    pub async fn create_space(
        &self,
        auth: &AuthInfo,
        message: CreateSpaceMessage,
    ) -> RepoResult<SpaceRecord> {
        self.orgs.get_org(auth, &message.organization_guid).await?;

        let client = self.clients.build_client(auth).await?;
        let guid = format!("{SPACE_PREFIX}{}", Uuid::new_v4());
        let mut meta = ObjectMeta::new(&message.organization_guid, &guid);
        meta.labels = message.labels;
        meta.annotations = message.annotations;
        let created = client
            .create(Object::new(
                meta,
                Spec::Space(SpaceSpec {
                    display_name: message.name,
                }),
            ))
            .await
            .for_resource(SPACE_RESOURCE, "failed to create space")?;
        tracing::info!(
            guid = %guid,
            org = %message.organization_guid,
            identity = %client.identity(),
            "created space"
        );

        let ready = self
            .awaiter
            .await_condition(client.as_ref(), &created, CONDITION_READY)
            .await
            .map_err(|err| err.into_repo_error(SPACE_RESOURCE))?;
        SpaceRecord::from_object(&ready)
    }

    pub async fn list_spaces(
        &self,
        auth: &AuthInfo,
        message: ListSpacesMessage,
    ) -> RepoResult<Vec<SpaceRecord>> {
        let client = self.clients.build_client(auth).await?;
        let identity = client.identity().clone();
        let org_scopes = self
            .permissions
            .authorized_scopes(&identity, RoleLevel::Org)
            .await?;
        let space_scopes = self
            .permissions
            .authorized_scopes(&identity, RoleLevel::Space)
            .await?;

        let wanted_orgs: BTreeSet<&str> = message
            .organization_guids
            .iter()
            .map(String::as_str)
            .collect();
        let scopes = org_scopes
            .into_iter()
            .filter(|org| wanted_orgs.is_empty() || wanted_orgs.contains(org.as_str()));

        let filters = PredicateChain::<Object>::new()
            .matching(move |space| space_scopes.contains(space.name()))
            .matching(|space| is_condition_true(&space.status.conditions, CONDITION_READY))
            .field_in(message.guids, |space| Some(space.name()))
            .field_in(message.names, |space| match &space.spec {
                Spec::Space(spec) => Some(spec.display_name.as_str()),
                _ => None,
            });

        let spaces = self
            .lister
            .list_across(
                client.as_ref(),
                ResourceKind::Space,
                scopes,
                &ListOptions::default(),
                &filters,
                SPACE_RESOURCE,
            )
            .await?;
        let mut records = spaces
            .iter()
            .map(SpaceRecord::from_object)
            .collect::<RepoResult<Vec<_>>>()?;
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.guid.cmp(&b.guid)));
        Ok(records)
    }

    pub async fn get_space(&self, auth: &AuthInfo, guid: &str) -> RepoResult<SpaceRecord> {
        let scope = self
            .locator
            .locate_scope(ResourceKind::Space, guid, SPACE_RESOURCE)
            .await?;
        let client = self.clients.build_client(auth).await?;
        let space = client
            .get(&ObjectKey::new(ResourceKind::Space, scope, guid))
            .await
            .for_resource(SPACE_RESOURCE, "failed to get space")
            .map_err(|err| err.hide_forbidden())?;
        SpaceRecord::from_object(&space)
    }

    pub async fn delete_space(&self, auth: &AuthInfo, message: DeleteSpaceMessage) -> RepoResult<()> {
        let client = self.clients.build_client(auth).await?;
        client
            .delete(&ObjectKey::new(
                ResourceKind::Space,
                &message.organization_guid,
                &message.guid,
            ))
            .await
            .for_resource(SPACE_RESOURCE, "failed to delete space")?;
        tracing::info!(guid = %message.guid, identity = %client.identity(), "deleted space");
        Ok(())
    }

    pub async fn patch_space_metadata(
        &self,
        auth: &AuthInfo,
        guid: &str,
        organization_guid: &str,
        metadata: MetadataPatch,
    ) -> RepoResult<SpaceRecord> {
        let client = self.clients.build_client(auth).await?;
        let patched = client
            .patch(
                &ObjectKey::new(ResourceKind::Space, organization_guid, guid),
                ObjectPatch::metadata(metadata),
            )
            .await
            .for_resource(SPACE_RESOURCE, "failed to patch space metadata")?;
        SpaceRecord::from_object(&patched)
    }
}
