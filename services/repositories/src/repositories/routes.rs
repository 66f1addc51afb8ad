//! Route repository.
//!
//! Routes live in space scopes and carry a list of destinations. Listing fans
//! out over the caller's authorized space scopes; the app filter matches when
//! any destination targets one of the requested apps.
use super::lister::AggregatingLister;
use super::locator::GlobalLocator;
use super::predicates::PredicateChain;
use super::{ROUTE_RESOURCE, unexpected_spec};
use crate::authorization::PermissionIndex;
use crate::client::{AuthInfo, ClientFactory};
use crate::errors::{RepoResult, StoreResultExt, ValidationError};
use crate::model::{
    Destination, MetadataPatch, Object, ObjectKey, ObjectMeta, ResourceKind, RouteSpec, Spec,
};
use crate::store::{ListOptions, ObjectClient, ObjectPatch};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stratus_authz::RoleLevel;
use uuid::Uuid;

const DEFAULT_PROTOCOL: &str = "http";

#[derive(Debug, Clone, Default)]
pub struct CreateRouteMessage {
    pub host: String,
    pub path: String,
    pub space_guid: String,
    pub domain_guid: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListRoutesMessage {
    pub app_guids: Vec<String>,
    pub space_guids: Vec<String>,
    pub domain_guids: Vec<String>,
    pub hosts: Vec<String>,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRouteMessage {
    pub guid: String,
    pub space_guid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationMessage {
    pub app_guid: String,
    pub process_type: String,
    pub port: Option<u16>,
    pub protocol: Option<String>,
}

impl DestinationMessage {
    fn into_destination(self) -> Destination {
        Destination {
            guid: Uuid::new_v4().to_string(),
            app_guid: self.app_guid,
            process_type: self.process_type,
            port: self.port,
            protocol: self.protocol,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddDestinationsMessage {
    pub route_guid: String,
    pub space_guid: String,
    pub new_destinations: Vec<DestinationMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveDestinationMessage {
    pub route_guid: String,
    pub space_guid: String,
    pub destination_guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub guid: String,
    pub space_guid: String,
    pub domain_guid: String,
    pub host: String,
    pub path: String,
    pub protocol: String,
    pub destinations: Vec<Destination>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RouteRecord {
    fn from_object(object: &Object) -> RepoResult<Self> {
        let spec = route_spec(object)?;
        Ok(Self {
            guid: object.meta.name.clone(),
            space_guid: object.meta.scope.clone(),
            domain_guid: spec.domain_guid.clone(),
            host: spec.host.clone(),
            path: spec.path.clone(),
            protocol: spec.protocol.clone(),
            destinations: spec.destinations.clone(),
            labels: object.meta.labels.clone(),
            annotations: object.meta.annotations.clone(),
            created_at: object.meta.created_at.unwrap_or_default(),
            updated_at: object.meta.updated_at,
        })
    }
}

fn route_spec(object: &Object) -> RepoResult<&RouteSpec> {
    match &object.spec {
        Spec::Route(spec) => Ok(spec),
        _ => Err(unexpected_spec(ROUTE_RESOURCE, object)),
    }
}

fn route_filters(message: ListRoutesMessage) -> PredicateChain<Object> {
    fn spec(object: &Object) -> Option<&RouteSpec> {
        match &object.spec {
            Spec::Route(spec) => Some(spec),
            _ => None,
        }
    }

    PredicateChain::<Object>::new()
        .any_edge_in(message.app_guids, |route| {
            spec(route)
                .map(|spec| {
                    spec.destinations
                        .iter()
                        .map(|destination| destination.app_guid.as_str())
                        .collect()
                })
                .unwrap_or_default()
        })
        .field_in(message.space_guids, |route| Some(route.scope()))
        .field_in(message.domain_guids, |route| {
            spec(route).map(|spec| spec.domain_guid.as_str())
        })
        .field_in(message.hosts, |route| spec(route).map(|spec| spec.host.as_str()))
        .field_in(message.paths, |route| spec(route).map(|spec| spec.path.as_str()))
}

/// Merge new destinations into `existing`, skipping any whose target is
/// already present.
fn merge_destinations(
    existing: &[Destination],
    new_destinations: Vec<DestinationMessage>,
) -> Vec<Destination> {
    let mut merged = existing.to_vec();
    for message in new_destinations {
        let candidate = message.into_destination();
        if !merged.iter().any(|current| current.same_target(&candidate)) {
            merged.push(candidate);
        }
    }
    merged
}

pub struct RouteRepo {
    clients: ClientFactory,
    permissions: Arc<PermissionIndex>,
    lister: AggregatingLister,
    locator: GlobalLocator,
}

impl RouteRepo {
    pub fn new(
        clients: ClientFactory,
        permissions: Arc<PermissionIndex>,
        lister: AggregatingLister,
        locator: GlobalLocator,
    ) -> Self {
        Self {
            clients,
            permissions,
            lister,
            locator,
        }
    }

    pub async fn create_route(
        &self,
        auth: &AuthInfo,
        message: CreateRouteMessage,
    ) -> RepoResult<RouteRecord> {
        let client = self.clients.build_client(auth).await?;
        let guid = Uuid::new_v4().to_string();
        let mut meta = ObjectMeta::new(&message.space_guid, &guid);
        meta.labels = message.labels;
        meta.annotations = message.annotations;
        let created = client
            .create(Object::new(
                meta,
                Spec::Route(RouteSpec {
                    host: message.host,
                    path: message.path,
                    protocol: DEFAULT_PROTOCOL.to_string(),
                    domain_guid: message.domain_guid,
                    destinations: Vec::new(),
                }),
            ))
            .await
            .for_resource(ROUTE_RESOURCE, "failed to create route")?;
        tracing::info!(guid = %guid, space = %message.space_guid, "created route");
        RouteRecord::from_object(&created)
    }

    pub async fn get_route(&self, auth: &AuthInfo, guid: &str) -> RepoResult<RouteRecord> {
        let scope = self
            .locator
            .locate_scope(ResourceKind::Route, guid, ROUTE_RESOURCE)
            .await?;
        let client = self.clients.build_client(auth).await?;
        let route = Self::fetch(client.as_ref(), &scope, guid).await?;
        RouteRecord::from_object(&route)
    }

    pub async fn list_routes(
        &self,
        auth: &AuthInfo,
        message: ListRoutesMessage,
    ) -> RepoResult<Vec<RouteRecord>> {
        let client = self.clients.build_client(auth).await?;
        let scopes = self
            .permissions
            .authorized_scopes(client.identity(), RoleLevel::Space)
            .await?;
        let wanted: BTreeSet<String> = message.space_guids.iter().cloned().collect();
        let scopes = scopes
            .into_iter()
            .filter(|scope| wanted.is_empty() || wanted.contains(scope));

        let routes = self
            .lister
            .list_across(
                client.as_ref(),
                ResourceKind::Route,
                scopes,
                &ListOptions::default(),
                &route_filters(message),
                ROUTE_RESOURCE,
            )
            .await?;
        let mut records = routes
            .iter()
            .map(RouteRecord::from_object)
            .collect::<RepoResult<Vec<_>>>()?;
        records.sort_by(|a, b| a.guid.cmp(&b.guid));
        Ok(records)
    }

    pub async fn list_routes_for_app(
        &self,
        auth: &AuthInfo,
        app_guid: &str,
        space_guid: &str,
    ) -> RepoResult<Vec<RouteRecord>> {
        let client = self.clients.build_client(auth).await?;
        let routes = client
            .list(ResourceKind::Route, &ListOptions::in_scope(space_guid))
            .await
            .for_resource(ROUTE_RESOURCE, "failed to list routes for app")?;
        route_filters(ListRoutesMessage {
            app_guids: vec![app_guid.to_string()],
            ..ListRoutesMessage::default()
        })
        .apply(routes)
        .iter()
        .map(RouteRecord::from_object)
        .collect()
    }

    /// Return the route with the same space, domain, host and path, creating
    /// it when none exists.
    pub async fn get_or_create_route(
        &self,
        auth: &AuthInfo,
        message: CreateRouteMessage,
    ) -> RepoResult<RouteRecord> {
        let existing = self
            .list_routes(
                auth,
                ListRoutesMessage {
                    space_guids: vec![message.space_guid.clone()],
                    domain_guids: vec![message.domain_guid.clone()],
                    hosts: vec![message.host.clone()],
                    paths: vec![message.path.clone()],
                    ..ListRoutesMessage::default()
                },
            )
            .await?;
        if let Some(route) = existing.into_iter().next() {
            return Ok(route);
        }
        self.create_route(auth, message).await
    }

    pub async fn add_destinations(
        &self,
        auth: &AuthInfo,
        message: AddDestinationsMessage,
    ) -> RepoResult<RouteRecord> {
        let client = self.clients.build_client(auth).await?;
        let route = Self::fetch(client.as_ref(), &message.space_guid, &message.route_guid).await?;
        let mut spec = route_spec(&route)?.clone();
        spec.destinations = merge_destinations(&spec.destinations, message.new_destinations);
        let patched = client
            .patch(&route.key(), ObjectPatch::spec(Spec::Route(spec)))
            .await
            .for_resource(ROUTE_RESOURCE, "failed to add route destinations")?;
        RouteRecord::from_object(&patched)
    }

    pub async fn remove_destination(
        &self,
        auth: &AuthInfo,
        message: RemoveDestinationMessage,
    ) -> RepoResult<RouteRecord> {
        let client = self.clients.build_client(auth).await?;
        let route = Self::fetch(client.as_ref(), &message.space_guid, &message.route_guid).await?;
        let mut spec = route_spec(&route)?.clone();
        let before = spec.destinations.len();
        spec.destinations
            .retain(|destination| destination.guid != message.destination_guid);
        if spec.destinations.len() == before {
            return Err(ValidationError::DestinationNotFound(message.destination_guid).into());
        }
        let patched = client
            .patch(&route.key(), ObjectPatch::spec(Spec::Route(spec)))
            .await
            .for_resource(ROUTE_RESOURCE, "failed to remove route destination")?;
        RouteRecord::from_object(&patched)
    }

    pub async fn delete_route(&self, auth: &AuthInfo, message: DeleteRouteMessage) -> RepoResult<()> {
        let client = self.clients.build_client(auth).await?;
        client
            .delete(&ObjectKey::new(
                ResourceKind::Route,
                &message.space_guid,
                &message.guid,
            ))
            .await
            .for_resource(ROUTE_RESOURCE, "failed to delete route")?;
        tracing::info!(guid = %message.guid, identity = %client.identity(), "deleted route");
        Ok(())
    }

    pub async fn patch_route_metadata(
        &self,
        auth: &AuthInfo,
        guid: &str,
        space_guid: &str,
        metadata: MetadataPatch,
    ) -> RepoResult<RouteRecord> {
        let client = self.clients.build_client(auth).await?;
        let patched = client
            .patch(
                &ObjectKey::new(ResourceKind::Route, space_guid, guid),
                ObjectPatch::metadata(metadata),
            )
            .await
            .for_resource(ROUTE_RESOURCE, "failed to patch route metadata")?;
        RouteRecord::from_object(&patched)
    }

    async fn fetch(client: &dyn ObjectClient, scope: &str, guid: &str) -> RepoResult<Object> {
        client
            .get(&ObjectKey::new(ResourceKind::Route, scope, guid))
            .await
            .for_resource(ROUTE_RESOURCE, "failed to get route")
            .map_err(|err| err.hide_forbidden())
    }
}
