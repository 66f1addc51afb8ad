//! Resource repositories and the primitives they share.
//!
//! # Purpose
//! Each repository composes the identity-scoped client, the permission index,
//! the fan-out lister, the global locator and the condition awaiter into
//! record-oriented operations for one resource family.
//!
//! # Notes
//! [`Repositories::new`] wires every repository from one [`RepositoryConfig`]
//! and one backend; collaborators are passed explicitly, never looked up
//! globally.
use crate::authorization::{AuthorizedIn, PermissionIndex};
use crate::client::ClientFactory;
use crate::config::RepositoryConfig;
use crate::errors::RepoError;
use crate::model::Object;
use crate::store::{Backend, StoreError};
use std::sync::Arc;

pub mod awaiter;
pub mod builds;
pub mod deployments;
pub mod lister;
pub mod locator;
pub mod orgs;
pub mod plans;
pub mod predicates;
pub mod roles;
pub mod routes;
pub mod sorter;
pub mod spaces;

pub use awaiter::{
    AwaitOutcome, AwaitPredicate, ConditionAwaiter, condition_true, condition_true_or_failed,
};
pub use builds::{BuildRecord, BuildRepo, BuildState, CreateBuildMessage};
pub use deployments::{
    CreateDeploymentMessage, DeploymentRecord, DeploymentRepo, DeploymentStatus,
    DeploymentStatusReason, DeploymentStatusValue, ListDeploymentsMessage,
};
pub use lister::AggregatingLister;
pub use locator::GlobalLocator;
pub use orgs::{CreateOrgMessage, ListOrgsMessage, OrgRecord, OrgRepo};
pub use plans::{
    ApplyPlanVisibilityMessage, DeletePlanVisibilityMessage, ListPlansMessage, PlanRecord,
    PlanRepo, PlanVisibilityRecord, UpdatePlanVisibilityMessage, VisibilityOrganization,
};
pub use predicates::PredicateChain;
pub use roles::{CreateRoleMessage, ListRolesMessage, RoleRecord, RoleRepo, RoleTarget};
pub use routes::{
    AddDestinationsMessage, CreateRouteMessage, DeleteRouteMessage, DestinationMessage,
    ListRoutesMessage, RemoveDestinationMessage, RouteRecord, RouteRepo,
};
pub use sorter::{SortField, SortOrder, Sorter, TimestampSorter, Timestamped};
pub use spaces::{
    CreateSpaceMessage, DeleteSpaceMessage, ListSpacesMessage, SpaceRecord, SpaceRepo,
};

pub const ORG_RESOURCE: &str = "Org";
pub const SPACE_RESOURCE: &str = "Space";
pub const ROUTE_RESOURCE: &str = "Route";
pub const BUILD_RESOURCE: &str = "Build";
pub const DEPLOYMENT_RESOURCE: &str = "Deployment";
pub const PLAN_RESOURCE: &str = "Service Plan";
pub const ROLE_RESOURCE: &str = "Role";

/// Error for an object whose spec is not the kind the repository reads.
pub(crate) fn unexpected_spec(resource: &'static str, object: &Object) -> RepoError {
    RepoError::Backend {
        context: format!("failed to decode {resource}"),
        source: StoreError::Invalid(format!("{} does not hold a {resource} spec", object.key())),
    }
}

/// Every repository, wired against one backend.
pub struct Repositories {
    pub orgs: Arc<OrgRepo>,
    pub spaces: SpaceRepo,
    pub routes: RouteRepo,
    pub builds: BuildRepo,
    pub deployments: DeploymentRepo,
    pub plans: PlanRepo,
    pub roles: RoleRepo,
}

impl Repositories {
    pub fn new(config: &RepositoryConfig, backend: Arc<dyn Backend>) -> Self {
        crate::observability::describe_metrics();
        let clients = ClientFactory::new(backend, config.privileged_identity.clone());
        let privileged = clients.privileged();
        let permissions = Arc::new(PermissionIndex::new(
            privileged.clone(),
            config.roles.clone(),
        ));
        let lister = AggregatingLister::new(config.list_concurrency);
        let locator = GlobalLocator::new(privileged);
        let awaiter = ConditionAwaiter::new(config.await_timeout);
        let sorter: Arc<dyn Sorter<Object>> = Arc::new(TimestampSorter);

        let orgs = Arc::new(OrgRepo::new(
            clients.clone(),
            permissions.clone(),
            awaiter,
            config.root_namespace.clone(),
        ));
        let spaces = SpaceRepo::new(
            clients.clone(),
            orgs.clone(),
            permissions.clone(),
            lister,
            locator.clone(),
            awaiter,
        );
        let routes = RouteRepo::new(clients.clone(), permissions.clone(), lister, locator.clone());
        let builds = BuildRepo::new(clients.clone(), locator.clone(), awaiter, sorter.clone());
        let deployments = DeploymentRepo::new(
            clients.clone(),
            permissions.clone(),
            lister,
            locator.clone(),
            sorter,
        );
        let plans = PlanRepo::new(clients.clone(), orgs.clone(), config.root_namespace.clone());
        let checker: Arc<dyn AuthorizedIn> = permissions.clone();
        let roles = RoleRepo::new(
            clients,
            permissions,
            checker,
            lister,
            config.roles.clone(),
            config.root_namespace.clone(),
        );

        Self {
            orgs,
            spaces,
            routes,
            builds,
            deployments,
            plans,
            roles,
        }
    }
}
