//! Backend object model.
//!
//! # Purpose
//! Re-exports the object envelope, per-kind desired-state specs, and the
//! status condition helpers used by the store and repository layers.
mod conditions;
mod meta;
mod object;
mod spec;

pub use conditions::{
    CONDITION_READY, CONDITION_STAGING, CONDITION_SUCCEEDED, Condition, ConditionStatus,
    ObjectStatus, find_condition, is_condition_false, is_condition_true, set_condition,
};
pub use meta::{
    APP_GUID_LABEL, APP_REV_ANNOTATION, CLUSTER_SCOPE, DEPLOYMENT_STATUS_LABEL, MetadataPatch,
    ORG_NAME_LABEL, ObjectKey, ObjectMeta, PLAN_AVAILABLE_LABEL, PROPAGATE_NONE_ANNOTATION,
    ROLE_GUID_LABEL, ResourceKind, SERVICE_BROKER_GUID_LABEL, SERVICE_OFFERING_GUID_LABEL,
    SPACE_NAME_LABEL,
};
pub use object::Object;
pub use spec::{
    AppSpec, BindingSubject, BuildSpec, DesiredState, Destination, OrgSpec, PlanVisibilitySpec,
    RoleBindingSpec, RouteSpec, ScopeSpec, ServicePlanSpec, SpaceSpec, Spec, VisibilityType,
};
