//! Desired-state payloads, one per resource kind.
use serde::{Deserialize, Serialize};
use stratus_authz::{RoleLevel, SubjectKind};

use super::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Spec {
    Scope(ScopeSpec),
    Org(OrgSpec),
    Space(SpaceSpec),
    Route(RouteSpec),
    Build(BuildSpec),
    App(AppSpec),
    ServicePlan(ServicePlanSpec),
    RoleBinding(RoleBindingSpec),
}

impl Spec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Spec::Scope(_) => ResourceKind::Scope,
            Spec::Org(_) => ResourceKind::Org,
            Spec::Space(_) => ResourceKind::Space,
            Spec::Route(_) => ResourceKind::Route,
            Spec::Build(_) => ResourceKind::Build,
            Spec::App(_) => ResourceKind::App,
            Spec::ServicePlan(_) => ResourceKind::ServicePlan,
            Spec::RoleBinding(_) => ResourceKind::RoleBinding,
        }
    }
}

/// Descriptor of an isolation scope. Scope descriptors are cluster-level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSpec {
    pub level: RoleLevel,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgSpec {
    pub display_name: String,
    #[serde(default)]
    pub suspended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSpec {
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub host: String,
    pub path: String,
    pub protocol: String,
    pub domain_guid: String,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub guid: String,
    pub app_guid: String,
    pub process_type: String,
    pub port: Option<u16>,
    pub protocol: Option<String>,
}

impl Destination {
    /// Two destinations with equal targets are the same destination whatever
    /// their GUIDs.
    pub fn same_target(&self, other: &Destination) -> bool {
        self.app_guid == other.app_guid
            && self.process_type == other.process_type
            && self.port == other.port
            && self.protocol == other.protocol
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub app_guid: String,
    pub package_guid: String,
    pub staging_memory_mb: u32,
    pub staging_disk_mb: u32,
    pub lifecycle_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesiredState {
    Started,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSpec {
    pub display_name: String,
    pub desired_state: DesiredState,
    pub current_droplet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityType {
    Public,
    Admin,
    Organization,
}

impl VisibilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityType::Public => "public",
            VisibilityType::Admin => "admin",
            VisibilityType::Organization => "organization",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanVisibilitySpec {
    pub visibility_type: VisibilityType,
    #[serde(default)]
    pub organizations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlanSpec {
    pub name: String,
    pub description: String,
    pub free: bool,
    pub visibility: PlanVisibilitySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSubject {
    pub kind: SubjectKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBindingSpec {
    pub role: String,
    pub subject: BindingSubject,
}
