//! Object identity and metadata shared by every resource kind.
//!
//! # Purpose
//! Defines the addressing key `(kind, scope, name)` and the metadata envelope
//! the backend maintains for stored objects.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scope value used by cluster-level objects (scope descriptors).
pub const CLUSTER_SCOPE: &str = "";

pub const ORG_NAME_LABEL: &str = "cloudfoundry.org/org-name";
pub const SPACE_NAME_LABEL: &str = "cloudfoundry.org/space-name";
pub const APP_GUID_LABEL: &str = "cloudfoundry.org/app-guid";
pub const ROLE_GUID_LABEL: &str = "cloudfoundry.org/role-guid";
pub const DEPLOYMENT_STATUS_LABEL: &str = "cloudfoundry.org/deployment-status";
pub const PLAN_AVAILABLE_LABEL: &str = "cloudfoundry.org/plan-available";
pub const SERVICE_OFFERING_GUID_LABEL: &str = "cloudfoundry.org/service-offering-guid";
pub const SERVICE_BROKER_GUID_LABEL: &str = "cloudfoundry.org/service-broker-guid";
pub const APP_REV_ANNOTATION: &str = "cloudfoundry.org/app-rev";
pub const PROPAGATE_NONE_ANNOTATION: &str = "propagate.hnc.x-k8s.io/none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Scope,
    Org,
    Space,
    Route,
    Build,
    App,
    ServicePlan,
    RoleBinding,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Scope => "scope",
            ResourceKind::Org => "org",
            ResourceKind::Space => "space",
            ResourceKind::Route => "route",
            ResourceKind::Build => "build",
            ResourceKind::App => "app",
            ResourceKind::ServicePlan => "service_plan",
            ResourceKind::RoleBinding => "role_binding",
        }
    }

    pub fn all() -> [ResourceKind; 8] {
        [
            ResourceKind::Scope,
            ResourceKind::Org,
            ResourceKind::Space,
            ResourceKind::Route,
            ResourceKind::Build,
            ResourceKind::App,
            ResourceKind::ServicePlan,
            ResourceKind::RoleBinding,
        ]
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub scope: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.scope, self.name)
        }
    }
}

/// Metadata maintained on every stored object.
///
/// `created_at`, `updated_at` and `resource_version` are owned by the backend;
/// values supplied on create are overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub scope: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Label/annotation changes. `None` removes the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    #[serde(default)]
    pub labels: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Option<String>>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }

    pub fn apply(&self, meta: &mut ObjectMeta) {
        merge_map(&mut meta.labels, &self.labels);
        merge_map(&mut meta.annotations, &self.annotations);
    }
}

fn merge_map(target: &mut BTreeMap<String, String>, changes: &BTreeMap<String, Option<String>>) {
    for (key, value) in changes {
        match value {
            Some(value) => {
                target.insert(key.clone(), value.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_patch_sets_and_removes_keys() {
        let mut meta = ObjectMeta::new("space-a", "route-1")
            .with_label("keep", "1")
            .with_label("drop", "2");
        let mut patch = MetadataPatch::default();
        patch.labels.insert("drop".to_string(), None);
        patch.labels.insert("add".to_string(), Some("3".to_string()));
        patch
            .annotations
            .insert("note".to_string(), Some("hello".to_string()));

        patch.apply(&mut meta);

        assert_eq!(meta.label("keep"), Some("1"));
        assert_eq!(meta.label("drop"), None);
        assert_eq!(meta.label("add"), Some("3"));
        assert_eq!(meta.annotation("note"), Some("hello"));
    }

    #[test]
    fn object_key_display_omits_cluster_scope() {
        let cluster = ObjectKey::new(ResourceKind::Scope, CLUSTER_SCOPE, "cf");
        let scoped = ObjectKey::new(ResourceKind::Route, "space-a", "route-1");
        assert_eq!(cluster.to_string(), "scope/cf");
        assert_eq!(scoped.to_string(), "route/space-a/route-1");
    }
}
