use super::{ObjectKey, ObjectMeta, ObjectStatus, ResourceKind, Spec};
use serde::{Deserialize, Serialize};

/// A stored desired-state object together with its reconciler-owned status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub meta: ObjectMeta,
    pub spec: Spec,
    #[serde(default)]
    pub status: ObjectStatus,
}

impl Object {
    pub fn new(meta: ObjectMeta, spec: Spec) -> Self {
        Self {
            meta,
            spec,
            status: ObjectStatus::default(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind(), &self.meta.scope, &self.meta.name)
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn scope(&self) -> &str {
        &self.meta.scope
    }
}
