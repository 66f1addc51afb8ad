//! Backend object-store contract.
//!
//! # Purpose
//! Repositories reach the declarative backend only through [`ObjectClient`],
//! a client bound to exactly one calling identity. [`Backend`] turns caller
//! credentials into such clients.
//!
//! # Key invariants
//! - Every operation is authorized for the client's identity before existence
//!   is checked, so a hidden object and a missing object produce the same
//!   `Forbidden` error.
//! - [`Watch`] yields the current object (when present) before any change.
use crate::model::{MetadataPatch, Object, ObjectKey, ResourceKind, Spec};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use stratus_authz::Identity;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub mod memory;
pub mod policy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("watch lagged behind by {0} events")]
    WatchLagged(u64),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operation being authorized against a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Watch,
    Create,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Watch => "watch",
            Verb::Create => "create",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
        }
    }
}

/// Label constraint: the label value must be one of `values`.
///
/// An empty value set imposes no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub values: BTreeSet<String>,
}

impl LabelSelector {
    pub fn is_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::is_in(key, [value.into()])
    }

    pub fn matches(&self, object: &Object) -> bool {
        if self.values.is_empty() {
            return true;
        }
        object
            .meta
            .label(&self.key)
            .is_some_and(|value| self.values.contains(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// `None` lists across every scope and requires a cluster-wide grant.
    pub scope: Option<String>,
    pub name: Option<String>,
    pub label_selectors: Vec<LabelSelector>,
}

impl ListOptions {
    pub fn cluster_wide() -> Self {
        Self::default()
    }

    pub fn in_scope(scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_label_in<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let selector = LabelSelector::is_in(key, values);
        if !selector.values.is_empty() {
            self.label_selectors.push(selector);
        }
        self
    }

    pub fn matches(&self, object: &Object) -> bool {
        self.scope
            .as_deref()
            .is_none_or(|scope| object.meta.scope == scope)
            && self
                .name
                .as_deref()
                .is_none_or(|name| object.meta.name == name)
            && self
                .label_selectors
                .iter()
                .all(|selector| selector.matches(object))
    }
}

/// Merge-patch applied to an existing object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPatch {
    pub metadata: MetadataPatch,
    /// Replacement spec; must be of the same kind as the patched object.
    pub spec: Option<Spec>,
}

impl ObjectPatch {
    pub fn metadata(metadata: MetadataPatch) -> Self {
        Self {
            metadata,
            spec: None,
        }
    }

    pub fn spec(spec: Spec) -> Self {
        Self {
            metadata: MetadataPatch::default(),
            spec: Some(spec),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: Object,
}

/// Change subscription for a single object.
pub struct Watch {
    key: ObjectKey,
    initial: Option<Object>,
    events: broadcast::Receiver<WatchEvent>,
}

impl Watch {
    pub fn new(
        key: ObjectKey,
        initial: Option<Object>,
        events: broadcast::Receiver<WatchEvent>,
    ) -> Self {
        Self {
            key,
            initial,
            events,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Next event for the watched object.
    ///
    /// Returns `None` once the backend closes the subscription and
    /// `Some(Err(StoreError::WatchLagged))` if events were dropped.
    pub async fn next(&mut self) -> Option<StoreResult<WatchEvent>> {
        if let Some(object) = self.initial.take() {
            return Some(Ok(WatchEvent {
                event_type: WatchEventType::Added,
                object,
            }));
        }
        loop {
            match self.events.recv().await {
                Ok(event) if event.object.key() == self.key => return Some(Ok(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    return Some(Err(StoreError::WatchLagged(skipped)));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Backend client bound to one identity.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    fn identity(&self) -> &Identity;

    async fn get(&self, key: &ObjectKey) -> StoreResult<Object>;
    async fn list(&self, kind: ResourceKind, options: &ListOptions) -> StoreResult<Vec<Object>>;
    async fn create(&self, object: Object) -> StoreResult<Object>;
    async fn patch(&self, key: &ObjectKey, patch: ObjectPatch) -> StoreResult<Object>;
    async fn delete(&self, key: &ObjectKey) -> StoreResult<()>;
    async fn watch(&self, key: &ObjectKey) -> StoreResult<Watch>;
}

/// Source of identity-bound clients.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Resolve bearer credentials to an identity; `None` for unknown tokens.
    async fn review_token(&self, token: &str) -> StoreResult<Option<Identity>>;

    fn client_for(&self, identity: &Identity) -> Arc<dyn ObjectClient>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectMeta, SpaceSpec};

    fn space(scope: &str, name: &str) -> Object {
        Object::new(
            ObjectMeta::new(scope, name).with_label("tier", "gold"),
            Spec::Space(SpaceSpec {
                display_name: name.to_string(),
            }),
        )
    }

    #[test]
    fn empty_label_selector_matches_everything() {
        let selector = LabelSelector::is_in("tier", Vec::<String>::new());
        assert!(selector.matches(&space("org-a", "s1")));
    }

    #[test]
    fn list_options_combine_scope_name_and_labels() {
        let options = ListOptions::in_scope("org-a")
            .with_name("s1")
            .with_label_in("tier", ["gold", "silver"]);
        assert!(options.matches(&space("org-a", "s1")));
        assert!(!options.matches(&space("org-b", "s1")));
        assert!(!options.matches(&space("org-a", "s2")));

        let bronze = ListOptions::in_scope("org-a").with_label_in("tier", ["bronze"]);
        assert!(!bronze.matches(&space("org-a", "s1")));
    }

    #[test]
    fn with_label_in_skips_empty_sets() {
        let options = ListOptions::cluster_wide().with_label_in("tier", Vec::<String>::new());
        assert!(options.label_selectors.is_empty());
    }

    #[tokio::test]
    async fn watch_yields_initial_then_filters_by_key() {
        let (tx, rx) = broadcast::channel(8);
        let watched = space("org-a", "s1");
        let mut watch = Watch::new(watched.key(), Some(watched.clone()), rx);

        tx.send(WatchEvent {
            event_type: WatchEventType::Added,
            object: space("org-a", "other"),
        })
        .expect("send");
        tx.send(WatchEvent {
            event_type: WatchEventType::Modified,
            object: watched.clone(),
        })
        .expect("send");
        drop(tx);

        let first = watch.next().await.expect("initial").expect("ok");
        assert_eq!(first.event_type, WatchEventType::Added);
        let second = watch.next().await.expect("modified").expect("ok");
        assert_eq!(second.event_type, WatchEventType::Modified);
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn watch_reports_lag() {
        let (tx, rx) = broadcast::channel(1);
        let watched = space("org-a", "s1");
        let mut watch = Watch::new(watched.key(), None, rx);
        for _ in 0..3 {
            tx.send(WatchEvent {
                event_type: WatchEventType::Modified,
                object: watched.clone(),
            })
            .expect("send");
        }
        let err = watch.next().await.expect("event").expect_err("lagged");
        assert!(matches!(err, StoreError::WatchLagged(2)));
    }
}
