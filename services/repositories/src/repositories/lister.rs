//! Aggregating fan-out lister.
//!
//! # Purpose
//! Issues one scoped list per scope, concurrently, and merges the results.
//!
//! # Key invariants
//! - `Forbidden` for one scope counts as an empty result for that scope. The
//!   permission index and the backend may briefly disagree while role
//!   bindings propagate.
//! - Any other backend error aborts the whole call.
//! - Result order is unspecified; callers sort explicitly.
use super::predicates::PredicateChain;
use crate::errors::{RepoError, RepoResult};
use crate::model::{Object, ResourceKind};
use crate::observability;
use crate::store::{ListOptions, ObjectClient, StoreError};
use futures::{StreamExt, TryStreamExt, stream};

#[derive(Debug, Clone, Copy)]
pub struct AggregatingLister {
    concurrency: usize,
}

impl AggregatingLister {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// List `kind` in every scope of `scopes` and keep what `filters` accepts.
    ///
    /// `base` supplies name and label selectors; its scope is replaced per call.
    pub async fn list_across<I>(
        &self,
        client: &dyn ObjectClient,
        kind: ResourceKind,
        scopes: I,
        base: &ListOptions,
        filters: &PredicateChain<Object>,
        resource: &'static str,
    ) -> RepoResult<Vec<Object>>
    where
        I: IntoIterator<Item = String>,
    {
        let per_scope: Vec<Vec<Object>> = stream::iter(scopes.into_iter().map(|scope| {
            let options = ListOptions {
                scope: Some(scope.clone()),
                ..base.clone()
            };
            async move {
                match client.list(kind, &options).await {
                    Ok(items) => Ok(items),
                    Err(StoreError::Forbidden(reason)) => {
                        metrics::counter!(
                            observability::FANOUT_FORBIDDEN_SCOPES_TOTAL,
                            "kind" => kind.as_str()
                        )
                        .increment(1);
                        tracing::warn!(
                            identity = %client.identity(),
                            kind = kind.as_str(),
                            scope = %scope,
                            reason = %reason,
                            "skipping forbidden scope during fan-out list"
                        );
                        Ok(Vec::new())
                    }
                    Err(err) => Err(RepoError::from_store(
                        err,
                        resource,
                        format!("failed to list {resource} in scope {scope}"),
                    )),
                }
            }
        }))
        .buffer_unordered(self.concurrency)
        .try_collect()
        .await?;

        let merged: Vec<Object> = per_scope.into_iter().flatten().collect();
        tracing::debug!(
            kind = kind.as_str(),
            count = merged.len(),
            "merged fan-out list"
        );
        Ok(filters.apply(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BindingSubject, ObjectMeta, RoleBindingSpec, RouteSpec, SPACE_NAME_LABEL, Spec,
    };
    use crate::store::Backend;
    use crate::store::memory::InMemoryBackend;
    use std::sync::Arc;
    use stratus_authz::{Identity, RoleLevel, RoleTable, SubjectKind};

    fn route(scope: &str, name: &str, host: &str) -> Object {
        Object::new(
            ObjectMeta::new(scope, name).with_label(SPACE_NAME_LABEL, scope),
            Spec::Route(RouteSpec {
                host: host.to_string(),
                path: String::new(),
                protocol: "http".to_string(),
                domain_guid: "domain-1".to_string(),
                destinations: Vec::new(),
            }),
        )
    }

    async fn setup() -> (InMemoryBackend, Arc<dyn ObjectClient>) {
        let backend = InMemoryBackend::new(&RoleTable::defaults());
        let admin = Identity::service_account("cf", "api");
        backend.register_cluster_admin(admin.clone()).await;
        backend
            .create_scope("cf", RoleLevel::Root, None)
            .await
            .expect("root");
        backend
            .create_scope("org-1", RoleLevel::Org, Some("cf"))
            .await
            .expect("org");
        for space in ["space-a", "space-b"] {
            backend
                .create_scope(space, RoleLevel::Space, Some("org-1"))
                .await
                .expect("space");
        }
        let privileged = backend.client_for(&admin);
        privileged
            .create(route("space-a", "route-a1", "api"))
            .await
            .expect("route");
        privileged
            .create(route("space-a", "route-a2", "www"))
            .await
            .expect("route");
        privileged
            .create(route("space-b", "route-b1", "api"))
            .await
            .expect("route");
        privileged
            .create(Object::new(
                ObjectMeta::new("space-a", "binding-1"),
                Spec::RoleBinding(RoleBindingSpec {
                    role: "stratus-space-developer".to_string(),
                    subject: BindingSubject {
                        kind: SubjectKind::User,
                        name: "alice".to_string(),
                    },
                }),
            ))
            .await
            .expect("binding");
        (backend, privileged)
    }

    fn scopes() -> Vec<String> {
        vec!["space-a".to_string(), "space-b".to_string()]
    }

    #[tokio::test]
    async fn forbidden_scopes_contribute_nothing() {
        let (backend, _privileged) = setup().await;
        let alice = backend.client_for(&Identity::user("alice"));

        let mut routes = AggregatingLister::new(4)
            .list_across(
                alice.as_ref(),
                ResourceKind::Route,
                scopes(),
                &ListOptions::default(),
                &PredicateChain::new(),
                "Route",
            )
            .await
            .expect("list");
        routes.sort_by(|a, b| a.name().cmp(b.name()));
        let names: Vec<_> = routes.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["route-a1", "route-a2"]);
    }

    #[tokio::test]
    async fn merges_every_scope_and_applies_filters() {
        let (_backend, privileged) = setup().await;
        let filters = PredicateChain::new().field_in(["api"], |object: &Object| match &object.spec {
            Spec::Route(spec) => Some(spec.host.as_str()),
            _ => None,
        });

        let routes = AggregatingLister::new(1)
            .list_across(
                privileged.as_ref(),
                ResourceKind::Route,
                scopes(),
                &ListOptions::default(),
                &filters,
                "Route",
            )
            .await
            .expect("list");
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| matches!(&r.spec, Spec::Route(s) if s.host == "api")));
    }

    #[tokio::test]
    async fn base_selectors_apply_in_every_scope() {
        let (_backend, privileged) = setup().await;
        let base = ListOptions::default().with_label_in(SPACE_NAME_LABEL, ["space-b"]);
        let routes = AggregatingLister::new(8)
            .list_across(
                privileged.as_ref(),
                ResourceKind::Route,
                scopes(),
                &base,
                &PredicateChain::new(),
                "Route",
            )
            .await
            .expect("list");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name(), "route-b1");
    }

    #[tokio::test]
    async fn empty_scope_set_lists_nothing() {
        let (_backend, privileged) = setup().await;
        let routes = AggregatingLister::new(2)
            .list_across(
                privileged.as_ref(),
                ResourceKind::Route,
                Vec::<String>::new(),
                &ListOptions::default(),
                &PredicateChain::new(),
                "Route",
            )
            .await
            .expect("list");
        assert!(routes.is_empty());
    }

    #[test]
    fn concurrency_is_at_least_one() {
        assert_eq!(AggregatingLister::new(0).concurrency(), 1);
    }
}
