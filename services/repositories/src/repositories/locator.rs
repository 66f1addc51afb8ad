//! Global identifier locator.
//!
//! # Purpose
//! Resolves a globally unique identifier to the one object (and so the scope)
//! that carries it, reading through the privileged client.
//!
//! # Key invariants
//! - Zero matches is `NotFound`.
//! - More than one match is `DuplicateRecords`; the locator never picks one.
use crate::errors::{RepoError, RepoResult, StoreResultExt};
use crate::model::{Object, ResourceKind};
use crate::observability;
use crate::store::{ListOptions, ObjectClient};
use std::sync::Arc;

#[derive(Clone)]
pub struct GlobalLocator {
    privileged: Arc<dyn ObjectClient>,
}

impl GlobalLocator {
    pub fn new(privileged: Arc<dyn ObjectClient>) -> Self {
        Self { privileged }
    }

    pub async fn locate(
        &self,
        kind: ResourceKind,
        guid: &str,
        resource: &'static str,
    ) -> RepoResult<Object> {
        let mut matches = self
            .privileged
            .list(kind, &ListOptions::cluster_wide().with_name(guid))
            .await
            .for_resource(resource, &format!("failed to locate {resource} {guid}"))?;

        let outcome = match matches.len() {
            0 => "not_found",
            1 => "found",
            _ => "duplicate",
        };
        metrics::counter!(observability::LOCATE_TOTAL, "outcome" => outcome).increment(1);

        match matches.len() {
            0 => Err(RepoError::not_found(
                resource,
                format!("{resource} {guid} not found"),
            )),
            1 => Ok(matches.remove(0)),
            count => {
                let scopes: Vec<&str> = matches.iter().map(Object::scope).collect();
                tracing::error!(
                    kind = kind.as_str(),
                    guid,
                    count,
                    scopes = ?scopes,
                    "identifier is not globally unique"
                );
                Err(RepoError::DuplicateRecords {
                    resource,
                    identifier: guid.to_string(),
                })
            }
        }
    }

    /// Scope owning `guid`.
    pub async fn locate_scope(
        &self,
        kind: ResourceKind,
        guid: &str,
        resource: &'static str,
    ) -> RepoResult<String> {
        let object = self.locate(kind, guid, resource).await?;
        tracing::debug!(kind = kind.as_str(), guid, scope = object.scope(), "located object");
        Ok(object.meta.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BuildSpec, ObjectMeta, Spec};
    use crate::store::Backend;
    use crate::store::memory::InMemoryBackend;
    use stratus_authz::{Identity, RoleLevel, RoleTable};

    fn build(scope: &str, name: &str) -> Object {
        Object::new(
            ObjectMeta::new(scope, name),
            Spec::Build(BuildSpec {
                app_guid: "app-1".to_string(),
                package_guid: "pkg-1".to_string(),
                staging_memory_mb: 1024,
                staging_disk_mb: 2048,
                lifecycle_type: "buildpack".to_string(),
            }),
        )
    }

    async fn setup() -> (Arc<dyn ObjectClient>, GlobalLocator) {
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
        (privileged.clone(), GlobalLocator::new(privileged))
    }

    #[tokio::test]
    async fn locates_the_owning_scope() {
        let (privileged, locator) = setup().await;
        privileged.create(build("space-b", "build-1")).await.expect("build");

        let scope = locator
            .locate_scope(ResourceKind::Build, "build-1", "Build")
            .await
            .expect("scope");
        assert_eq!(scope, "space-b");
    }

    #[tokio::test]
    async fn zero_matches_is_not_found() {
        let (_privileged, locator) = setup().await;
        let err = locator
            .locate(ResourceKind::Build, "build-1", "Build")
            .await
            .expect_err("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn duplicates_across_scopes_are_reported() {
        let (privileged, locator) = setup().await;
        privileged.create(build("space-a", "build-1")).await.expect("build");
        privileged.create(build("space-b", "build-1")).await.expect("build");

        let err = locator
            .locate(ResourceKind::Build, "build-1", "Build")
            .await
            .expect_err("duplicate");
        assert!(matches!(
            err,
            RepoError::DuplicateRecords { resource: "Build", ref identifier } if identifier == "build-1"
        ));
    }

    #[tokio::test]
    async fn other_kinds_with_the_same_name_do_not_count() {
        let (privileged, locator) = setup().await;
        privileged.create(build("space-a", "shared")).await.expect("build");
        let err = locator
            .locate(ResourceKind::Route, "shared", "Route")
            .await
            .expect_err("missing");
        assert!(err.is_not_found());
    }
}
