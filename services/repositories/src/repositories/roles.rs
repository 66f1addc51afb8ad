//! Role repository.
//!
//! # Purpose
//! Grants and revokes API roles by writing role bindings into org and space
//! scopes. The role GUID travels in a label; the binding name is the
//! fingerprint of `(role type, subject)`, so granting the same role twice in a
//! scope collides on the backend's own uniqueness check.
//!
//! # Key invariants
//! - Only org-level and space-level roles can be granted here.
//! - A space role requires the subject to already hold a role in the parent
//!   org.
//! - Every grant also ensures a root-scope `cf_user` binding for the subject,
//!   created with the privileged client and tolerant of an existing one.
use super::lister::AggregatingLister;
use super::predicates::PredicateChain;
use super::{ROLE_RESOURCE, SPACE_RESOURCE};
use crate::authorization::{AuthorizedIn, PermissionIndex};
use crate::client::{AuthInfo, ClientFactory};
use crate::errors::{RepoError, RepoResult, StoreResultExt, ValidationError};
use crate::model::{
    BindingSubject, CLUSTER_SCOPE, Object, ObjectKey, ObjectMeta, PROPAGATE_NONE_ANNOTATION,
    ROLE_GUID_LABEL, ResourceKind, RoleBindingSpec, Spec,
};
use crate::store::{ListOptions, StoreError};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use stratus_authz::{Identity, ROLE_CF_USER, RoleLevel, RoleTable, fingerprint_name};
use uuid::Uuid;

/// Scope a role is granted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleTarget {
    Org(String),
    Space(String),
}

impl RoleTarget {
    fn level(&self) -> RoleLevel {
        match self {
            RoleTarget::Org(_) => RoleLevel::Org,
            RoleTarget::Space(_) => RoleLevel::Space,
        }
    }

    fn scope(&self) -> &str {
        match self {
            RoleTarget::Org(guid) | RoleTarget::Space(guid) => guid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateRoleMessage {
    /// Role GUID; generated when `None`.
    pub guid: Option<String>,
    pub role_type: String,
    pub target: RoleTarget,
    pub subject: Identity,
}

#[derive(Debug, Clone, Default)]
pub struct ListRolesMessage {
    pub guids: Vec<String>,
    pub types: Vec<String>,
    pub org_guids: Vec<String>,
    pub space_guids: Vec<String>,
    pub user_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    pub guid: String,
    pub role_type: String,
    pub org_guid: Option<String>,
    pub space_guid: Option<String>,
    pub subject: Identity,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RoleRecord {
    /// Record for a binding the role table recognizes; `None` otherwise.
    fn from_binding(binding: &Object, roles: &RoleTable, level: RoleLevel) -> Option<Self> {
        let Spec::RoleBinding(spec) = &binding.spec else {
            return None;
        };
        let guid = binding.meta.label(ROLE_GUID_LABEL)?;
        let role_type = roles.role_type_for(&spec.role)?;
        let subject = match Identity::from_subject(spec.subject.kind, &spec.subject.name) {
            Ok(subject) => subject,
            Err(err) => {
                tracing::debug!(binding = %binding.key(), error = %err, "skipping binding with malformed subject");
                return None;
            }
        };
        let scope = binding.meta.scope.clone();
        let (org_guid, space_guid) = match level {
            RoleLevel::Space => (None, Some(scope)),
            _ => (Some(scope), None),
        };
        Some(Self {
            guid: guid.to_string(),
            role_type: role_type.to_string(),
            org_guid,
            space_guid,
            subject,
            created_at: binding.meta.created_at.unwrap_or_default(),
            updated_at: binding.meta.updated_at,
        })
    }
}

fn binding_object(
    scope: &str,
    name: String,
    backend_role: &str,
    subject: &Identity,
) -> Object {
    Object::new(
        ObjectMeta::new(scope, name),
        Spec::RoleBinding(RoleBindingSpec {
            role: backend_role.to_string(),
            subject: BindingSubject {
                kind: subject.kind(),
                name: subject.subject_name(),
            },
        }),
    )
}

pub struct RoleRepo {
    clients: ClientFactory,
    permissions: Arc<PermissionIndex>,
    checker: Arc<dyn AuthorizedIn>,
    lister: AggregatingLister,
    roles: RoleTable,
    root_namespace: String,
}

impl RoleRepo {
    pub fn new(
        clients: ClientFactory,
        permissions: Arc<PermissionIndex>,
        checker: Arc<dyn AuthorizedIn>,
        lister: AggregatingLister,
        roles: RoleTable,
        root_namespace: impl Into<String>,
    ) -> Self {
        Self {
            clients,
            permissions,
            checker,
            lister,
            roles,
            root_namespace: root_namespace.into(),
        }
    }

    /// Grant a role to a subject.
    ///
    /// # Errors
    /// - [`ValidationError::InvalidRoleType`] or
    ///   [`ValidationError::RoleLevelMismatch`] for roles the target cannot hold.
    /// - [`ValidationError::MissingParent`] and
    ///   [`ValidationError::MissingRoleInParentOrg`] for space roles whose
    ///   parent org is unknown or grants the subject nothing.
    /// - [`ValidationError::DuplicateRoleBinding`] when the subject already
    ///   holds the role in the target scope.
    pub async fn create_role(
        &self,
        auth: &AuthInfo,
        message: CreateRoleMessage,
    ) -> RepoResult<RoleRecord> {
        message.subject.validate()?;
        let config = self
            .roles
            .require_at(&message.role_type, message.target.level())?
            .clone();
        let client = self.clients.build_client(auth).await?;

        if let RoleTarget::Space(space_guid) = &message.target {
            let org_guid = self.parent_org(space_guid).await?;
            if !self
                .checker
                .authorized_in(&message.subject, &org_guid)
                .await?
            {
                return Err(ValidationError::MissingRoleInParentOrg {
                    role_type: message.role_type.clone(),
                    subject: message.subject.subject_name(),
                }
                .into());
            }
        }

        let guid = message
            .guid
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let scope = message.target.scope();
        let mut binding = binding_object(
            scope,
            fingerprint_name(&message.role_type, &message.subject),
            &config.backend_role,
            &message.subject,
        );
        binding
            .meta
            .labels
            .insert(ROLE_GUID_LABEL.to_string(), guid.clone());
        if !config.propagate {
            binding
                .meta
                .annotations
                .insert(PROPAGATE_NONE_ANNOTATION.to_string(), "true".to_string());
        }

        let created = match client.create(binding).await {
            Ok(created) => created,
            Err(StoreError::AlreadyExists(_)) => {
                return Err(ValidationError::DuplicateRoleBinding {
                    role_type: message.role_type,
                }
                .into());
            }
            Err(err) => {
                return Err(RepoError::from_store(
                    err,
                    ROLE_RESOURCE,
                    "failed to create role binding",
                ));
            }
        };
        tracing::info!(
            guid = %guid,
            role_type = %message.role_type,
            scope,
            subject = %message.subject,
            identity = %client.identity(),
            "created role binding"
        );

        if let Err(err) = self.ensure_root_binding(&message.subject).await {
            self.revoke_partial_grant(&created).await;
            return Err(err);
        }

        RoleRecord::from_binding(&created, &self.roles, message.target.level()).ok_or_else(|| {
            RepoError::not_found(ROLE_RESOURCE, format!("role binding {guid} is not readable"))
        })
    }

    /// Roles in every org and space the caller holds a role in.
    pub async fn list_roles(
        &self,
        auth: &AuthInfo,
        message: ListRolesMessage,
    ) -> RepoResult<Vec<RoleRecord>> {
        let client = self.clients.build_client(auth).await?;
        let org_scopes = self
            .permissions
            .authorized_scopes(client.identity(), RoleLevel::Org)
            .await?;
        let space_scopes = self
            .permissions
            .authorized_scopes(client.identity(), RoleLevel::Space)
            .await?;
        let scopes: BTreeSet<String> = org_scopes.union(&space_scopes).cloned().collect();

        let bindings = self
            .lister
            .list_across(
                client.as_ref(),
                ResourceKind::RoleBinding,
                scopes,
                &ListOptions::default().with_label_in(ROLE_GUID_LABEL, message.guids),
                &PredicateChain::new(),
                ROLE_RESOURCE,
            )
            .await?;

        let filters = PredicateChain::<RoleRecord>::new()
            .field_in(message.types, |role| Some(role.role_type.as_str()))
            .field_in(message.org_guids, |role| role.org_guid.as_deref())
            .field_in(message.space_guids, |role| role.space_guid.as_deref())
            .field_in(message.user_names, |role| Some(role.subject.name()));
        let records: Vec<RoleRecord> = bindings
            .iter()
            .filter_map(|binding| {
                let level = if space_scopes.contains(binding.scope()) {
                    RoleLevel::Space
                } else {
                    RoleLevel::Org
                };
                RoleRecord::from_binding(binding, &self.roles, level)
            })
            .collect();
        let mut records = filters.apply(records);
        records.sort_by(|a, b| a.guid.cmp(&b.guid));
        Ok(records)
    }

    pub async fn get_role(&self, auth: &AuthInfo, guid: &str) -> RepoResult<RoleRecord> {
        self.list_roles(
            auth,
            ListRolesMessage {
                guids: vec![guid.to_string()],
                ..ListRolesMessage::default()
            },
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| RepoError::not_found(ROLE_RESOURCE, format!("role {guid} not found")))
    }

    /// Revoke the role carrying `guid`.
    ///
    /// # Errors
    /// - [`RepoError::NotFound`] when no binding carries the GUID, or the
    ///   caller may not delete the one that does.
    /// - [`RepoError::DuplicateRecords`] when several bindings carry it; none
    ///   is deleted.
    pub async fn delete_role(&self, auth: &AuthInfo, guid: &str) -> RepoResult<()> {
        let client = self.clients.build_client(auth).await?;
        let bindings = self
            .clients
            .privileged()
            .list(
                ResourceKind::RoleBinding,
                &ListOptions::cluster_wide().with_label_in(ROLE_GUID_LABEL, [guid]),
            )
            .await
            .for_resource(ROLE_RESOURCE, "failed to list role bindings")?;

        let binding = match bindings.as_slice() {
            [] => {
                return Err(RepoError::not_found(
                    ROLE_RESOURCE,
                    format!("role {guid} not found"),
                ));
            }
            [binding] => binding,
            many => {
                tracing::error!(
                    guid,
                    count = many.len(),
                    "multiple role bindings share one role guid"
                );
                return Err(RepoError::DuplicateRecords {
                    resource: ROLE_RESOURCE,
                    identifier: guid.to_string(),
                });
            }
        };

        // A binding the caller cannot delete reads the same as a missing one.
        match client.delete(&binding.key()).await {
            Ok(()) => {}
            Err(StoreError::Forbidden(_) | StoreError::NotFound(_)) => {
                return Err(RepoError::not_found(
                    ROLE_RESOURCE,
                    format!("role {guid} not found"),
                ));
            }
            Err(err) => {
                return Err(RepoError::from_store(
                    err,
                    ROLE_RESOURCE,
                    "failed to delete role binding",
                ));
            }
        }
        tracing::info!(
            guid,
            scope = binding.scope(),
            identity = %client.identity(),
            "deleted role binding"
        );
        Ok(())
    }

    async fn parent_org(&self, space_guid: &str) -> RepoResult<String> {
        let scope = self
            .clients
            .privileged()
            .get(&ObjectKey::new(ResourceKind::Scope, CLUSTER_SCOPE, space_guid))
            .await
            .for_resource(SPACE_RESOURCE, "failed to get space scope")?;
        let parent = match scope.spec {
            Spec::Scope(spec) => spec.parent,
            _ => None,
        };
        parent.ok_or_else(|| RepoError::from(ValidationError::MissingParent(space_guid.to_string())))
    }

    /// Undo a grant whose companion root binding could not be created, so a
    /// retry of the same grant is not rejected as a duplicate.
    async fn revoke_partial_grant(&self, grant: &Object) {
        match self.clients.privileged().delete(&grant.key()).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                tracing::warn!(
                    binding = %grant.key(),
                    "revoked role binding after root binding failure"
                );
            }
            Err(err) => {
                tracing::error!(
                    binding = %grant.key(),
                    error = %err,
                    "failed to revoke role binding after root binding failure"
                );
            }
        }
    }

    /// Root-scope baseline binding every role holder needs.
    async fn ensure_root_binding(&self, subject: &Identity) -> RepoResult<()> {
        let Some(config) = self.roles.get(ROLE_CF_USER) else {
            return Ok(());
        };
        let binding = binding_object(
            &self.root_namespace,
            fingerprint_name(ROLE_CF_USER, subject),
            &config.backend_role,
            subject,
        );
        match self.clients.privileged().create(binding).await {
            Ok(_) => {
                tracing::debug!(subject = %subject, "created root baseline binding");
                Ok(())
            }
            Err(StoreError::AlreadyExists(_)) => Ok(()),
            Err(err) => Err(RepoError::from_store(
                err,
                ROLE_RESOURCE,
                "failed to create root role binding",
            )),
        }
    }
}
