//! Repository error taxonomy.
//!
//! # Purpose and responsibility
//! Defines the single error type returned by repositories and the mapping
//! from backend store errors into it.
//!
//! # Key invariants and assumptions
//! - Backend `Forbidden`, `NotFound` and `AlreadyExists` keep their category;
//!   everything else is wrapped as `Backend` with the failing operation.
//! - The only swallowed error in the crate is per-scope `Forbidden` during
//!   fan-out listing; it never reaches this type.
//!
//! # Security considerations
//! - Get-by-GUID operations convert `Forbidden` into `NotFound` through
//!   [`RepoError::hide_forbidden`] so hidden records read the same as missing ones.
use crate::store::StoreError;
use std::time::Duration;
use stratus_authz::AuthzError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid role type: {0}")]
    InvalidRoleType(String),
    #[error("user already has {role_type} role")]
    DuplicateRoleBinding { role_type: String },
    #[error("no {role_type} role can be given to {subject} unless they have a role in the parent organization")]
    MissingRoleInParentOrg { role_type: String, subject: String },
    #[error("space {0} does not have a parent")]
    MissingParent(String),
    #[error("unable to remove destination: destination {0} does not exist for route")]
    DestinationNotFound(String),
    #[error("unsupported field for ordering: {0:?}")]
    UnsupportedOrdering(String),
    #[error("role {role_type} cannot be granted at {level} level")]
    RoleLevelMismatch { role_type: String, level: String },
    #[error("expected app-rev to be an integer, got {0:?}")]
    InvalidAppRevision(String),
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("invalid auth info")]
    InvalidAuth,
    #[error("forbidden: {resource}")]
    Forbidden { resource: &'static str },
    #[error("{resource} not found: {message}")]
    NotFound {
        resource: &'static str,
        message: String,
    },
    #[error("{resource} already exists")]
    AlreadyExists { resource: &'static str },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{resource} is not ready: {message}")]
    NotReady {
        resource: &'static str,
        message: String,
    },
    #[error("{resource} did not become ready within {}ms", .timeout.as_millis())]
    Timeout {
        resource: &'static str,
        timeout: Duration,
    },
    #[error("duplicate {resource} records exist for {identifier}")]
    DuplicateRecords {
        resource: &'static str,
        identifier: String,
    },
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: StoreError,
    },
}

pub type RepoResult<T> = Result<T, RepoError>;

impl RepoError {
    pub fn not_found(resource: &'static str, message: impl Into<String>) -> Self {
        RepoError::NotFound {
            resource,
            message: message.into(),
        }
    }

    /// Map a store error for `resource`, attaching `context` to backend failures.
    pub fn from_store(err: StoreError, resource: &'static str, context: impl Into<String>) -> Self {
        match err {
            StoreError::Forbidden(_) => RepoError::Forbidden { resource },
            StoreError::NotFound(message) => RepoError::NotFound { resource, message },
            StoreError::AlreadyExists(_) => RepoError::AlreadyExists { resource },
            other => RepoError::Backend {
                context: context.into(),
                source: other,
            },
        }
    }

    /// Turn `Forbidden` into `NotFound` for lookups by identifier.
    pub fn hide_forbidden(self) -> Self {
        match self {
            RepoError::Forbidden { resource } => RepoError::NotFound {
                resource,
                message: "not found or not authorized".to_string(),
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, RepoError::Forbidden { .. })
    }
}

impl From<AuthzError> for RepoError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::InvalidRoleType(role_type) => {
                ValidationError::InvalidRoleType(role_type).into()
            }
            AuthzError::InvalidIdentity(identity) => {
                ValidationError::InvalidIdentity(identity).into()
            }
            AuthzError::RoleLevelMismatch {
                role_type, actual, ..
            } => ValidationError::RoleLevelMismatch {
                role_type,
                level: actual,
            }
            .into(),
        }
    }
}

/// Attach a resource name and operation context to store results.
pub trait StoreResultExt<T> {
    fn for_resource(self, resource: &'static str, context: &str) -> RepoResult<T>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn for_resource(self, resource: &'static str, context: &str) -> RepoResult<T> {
        self.map_err(|err| RepoError::from_store(err, resource, context))
    }
}

/// Outcome of a failed condition wait.
#[derive(Debug, Error)]
pub enum AwaitError {
    #[error("condition not reached within {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },
    #[error("{reason}: {message}")]
    ConditionFailed { reason: String, message: String },
    #[error("watch stream closed before the condition was reached")]
    StreamClosed,
    #[error("watch stream failed: {0}")]
    Stream(#[source] StoreError),
}

impl AwaitError {
    /// Map to a repository error for `resource`.
    pub fn into_repo_error(self, resource: &'static str) -> RepoError {
        match self {
            AwaitError::Timeout { timeout } => RepoError::Timeout { resource, timeout },
            AwaitError::ConditionFailed { reason, message } => RepoError::NotReady {
                resource,
                message: format_reason(&reason, &message),
            },
            AwaitError::StreamClosed => RepoError::Backend {
                context: format!("awaiting {resource}"),
                source: StoreError::Unexpected(anyhow::anyhow!(
                    "watch stream closed before the condition was reached"
                )),
            },
            AwaitError::Stream(err) => RepoError::from_store(err, resource, format!("awaiting {resource}")),
        }
    }
}

pub(crate) fn format_reason(reason: &str, message: &str) -> String {
    match (reason.is_empty(), message.is_empty()) {
        (true, _) => message.to_string(),
        (false, true) => reason.to_string(),
        (false, false) => format!("{reason}: {message}"),
    }
}
