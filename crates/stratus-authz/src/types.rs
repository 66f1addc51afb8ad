//! Subject identities used for client scoping and role-binding subjects.
//!
//! # Purpose
//! Models the calling identity (a user or a service account) exactly once so
//! the same value can scope a backend client, match role-binding subjects, and
//! feed binding-name fingerprints.
//!
//! # Key invariants
//! - A service account always carries its home scope; its subject name is the
//!   composite `system:serviceaccount:<home-scope>:<name>`.
//! - A user subject name is the raw user name.
//!
//! # Examples
//! ```rust
//! use stratus_authz::Identity;
//!
//! let sa = Identity::service_account("payments", "deployer");
//! assert_eq!(sa.subject_name(), "system:serviceaccount:payments:deployer");
//! ```
use crate::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Kind of subject an identity (or a role-binding subject) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    ServiceAccount,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::ServiceAccount => "ServiceAccount",
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller identity, immutable for the lifetime of a request.
///
/// # Invariants
/// - `home_scope` is `Some` for service accounts and `None` for users.
///
/// # Example
/// ```rust
/// use stratus_authz::{Identity, SubjectKind};
///
/// let user = Identity::user("alice@example.com");
/// assert_eq!(user.kind(), SubjectKind::User);
/// assert_eq!(user.subject_name(), "alice@example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    kind: SubjectKind,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    home_scope: Option<String>,
}

impl Identity {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.into(),
            home_scope: None,
        }
    }

    pub fn service_account(home_scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::ServiceAccount,
            name: name.into(),
            home_scope: Some(home_scope.into()),
        }
    }

    /// Rebuild an identity from a subject kind and its subject name.
    ///
    /// Service-account subjects must use the composite
    /// `system:serviceaccount:<home-scope>:<name>` form.
    pub fn from_subject(kind: SubjectKind, subject_name: &str) -> AuthzResult<Self> {
        let identity = match kind {
            SubjectKind::User => Self::user(subject_name),
            SubjectKind::ServiceAccount => {
                let rest = subject_name
                    .strip_prefix(SERVICE_ACCOUNT_PREFIX)
                    .ok_or_else(|| AuthzError::InvalidIdentity(subject_name.to_string()))?;
                let (home_scope, name) = rest
                    .split_once(':')
                    .ok_or_else(|| AuthzError::InvalidIdentity(subject_name.to_string()))?;
                Self::service_account(home_scope, name)
            }
        };
        identity.validate()?;
        Ok(identity)
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn home_scope(&self) -> Option<&str> {
        self.home_scope.as_deref()
    }

    /// Name under which the backend addresses this identity in binding subjects.
    pub fn subject_name(&self) -> String {
        match (&self.kind, &self.home_scope) {
            (SubjectKind::ServiceAccount, Some(home)) => {
                format!("{SERVICE_ACCOUNT_PREFIX}{home}:{}", self.name)
            }
            _ => self.name.clone(),
        }
    }

    /// Reject identities that cannot be addressed as a binding subject.
    pub fn validate(&self) -> AuthzResult<()> {
        if self.name.trim().is_empty() || self.name.contains(':') {
            return Err(AuthzError::InvalidIdentity(self.name.clone()));
        }
        match (&self.kind, &self.home_scope) {
            (SubjectKind::User, None) => Ok(()),
            (SubjectKind::ServiceAccount, Some(home)) if !home.trim().is_empty() => Ok(()),
            _ => Err(AuthzError::InvalidIdentity(self.subject_name())),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.subject_name())
    }
}
