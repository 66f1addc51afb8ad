//! Role configuration table.
//!
//! # Purpose
//! Maps API role types (`space_developer`, `organization_manager`, ...) to the
//! backend role they bind, the level at which they may be granted, and whether
//! an org-level grant cascades into the org's spaces.
//!
//! # Key invariants
//! - Role type names are unique keys; backend role names are expected to be
//!   unique as well so that reverse lookup is unambiguous.
//! - The table is read-only once handed to a repository.
//!
//! # Notes
//! The table deserializes from a plain YAML/JSON map so deployments can
//! override it without code changes:
//!
//! ```yaml
//! space_developer:
//!   backend_role: stratus-space-developer
//!   level: space
//! organization_manager:
//!   backend_role: stratus-organization-manager
//!   level: org
//!   propagate: true
//! ```
use crate::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_CF_USER: &str = "cf_user";
pub const ROLE_ORGANIZATION_MANAGER: &str = "organization_manager";
pub const ROLE_ORGANIZATION_USER: &str = "organization_user";
pub const ROLE_ORGANIZATION_AUDITOR: &str = "organization_auditor";
pub const ROLE_ORGANIZATION_BILLING_MANAGER: &str = "organization_billing_manager";
pub const ROLE_SPACE_DEVELOPER: &str = "space_developer";
pub const ROLE_SPACE_MANAGER: &str = "space_manager";
pub const ROLE_SPACE_AUDITOR: &str = "space_auditor";
pub const ROLE_SPACE_SUPPORTER: &str = "space_supporter";

/// Level of the scope hierarchy a role is granted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleLevel {
    Root,
    Org,
    Space,
}

impl RoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleLevel::Root => "root",
            RoleLevel::Org => "org",
            RoleLevel::Space => "space",
        }
    }
}

impl std::fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub backend_role: String,
    pub level: RoleLevel,
    #[serde(default)]
    pub propagate: bool,
}

impl RoleConfig {
    pub fn new(backend_role: impl Into<String>, level: RoleLevel, propagate: bool) -> Self {
        Self {
            backend_role: backend_role.into(),
            level,
            propagate,
        }
    }
}

/// Lookup table from role type to [`RoleConfig`].
///
/// # Example
/// ```rust
/// use stratus_authz::{RoleLevel, RoleTable};
///
/// let roles = RoleTable::defaults();
/// let developer = roles.require("space_developer").unwrap();
/// assert_eq!(developer.level, RoleLevel::Space);
/// assert_eq!(
///     roles.role_type_for(&developer.backend_role),
///     Some("space_developer")
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleTable {
    roles: BTreeMap<String, RoleConfig>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in role set used when no override is configured.
    pub fn defaults() -> Self {
        let entries = [
            (ROLE_ADMIN, RoleLevel::Root, true),
            (ROLE_CF_USER, RoleLevel::Root, false),
            (ROLE_ORGANIZATION_MANAGER, RoleLevel::Org, true),
            (ROLE_ORGANIZATION_USER, RoleLevel::Org, false),
            (ROLE_ORGANIZATION_AUDITOR, RoleLevel::Org, false),
            (ROLE_ORGANIZATION_BILLING_MANAGER, RoleLevel::Org, false),
            (ROLE_SPACE_DEVELOPER, RoleLevel::Space, false),
            (ROLE_SPACE_MANAGER, RoleLevel::Space, false),
            (ROLE_SPACE_AUDITOR, RoleLevel::Space, false),
            (ROLE_SPACE_SUPPORTER, RoleLevel::Space, false),
        ];
        let mut table = Self::new();
        for (role_type, level, propagate) in entries {
            let backend_role = format!("stratus-{}", role_type.replace('_', "-"));
            table.insert(role_type, RoleConfig::new(backend_role, level, propagate));
        }
        table
    }

    pub fn insert(&mut self, role_type: impl Into<String>, config: RoleConfig) {
        self.roles.insert(role_type.into(), config);
    }

    pub fn get(&self, role_type: &str) -> Option<&RoleConfig> {
        self.roles.get(role_type)
    }

    /// Look up a role type, failing with [`AuthzError::InvalidRoleType`].
    pub fn require(&self, role_type: &str) -> AuthzResult<&RoleConfig> {
        self.get(role_type)
            .ok_or_else(|| AuthzError::InvalidRoleType(role_type.to_string()))
    }

    /// Look up a role type and check it may be granted at `level`.
    pub fn require_at(&self, role_type: &str, level: RoleLevel) -> AuthzResult<&RoleConfig> {
        let config = self.require(role_type)?;
        if config.level != level {
            return Err(AuthzError::RoleLevelMismatch {
                role_type: role_type.to_string(),
                expected: config.level.to_string(),
                actual: level.to_string(),
            });
        }
        Ok(config)
    }

    /// Reverse lookup from a backend role name to the role type that binds it.
    pub fn role_type_for(&self, backend_role: &str) -> Option<&str> {
        self.roles
            .iter()
            .find(|(_, config)| config.backend_role == backend_role)
            .map(|(role_type, _)| role_type.as_str())
    }

    pub fn is_recognized_backend_role(&self, backend_role: &str) -> bool {
        self.role_type_for(backend_role).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RoleConfig)> {
        self.roles
            .iter()
            .map(|(role_type, config)| (role_type.as_str(), config))
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
