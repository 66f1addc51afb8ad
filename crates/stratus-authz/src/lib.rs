//! Stratus identity and role primitives shared by repository services.
//!
//! # Purpose
//! Centralizes the caller identity model, deterministic role-binding naming,
//! the role configuration table, and the Casbin model used by backends that
//! evaluate scope-level access.
//!
//! # How it fits
//! Repository services scope every backend client to an [`Identity`], name
//! role bindings with [`fingerprint_name`], and validate role types against a
//! [`RoleTable`].
//!
//! # Key invariants
//! - Service-account subjects are addressed as
//!   `system:serviceaccount:<home-scope>:<name>` everywhere.
//! - Binding names depend only on the role type and subject.
//!
//! # Examples
//! ```rust
//! use stratus_authz::{Identity, RoleTable, fingerprint_name};
//!
//! let roles = RoleTable::defaults();
//! assert!(roles.get("space_developer").is_some());
//! let name = fingerprint_name("space_developer", &Identity::user("alice"));
//! assert!(name.starts_with("cf-"));
//! ```
//!
//! # Common pitfalls
//! - Hashing the bare service-account name instead of the composite subject
//!   makes bindings for same-named accounts in different scopes collide.

mod casbin_model;
mod errors;
mod fingerprint;
mod roles;
mod types;

pub use casbin_model::{POLICY_WILDCARD, casbin_model, casbin_model_string};
pub use errors::{AuthzError, AuthzResult};
pub use fingerprint::{BINDING_NAME_PREFIX, fingerprint_name};
pub use roles::{
    ROLE_ADMIN, ROLE_CF_USER, ROLE_ORGANIZATION_AUDITOR, ROLE_ORGANIZATION_BILLING_MANAGER,
    ROLE_ORGANIZATION_MANAGER, ROLE_ORGANIZATION_USER, ROLE_SPACE_AUDITOR, ROLE_SPACE_DEVELOPER,
    ROLE_SPACE_MANAGER, ROLE_SPACE_SUPPORTER, RoleConfig, RoleLevel, RoleTable,
};
pub use types::{Identity, SubjectKind};
