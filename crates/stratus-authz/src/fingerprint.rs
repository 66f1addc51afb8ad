//! Deterministic names for role bindings.
//!
//! # Purpose
//! Derives the backend object name of a role binding from its semantic key so
//! that repeated or concurrent creation of the same logical grant collides on
//! the backend's own "already exists" check.
//!
//! # Key invariants
//! - The output is a pure function of `(role_type, subject)`; the target scope
//!   is not part of the name because names only need to be unique per scope.
//! - Output is `cf-` followed by 64 lowercase hex characters, which is a valid
//!   object name for every backend scope.
use crate::Identity;
use sha2::{Digest, Sha256};

pub const BINDING_NAME_PREFIX: &str = "cf";

/// Compute the binding name for `role_type` granted to `subject`.
///
/// # Example
/// ```rust
/// use stratus_authz::{Identity, fingerprint_name};
///
/// let a = fingerprint_name("space_developer", &Identity::user("alice"));
/// let b = fingerprint_name("space_developer", &Identity::user("alice"));
/// assert_eq!(a, b);
/// assert!(a.starts_with("cf-"));
/// ```
pub fn fingerprint_name(role_type: &str, subject: &Identity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(role_type.as_bytes());
    hasher.update(b"::");
    hasher.update(subject.subject_name().as_bytes());
    format!("{BINDING_NAME_PREFIX}-{}", hex::encode(hasher.finalize()))
}
