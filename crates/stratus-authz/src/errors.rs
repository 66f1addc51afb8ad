use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid role type: {0}")]
    InvalidRoleType(String),
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("role {role_type} is configured for {expected} level, not {actual}")]
    RoleLevelMismatch {
        role_type: String,
        expected: String,
        actual: String,
    },
}

pub type AuthzResult<T> = Result<T, AuthzError>;
