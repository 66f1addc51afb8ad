//! Identity-scoped client construction.
//!
//! # Purpose
//! Turns caller credentials into a backend client that acts as the caller,
//! so the backend's own access control decides every read and write.
//!
//! # Security considerations
//! - Clients are never shared between identities; each call to
//!   [`ClientFactory::build_client`] resolves the token again.
//! - The privileged client is reserved for cross-scope lookups (global
//!   locate, permission index, role-binding lookup) and the root-scope
//!   companion binding; it never performs a caller's write.
use crate::errors::{RepoError, RepoResult};
use crate::store::{Backend, ObjectClient};
use std::sync::Arc;
use stratus_authz::Identity;

/// Caller credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub token: String,
}

impl AuthInfo {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[derive(Clone)]
pub struct ClientFactory {
    backend: Arc<dyn Backend>,
    privileged_identity: Identity,
}

impl ClientFactory {
    pub fn new(backend: Arc<dyn Backend>, privileged_identity: Identity) -> Self {
        Self {
            backend,
            privileged_identity,
        }
    }

    /// Resolve the caller's identity from its credentials.
    ///
    /// # Errors
    /// - [`RepoError::InvalidAuth`] for empty or unknown tokens.
    /// - [`RepoError::Backend`] when the token review itself fails.
    pub async fn authenticate(&self, auth: &AuthInfo) -> RepoResult<Identity> {
        if auth.token.trim().is_empty() {
            return Err(RepoError::InvalidAuth);
        }
        let identity = self
            .backend
            .review_token(&auth.token)
            .await
            .map_err(|source| RepoError::Backend {
                context: "failed to review token".to_string(),
                source,
            })?
            .ok_or(RepoError::InvalidAuth)?;
        identity.validate()?;
        Ok(identity)
    }

    /// Build a client that performs every operation as the caller.
    pub async fn build_client(&self, auth: &AuthInfo) -> RepoResult<Arc<dyn ObjectClient>> {
        let identity = self.authenticate(auth).await?;
        tracing::debug!(identity = %identity, "built user client");
        Ok(self.backend.client_for(&identity))
    }

    pub fn privileged(&self) -> Arc<dyn ObjectClient> {
        self.backend.client_for(&self.privileged_identity)
    }

    pub fn privileged_identity(&self) -> &Identity {
        &self.privileged_identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryBackend;
    use stratus_authz::RoleTable;

    async fn factory() -> ClientFactory {
        let backend = InMemoryBackend::new(&RoleTable::defaults());
        backend
            .register_token("alice-token", Identity::user("alice"))
            .await;
        ClientFactory::new(Arc::new(backend), Identity::service_account("cf", "api"))
    }

    #[tokio::test]
    async fn build_client_binds_the_token_identity() {
        let factory = factory().await;
        let client = factory
            .build_client(&AuthInfo::bearer("alice-token"))
            .await
            .expect("client");
        assert_eq!(client.identity(), &Identity::user("alice"));
    }

    #[tokio::test]
    async fn unknown_or_empty_tokens_are_invalid_auth() {
        let factory = factory().await;
        let unknown = factory
            .build_client(&AuthInfo::bearer("nope"))
            .await
            .err()
            .expect("unknown token");
        let empty = factory
            .build_client(&AuthInfo::bearer("  "))
            .await
            .err()
            .expect("empty token");
        assert!(matches!(unknown, RepoError::InvalidAuth));
        assert!(matches!(empty, RepoError::InvalidAuth));
    }

    #[tokio::test]
    async fn privileged_client_uses_service_identity() {
        let factory = factory().await;
        assert_eq!(
            factory.privileged().identity(),
            &Identity::service_account("cf", "api")
        );
    }
}
