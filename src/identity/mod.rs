//! Actor identity for RPC requests and live connections.
//!
//! Credential issuance (password hashing, token minting) lives outside the
//! daemon entirely. The daemon only verifies opaque bearer tokens through
//! [`IdentityProvider`] and carries the resulting [`ActorId`] into every
//! authorization decision. Identity is asserted once per request/connection
//! and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Opaque id of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors from identity resolution.
///
/// Both variants are fatal to the request — the transport maps them to the
/// `UNAUTHENTICATED` RPC code and does not retry.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication required")]
    MissingCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
}

/// Token-to-actor resolution — the `currentActor()` contract consumed from
/// the authentication collaborator.
///
/// Implemented by [`crate::storage::Storage`] against a hashed-token table;
/// tests use in-memory providers.
#[allow(async_fn_in_trait)]
pub trait IdentityProvider {
    async fn verify(&self, token: &str) -> Result<ActorId, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedTokens(HashMap<String, ActorId>);

    impl IdentityProvider for FixedTokens {
        async fn verify(&self, token: &str) -> Result<ActorId, AuthError> {
            if token.is_empty() {
                return Err(AuthError::MissingCredentials);
            }
            self.0.get(token).cloned().ok_or(AuthError::InvalidToken)
        }
    }

    #[tokio::test]
    async fn known_token_resolves_actor() {
        let provider = FixedTokens(HashMap::from([(
            "tok-1".to_string(),
            ActorId::from("alice"),
        )]));
        let actor = provider.verify("tok-1").await.unwrap();
        assert_eq!(actor, ActorId::from("alice"));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let provider = FixedTokens(HashMap::new());
        assert!(matches!(
            provider.verify("nope").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn empty_token_is_missing_credentials() {
        let provider = FixedTokens(HashMap::new());
        assert!(matches!(
            provider.verify("").await,
            Err(AuthError::MissingCredentials)
        ));
    }
}
