//! Identity verification — bearer token to user id.
//!
//! Authentication screens and session issuance live elsewhere; the
//! orchestrator only asks "whose token is this?".

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::AuthError;

/// The identity collaborator.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve a bearer token to a user id.
    async fn verify(&self, token: &str) -> std::result::Result<String, AuthError>;
}

/// Fixed token table, for development and tests.
#[derive(Default, Clone)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl std::fmt::Debug for StaticTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokens")
            .field("tokens", &format!("[{} redacted]", self.tokens.len()))
            .finish()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokens {
    async fn verify(&self, token: &str) -> std::result::Result<String, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> std::result::Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(AuthError::MissingToken)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_tokens_resolve_known_token() {
        let verifier = StaticTokens::default().with_token("tok-1", "user-1");
        assert_eq!(verifier.verify("tok-1").await.unwrap(), "user-1");
        assert!(matches!(
            verifier.verify("nope").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert!(matches!(bearer_token(None), Err(AuthError::MissingToken)));
        assert!(matches!(
            bearer_token(Some("Basic abc")),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(bearer_token(Some("Bearer  ")), Err(AuthError::MissingToken)));
    }

    #[test]
    fn debug_redacts_tokens() {
        let verifier = StaticTokens::default().with_token("secret-token", "u");
        assert!(!format!("{verifier:?}").contains("secret-token"));
    }
}
