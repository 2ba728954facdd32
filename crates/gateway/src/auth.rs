//! Bearer authentication for the `/v1` API.
//!
//! Tokens are resolved to user ids through the identity collaborator:
//! the static token table from config first, then the remote verifier
//! when `auth.verify_url` is set.

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use conclave_config::AuthConfig;
use conclave_core::error::AuthError;
use conclave_core::identity::{IdentityVerifier, StaticTokens, bearer_token};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::SharedState;
use crate::error::ApiError;

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

/// Asks a remote identity service who owns a token.
///
/// Sends `GET <verify_url>` with the bearer token and expects `{"id": ...}`.
pub struct RemoteVerifier {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct RemoteUser {
    id: String,
}

impl RemoteVerifier {
    pub fn new(url: impl Into<String>) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for RemoteVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidToken);
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(format!(
                "identity service returned {status}"
            )));
        }

        let user: RemoteUser = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("malformed identity response: {e}")))?;
        if user.id.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(user.id)
    }
}

/// Static tokens, then the remote service.
pub struct VerifierChain {
    static_tokens: StaticTokens,
    remote: Option<RemoteVerifier>,
}

impl VerifierChain {
    pub fn new(static_tokens: StaticTokens, remote: Option<RemoteVerifier>) -> Self {
        Self {
            static_tokens,
            remote,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let remote = config
            .verify_url
            .as_deref()
            .map(RemoteVerifier::new)
            .transpose()?;
        let static_tokens = StaticTokens::new(config.static_tokens.clone());
        if static_tokens.is_empty() && remote.is_none() {
            warn!("No auth.static_tokens or auth.verify_url configured; every /v1 request will be rejected");
        }
        Ok(Self::new(static_tokens, remote))
    }
}

#[async_trait]
impl IdentityVerifier for VerifierChain {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        match self.static_tokens.verify(token).await {
            Ok(user) => Ok(user),
            Err(e) => match &self.remote {
                Some(remote) => remote.verify(token).await,
                None => Err(e),
            },
        }
    }
}

/// Rejects requests without a resolvable bearer token.
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let verified = match bearer_token(header) {
        Ok(token) => state.identity.verify(token).await,
        Err(e) => Err(e),
    };

    match verified {
        Ok(user_id) => {
            debug!(user_id = %user_id, path = %req.uri().path(), "Authenticated request");
            req.extensions_mut().insert(AuthUser(user_id));
            next.run(req).await
        }
        Err(e) => {
            warn!(path = %req.uri().path(), error = %e, "Rejected unauthenticated request");
            ApiError::from(e).into_response()
        }
    }
}
