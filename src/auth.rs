//! Bearer-token authentication.
//!
//! Handlers take a [`CurrentUser`] argument; the extractor reads
//! `Authorization: Bearer <token>` and asks the configured [`AuthProvider`]
//! who the token belongs to. Missing, malformed, or unknown tokens are
//! rejected with 401 before the handler runs.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve a token. `Ok(None)` means the token is not valid.
    async fn current_user(&self, token: &str) -> Result<Option<CurrentUser>>;
}

/// Fixed token → user id table from `[auth.tokens]`.
pub struct StaticAuthProvider {
    tokens: HashMap<String, String>,
}

impl StaticAuthProvider {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn current_user(&self, token: &str) -> Result<Option<CurrentUser>> {
        Ok(self.tokens.get(token).map(|id| CurrentUser {
            id: id.clone(),
            email: None,
        }))
    }
}

/// Asks a hosted auth service who owns the token (`GET {url}`).
pub struct RemoteAuthProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl RemoteAuthProvider {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .context("auth.url must be set for the remote auth provider")?;
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build auth HTTP client")?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl AuthProvider for RemoteAuthProvider {
    async fn current_user(&self, token: &str) -> Result<Option<CurrentUser>> {
        let mut request = self.client.get(&self.url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        let response = request.send().await.context("auth request failed")?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            s if s.is_success() => {
                let user: CurrentUser = response.json().await.context("invalid auth response")?;
                Ok(Some(user))
            }
            s => bail!("auth provider returned {}", s),
        }
    }
}

pub fn create_auth_provider(config: &AuthConfig) -> Result<Arc<dyn AuthProvider>> {
    match config.provider.as_str() {
        "static" => Ok(Arc::new(StaticAuthProvider::new(config.tokens.clone()))),
        "remote" => Ok(Arc::new(RemoteAuthProvider::new(config)?)),
        other => bail!("Unknown auth provider: {}", other),
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(parts).ok_or_else(ApiError::unauthorized)?;
        match state.auth.current_user(token).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(ApiError::unauthorized()),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "auth provider failed");
                Err(ApiError::unauthorized())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(h) = header {
            builder = builder.header(AUTHORIZATION, h);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticAuthProvider::new(HashMap::from([(
            "tok".to_string(),
            "user-1".to_string(),
        )]));
        let user = provider.current_user("tok").await.unwrap().unwrap();
        assert_eq!(user.id, "user-1");
        assert!(provider.current_user("other").await.unwrap().is_none());
    }
}
