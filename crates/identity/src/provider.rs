//! External identity provider boundary and its HTTP implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// One user as the IdP sees it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdpUser {
    #[serde(rename = "id")]
    pub external_id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, rename = "lastName")]
    pub last_name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum IdpError {
    #[error("idp request failed: {0}")]
    Http(String),

    #[error("idp authentication failed: {0}")]
    Auth(String),

    #[error("idp response decoding failed: {0}")]
    Decode(String),
}

/// Read-only view of the IdP population.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn count_users(&self) -> Result<u64, IdpError>;

    /// One page, stable ordering, `offset`-based.
    async fn list_users(&self, offset: u64, limit: u64) -> Result<Vec<IdpUser>, IdpError>;

    async fn find_user(&self, external_id: &str) -> Result<Option<IdpUser>, IdpError>;
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Keycloak-style admin API client using client-credentials auth.
///
/// The service-account token is cached until shortly before expiry; a
/// refresh happens lazily on the next call.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: String,
    realm: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl HttpIdentityProvider {
    pub fn new(
        base_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, IdpError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IdpError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            realm: realm.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, IdpError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        debug!(realm = %self.realm, "refreshing idp service token");
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base_url, self.realm
        );
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IdpError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IdpError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdpError::Decode(e.to_string()))?;

        // Refresh a minute early so in-flight requests never race expiry.
        let lifetime = token.expires_in.max(90).saturating_sub(60);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(access_token)
    }

    fn admin_url(&self, path: &str) -> String {
        format!("{}/admin/realms/{}{}", self.base_url, self.realm, path)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self), err)]
    async fn count_users(&self) -> Result<u64, IdpError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.admin_url("/users/count"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdpError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IdpError::Http(format!(
                "count endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<u64>()
            .await
            .map_err(|e| IdpError::Decode(e.to_string()))
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self, offset: u64, limit: u64) -> Result<Vec<IdpUser>, IdpError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.admin_url("/users"))
            .query(&[("first", offset), ("max", limit)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdpError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IdpError::Http(format!(
                "list endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<Vec<IdpUser>>()
            .await
            .map_err(|e| IdpError::Decode(e.to_string()))
    }

    #[instrument(skip(self), err)]
    async fn find_user(&self, external_id: &str) -> Result<Option<IdpUser>, IdpError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.admin_url(&format!("/users/{external_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdpError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(IdpError::Http(format!(
                "user endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<IdpUser>()
            .await
            .map(Some)
            .map_err(|e| IdpError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idp_user_decodes_keycloak_shape() {
        let user: IdpUser = serde_json::from_value(serde_json::json!({
            "id": "8d4c9b1e",
            "username": "ada",
            "email": "ada@example.com",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "enabled": true,
            "unknown_field": 42
        }))
        .unwrap();

        assert_eq!(user.external_id, "8d4c9b1e");
        assert_eq!(user.first_name.as_deref(), Some("Ada"));
        assert!(user.enabled);
    }

    #[test]
    fn enabled_defaults_to_true_when_absent() {
        let user: IdpUser = serde_json::from_value(serde_json::json!({
            "id": "x",
            "username": "ghost"
        }))
        .unwrap();
        assert!(user.enabled);
        assert_eq!(user.email, None);
    }
}
