//! Stored OAuth token handling for the calendar gateway.
//!
//! The token file uses Google's "authorized user" JSON layout, so a file
//! written by any of the official client libraries can be reused as is.
//! Only the refresh-token grant is implemented; first-time consent happens
//! outside this crate.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{AgendaError, Result};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are refreshed up front.
const EXPIRY_SKEW_SECS: i64 = 60;

/// A usable bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at - Duration::seconds(EXPIRY_SKEW_SECS) <= now)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredToken {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    /// Fields we do not interpret (scopes, universe_domain, ...), written back untouched.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// File-backed credential store.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    token_path: PathBuf,
    http: reqwest::Client,
}

impl CredentialStore {
    pub fn new(token_path: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            token_path: token_path.into(),
            http,
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Return a valid access token, refreshing and persisting it when the
    /// stored one has expired.
    pub async fn obtain_or_refresh(&self) -> Result<Credentials> {
        let mut stored = self.load().await?;
        let now = Utc::now();

        if let Some(token) = stored.token.clone() {
            let current = Credentials {
                access_token: token,
                expires_at: stored.expiry,
            };
            if !current.is_expired(now) {
                return Ok(current);
            }
        }

        let (Some(refresh_token), Some(client_id)) =
            (stored.refresh_token.clone(), stored.client_id.clone())
        else {
            return Err(AgendaError::Authentication {
                reason: format!(
                    "token at {} is expired and cannot be refreshed; re-run the authorization flow",
                    self.token_path.display()
                ),
            });
        };

        info!(token_uri = %stored.token_uri, "refreshing calendar access token");
        let refreshed = self
            .refresh(&stored.token_uri, &client_id, stored.client_secret.as_deref(), &refresh_token)
            .await?;

        let expires_at = refreshed.expires_in.map(|secs| now + Duration::seconds(secs));
        stored.token = Some(refreshed.access_token.clone());
        stored.expiry = expires_at;
        if let Err(e) = self.save(&stored).await {
            // The fresh token is still usable for this process.
            warn!(error = %e, "could not persist refreshed token");
        }

        Ok(Credentials {
            access_token: refreshed.access_token,
            expires_at,
        })
    }

    async fn load(&self) -> Result<StoredToken> {
        let raw = tokio::fs::read_to_string(&self.token_path).await.map_err(|e| {
            AgendaError::Authentication {
                reason: format!("cannot read token file {}: {e}", self.token_path.display()),
            }
        })?;
        serde_json::from_str(&raw).map_err(|e| AgendaError::Authentication {
            reason: format!("malformed token file {}: {e}", self.token_path.display()),
        })
    }

    async fn save(&self, stored: &StoredToken) -> Result<()> {
        let body = serde_json::to_string_pretty(stored)?;
        tokio::fs::write(&self.token_path, body)
            .await
            .map_err(|e| AgendaError::Io {
                path: self.token_path.clone(),
                source: e,
            })
    }

    async fn refresh(
        &self,
        token_uri: &str,
        client_id: &str,
        client_secret: Option<&str>,
        refresh_token: &str,
    ) -> Result<RefreshResponse> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| AgendaError::Authentication {
                reason: format!("token refresh request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgendaError::Authentication {
                reason: format!("token refresh rejected ({status}): {}", snippet(&body)),
            });
        }

        response.json().await.map_err(|e| AgendaError::Authentication {
            reason: format!("unreadable token refresh response: {e}"),
        })
    }
}

/// First 512 characters of a response body.
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(512).collect()
}
