//! OAuth token manager with on-disk persistence and automatic refresh.
//!
//! Client secrets come from Google's "installed application" JSON. The
//! resulting tokens are stored next to them and refreshed shortly before
//! they expire.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::gdrive::AccessTokenSource;
use crate::oauth::{authorization_url, LoopbackReceiver};

pub const CLIENT_SECRET_FILE: &str = "client_secret.json";
pub const TOKEN_FILE: &str = "drive_token.json";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// How long the user has to complete the browser consent.
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// OAuth client registration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientConfig>,
    web: Option<ClientConfig>,
}

impl ClientConfig {
    /// Parse a client secrets file as downloaded from the Google Cloud console.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let file: ClientSecretsFile =
            serde_json::from_str(json).context("malformed client secrets")?;
        file.installed
            .or(file.web)
            .ok_or_else(|| anyhow::anyhow!("client secrets contain neither 'installed' nor 'web'"))
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let json = tokio::fs::read_to_string(path).await.with_context(|| {
            format!(
                "cannot read client secrets at {} (run `gdrive-backup install <FILE>` first)",
                path.display()
            )
        })?;
        Self::from_json(&json)
    }
}

/// Token state persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub scope: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() >= exp - chrono::Duration::minutes(5),
            None => true,
        }
    }
}

/// Why no access token could be produced.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// There is no usable grant; only a new consent can fix it.
    #[error("{0}")]
    NeedsAuthorization(String),

    /// Anything else, such as an unreachable or failing token endpoint.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

/// Manages the access token for one scope, refreshing when necessary.
pub struct TokenManager {
    http: reqwest::Client,
    client: ClientConfig,
    scope: String,
    token_path: PathBuf,
    cache: Mutex<Option<StoredToken>>,
}

impl TokenManager {
    /// # Arguments
    /// * `scope` - Full OAuth scope URL the token must carry
    /// * `token_path` - File the token is persisted to
    pub fn new(client: ClientConfig, scope: impl Into<String>, token_path: PathBuf) -> Self {
        Self {
            http: reqwest::Client::new(),
            client,
            scope: scope.into(),
            token_path,
            cache: Mutex::new(None),
        }
    }

    /// Make sure a usable token exists, running the browser consent flow if not.
    ///
    /// Consent is only requested when the grant itself is missing or rejected.
    /// Other failures are returned as they are.
    pub async fn ensure_authorized(&self) -> anyhow::Result<()> {
        match self.valid_token().await {
            Ok(_) => Ok(()),
            Err(TokenError::NeedsAuthorization(reason)) => {
                warn!("No usable stored token ({}), starting authorization", reason);
                self.authorize().await
            }
            Err(TokenError::Other(e)) => Err(e.context("cannot obtain an access token")),
        }
    }

    /// Get a valid access token, refreshing it if necessary.
    pub async fn get_valid_token(&self) -> anyhow::Result<String> {
        Ok(self.valid_token().await?)
    }

    async fn valid_token(&self) -> Result<String, TokenError> {
        let mut cache = self.cache.lock().await;

        if cache.is_none() {
            *cache = self.load_stored().await?;
        }

        let stored = cache.clone().ok_or_else(|| {
            TokenError::NeedsAuthorization(format!(
                "no token stored at {}",
                self.token_path.display()
            ))
        })?;

        if !stored.is_expired() {
            debug!("Token cache hit");
            return Ok(stored.access_token);
        }

        let refresh_token = stored
            .refresh_token
            .as_deref()
            .ok_or_else(|| {
                TokenError::NeedsAuthorization(
                    "stored token has expired and has no refresh token".to_string(),
                )
            })?;

        info!("Refreshing OAuth token");
        let refreshed = self.refresh_token(refresh_token).await?;
        self.persist(&refreshed).await?;
        let access_token = refreshed.access_token.clone();
        *cache = Some(refreshed);
        Ok(access_token)
    }

    /// Read the stored token, ignoring it when it was issued for another scope.
    async fn load_stored(&self) -> anyhow::Result<Option<StoredToken>> {
        let json = match tokio::fs::read_to_string(&self.token_path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("cannot read token file {}", self.token_path.display())
                })
            }
        };

        let stored: StoredToken = match serde_json::from_str(&json) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    "Ignoring unreadable token file {}: {}",
                    self.token_path.display(),
                    e
                );
                return Ok(None);
            }
        };

        if stored.scope != self.scope {
            warn!(
                "Stored token was issued for scope {}, need {}",
                stored.scope, self.scope
            );
            return Ok(None);
        }
        Ok(Some(stored))
    }

    /// Refresh an OAuth token using the refresh_token grant.
    ///
    /// A 400 or 401 reply means the grant was revoked or expired.
    async fn refresh_token(&self, refresh_token: &str) -> Result<StoredToken, TokenError> {
        let resp = self
            .http
            .post(&self.client.token_uri)
            .form(&[
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("OAuth token endpoint unreachable")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = format!("OAuth token refresh failed: {} {}", status, body);
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                    TokenError::NeedsAuthorization(message)
                }
                _ => TokenError::Other(anyhow::anyhow!(message)),
            });
        }

        let token_resp: TokenResponse = resp.json().await.context("malformed token response")?;
        // Google may rotate the refresh token
        let refresh_token = token_resp
            .refresh_token
            .clone()
            .unwrap_or_else(|| refresh_token.to_string());
        Ok(self.stored_from(token_resp, Some(refresh_token)))
    }

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> anyhow::Result<StoredToken> {
        let resp = self
            .http
            .post(&self.client.token_uri)
            .form(&[
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OAuth code exchange failed: {} {}", status, body);
        }

        let token_resp: TokenResponse = resp.json().await?;
        let refresh_token = token_resp.refresh_token.clone();
        Ok(self.stored_from(token_resp, refresh_token))
    }

    fn stored_from(&self, resp: TokenResponse, refresh_token: Option<String>) -> StoredToken {
        let expires_at = Utc::now() + chrono::Duration::seconds(resp.expires_in as i64);
        info!("OAuth token expires at {}", expires_at.to_rfc3339());
        StoredToken {
            access_token: resp.access_token,
            refresh_token,
            scope: self.scope.clone(),
            expires_at: Some(expires_at),
        }
    }

    /// Run the interactive loopback consent flow and store the result.
    async fn authorize(&self) -> anyhow::Result<()> {
        let receiver = LoopbackReceiver::bind().await?;
        let redirect_uri = receiver.redirect_uri().to_string();
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = authorization_url(&self.client, &self.scope, &redirect_uri, &state)?;

        eprintln!("\nOpen the following URL in a browser to authorize access:\n\n    {}\n", url);
        info!("Waiting for authorization on {}", redirect_uri);

        let code = receiver.wait_for_code(&state, AUTHORIZATION_TIMEOUT).await?;
        let token = self.exchange_code(&code, &redirect_uri).await?;
        if token.refresh_token.is_none() {
            warn!("Authorization returned no refresh token; you will be asked again once it expires");
        }

        self.persist(&token).await?;
        *self.cache.lock().await = Some(token);
        info!("Authorization complete, token stored at {}", self.token_path.display());
        Ok(())
    }

    async fn persist(&self, token: &StoredToken) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(token)?;
        tokio::fs::write(&self.token_path, json)
            .await
            .with_context(|| format!("cannot write token file {}", self.token_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.token_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AccessTokenSource for TokenManager {
    async fn access_token(&self) -> anyhow::Result<String> {
        self.get_valid_token().await
    }
}
