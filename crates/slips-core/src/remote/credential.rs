//! OAuth credential with an explicit acquire / refresh / release lifecycle.
//!
//! The token file uses the Google authorized-user layout (`token`,
//! `refresh_token`, `token_uri`, `client_id`, `client_secret`, `expiry`).
//! Obtaining the first token interactively is outside this crate; a session
//! only validates, refreshes and persists an existing one.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{Result, check_status};
use crate::error::RemoteError;

/// Tokens expiring within this window are refreshed ahead of use.
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Stored OAuth credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Current access token.
    #[serde(default, alias = "access_token")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Access token expiry; `None` means the token does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,

    /// Fields this crate does not interpret, preserved on save.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl Credential {
    /// Load a credential from a token file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Decode(format!("{}: {}", path.display(), e)))
    }

    /// Persist the credential to a token file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| RemoteError::Decode(e.to_string()))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Whether the access token can be used at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.token.as_deref().is_none_or(str::is_empty) {
            return false;
        }
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&mut self, http: &reqwest::Client) -> Result<()> {
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            self.refresh_token.as_deref(),
            self.client_id.as_deref(),
            self.client_secret.as_deref(),
        ) else {
            return Err(RemoteError::Auth(
                "credential has no refresh token or client identity".to_string(),
            ));
        };

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        let response = http.post(&self.token_uri).form(&params).send().await?;
        let response = match check_status(response).await {
            Err(RemoteError::Status { status: 400, body }) => {
                return Err(RemoteError::Auth(format!("refresh rejected: {}", body)));
            }
            other => other?,
        };
        let token: TokenResponse = response.json().await?;

        self.apply(token, Utc::now());
        Ok(())
    }

    fn apply(&mut self, token: TokenResponse, now: DateTime<Utc>) {
        self.token = Some(token.access_token);
        self.expiry = token.expires_in.map(|secs| now + Duration::seconds(secs));
        if let Some(refresh_token) = token.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// A credential in use for the duration of one run.
///
/// `acquire` loads and validates (refreshing if needed), `bearer` hands out a
/// fresh access token on every call, `release` writes back a refreshed token.
#[derive(Debug)]
pub struct CredentialSession {
    credential: Credential,
    path: PathBuf,
    http: reqwest::Client,
    refreshed: bool,
}

impl CredentialSession {
    /// Load the token file and make sure it holds a usable access token.
    pub async fn acquire(path: &Path, http: reqwest::Client) -> Result<Self> {
        let credential = Credential::load(path).await.map_err(|e| {
            RemoteError::Auth(format!("cannot load credential {}: {}", path.display(), e))
        })?;

        let mut session = Self {
            credential,
            path: path.to_path_buf(),
            http,
            refreshed: false,
        };
        session.ensure_fresh().await?;

        debug!("Acquired credential from {}", path.display());
        Ok(session)
    }

    /// Current access token, refreshed first if it is about to expire.
    pub async fn bearer(&mut self) -> Result<String> {
        self.ensure_fresh().await?;
        self.credential
            .token
            .clone()
            .ok_or_else(|| RemoteError::Auth("no access token".to_string()))
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    async fn ensure_fresh(&mut self) -> Result<()> {
        if self.credential.is_valid_at(Utc::now()) {
            return Ok(());
        }
        if !self.credential.can_refresh() {
            return Err(RemoteError::Auth(
                "access token expired and cannot be refreshed; re-authorize to create a new token file"
                    .to_string(),
            ));
        }

        info!("Refreshing access token");
        self.credential.refresh(&self.http).await?;
        self.refreshed = true;
        Ok(())
    }

    /// End the session, persisting the credential if it was refreshed.
    pub async fn release(self) -> Result<()> {
        if self.refreshed {
            self.credential.save(&self.path).await?;
            debug!("Saved refreshed credential to {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TOKEN_JSON: &str = r#"{
        "token": "ya29.access",
        "refresh_token": "1//refresh",
        "token_uri": "https://oauth2.googleapis.com/token",
        "client_id": "client.apps.googleusercontent.com",
        "client_secret": "secret",
        "scopes": ["https://www.googleapis.com/auth/drive"],
        "universe_domain": "googleapis.com",
        "account": "",
        "expiry": "2025-04-01T12:00:00.000000Z"
    }"#;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_authorized_user_file() {
        let credential: Credential = serde_json::from_str(TOKEN_JSON).unwrap();
        assert_eq!(credential.token.as_deref(), Some("ya29.access"));
        assert_eq!(credential.expiry, Some(at("2025-04-01T12:00:00Z")));
        assert!(credential.can_refresh());
        assert_eq!(credential.extra["universe_domain"], "googleapis.com");
    }

    #[test]
    fn test_validity_with_skew() {
        let credential: Credential = serde_json::from_str(TOKEN_JSON).unwrap();
        assert!(credential.is_valid_at(at("2025-04-01T11:00:00Z")));
        assert!(!credential.is_valid_at(at("2025-04-01T11:59:30Z")));
        assert!(!credential.is_valid_at(at("2025-04-01T13:00:00Z")));

        let mut no_expiry = credential.clone();
        no_expiry.expiry = None;
        assert!(no_expiry.is_valid_at(at("2099-01-01T00:00:00Z")));

        no_expiry.token = None;
        assert!(!no_expiry.is_valid_at(at("2025-01-01T00:00:00Z")));
    }

    #[test]
    fn test_apply_token_response() {
        let mut credential: Credential = serde_json::from_str(TOKEN_JSON).unwrap();
        let now = at("2025-05-01T00:00:00Z");
        credential.apply(
            TokenResponse {
                access_token: "ya29.new".to_string(),
                expires_in: Some(3599),
                refresh_token: None,
            },
            now,
        );

        assert_eq!(credential.token.as_deref(), Some("ya29.new"));
        assert_eq!(credential.expiry, Some(at("2025-05-01T00:59:59Z")));
        assert_eq!(credential.refresh_token.as_deref(), Some("1//refresh"));
    }

    #[tokio::test]
    async fn test_save_preserves_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        let credential: Credential = serde_json::from_str(TOKEN_JSON).unwrap();
        credential.save(&path).await.unwrap();

        let reloaded = Credential::load(&path).await.unwrap();
        assert_eq!(reloaded.extra["universe_domain"], "googleapis.com");
        assert_eq!(reloaded.client_secret.as_deref(), Some("secret"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credential: Credential = serde_json::from_str(TOKEN_JSON).unwrap();
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("ya29.access"));
        assert!(!debug.contains("1//refresh"));
    }

    #[tokio::test]
    async fn test_acquire_valid_token_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, r#"{ "token": "static-token" }"#).unwrap();

        let mut session = CredentialSession::acquire(&path, reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(session.bearer().await.unwrap(), "static-token");
        session.release().await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{ "token": "static-token" }"#
        );
    }

    #[tokio::test]
    async fn test_release_persists_refreshed_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, TOKEN_JSON).unwrap();

        let mut credential: Credential = serde_json::from_str(TOKEN_JSON).unwrap();
        credential.token = Some("ya29.renewed".to_string());
        let session = CredentialSession {
            credential,
            path: path.clone(),
            http: reqwest::Client::new(),
            refreshed: true,
        };
        session.release().await.unwrap();

        let reloaded = Credential::load(&path).await.unwrap();
        assert_eq!(reloaded.token.as_deref(), Some("ya29.renewed"));
        assert_eq!(reloaded.extra["universe_domain"], "googleapis.com");
    }

    #[tokio::test]
    async fn test_acquire_expired_without_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"{ "token": "old", "expiry": "2001-01-01T00:00:00Z" }"#,
        )
        .unwrap();

        let err = CredentialSession::acquire(&path, reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Auth(_)));
    }

    #[tokio::test]
    async fn test_acquire_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CredentialSession::acquire(&dir.path().join("absent.json"), reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Auth(_)));
    }
}
