//! OAuth credentials and their file-based store.
//!
//! [`TokenInfo`] is everything needed to call the APIs and to refresh access
//! later: the tokens, their expiry, the granted scopes, and the client secrets
//! that obtained them. [`TokenStorage`] reads and writes it as JSON at a path.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};

use super::config::OAuthCredentials;

/// Seconds subtracted from the advertised lifetime so tokens are refreshed early.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth credentials for the Google APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// The access token for API requests.
    pub access_token: String,

    /// The refresh token for obtaining new access tokens.
    pub refresh_token: Option<String>,

    /// When the access token expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// The OAuth scopes that were granted.
    pub scopes: Vec<String>,

    /// When the tokens were last refreshed.
    pub last_refresh: DateTime<Utc>,

    /// Client secrets the tokens were issued to; needed for refresh.
    #[serde(default)]
    pub client: Option<OAuthCredentials>,

    /// Set once Google rejected the refresh token (revoked or expired grant).
    #[serde(default)]
    pub invalid: bool,
}

impl TokenInfo {
    /// Creates a new token info from OAuth response data.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in_secs.map(expiry_from_now),
            scopes,
            last_refresh: Utc::now(),
            client: None,
            invalid: false,
        }
    }

    /// Records the client secrets the tokens belong to.
    pub fn with_client(mut self, client: OAuthCredentials) -> Self {
        self.client = Some(client);
        self
    }

    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// Returns true if the tokens carry all `required` scopes.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }

    /// Returns true if the access token can be renewed without user interaction.
    pub fn can_refresh(&self) -> bool {
        !self.invalid && self.refresh_token.is_some() && self.client.is_some()
    }

    /// Updates the access token after a refresh.
    pub fn update_access_token(
        &mut self,
        access_token: impl Into<String>,
        expires_in_secs: Option<i64>,
    ) {
        self.access_token = access_token.into();
        self.expires_at = expires_in_secs.map(expiry_from_now);
        self.last_refresh = Utc::now();
    }
}

fn expiry_from_now(secs: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(secs) - Duration::seconds(EXPIRY_MARGIN_SECS)
}

/// Credential store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct TokenStorage {
    path: PathBuf,
}

impl TokenStorage {
    /// Creates a store at the given path. Nothing is read until [`get`](Self::get).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the stored credentials.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn get(&self) -> ApiResult<Option<TokenInfo>> {
        if !self.path.exists() {
            debug!("no credential file at {:?}", self.path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            ApiError::configuration(format!("failed to read credential file: {}", e))
                .with_source(e)
        })?;

        let tokens: TokenInfo = serde_json::from_str(&content).map_err(|e| {
            ApiError::configuration(format!("failed to parse credential file: {}", e))
        })?;

        info!("loaded credentials from {:?}", self.path);
        Ok(Some(tokens))
    }

    /// Writes credentials, replacing any previous content.
    ///
    /// The file is written to a temporary sibling and renamed into place, and
    /// is readable by the owner only on unix.
    pub fn put(&self, tokens: &TokenInfo) -> ApiResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ApiError::configuration(format!("failed to create credential directory: {}", e))
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(tokens)
            .map_err(|e| ApiError::internal(format!("failed to serialize credentials: {}", e)))?;

        fs::write(&temp_path, &content).map_err(|e| {
            ApiError::configuration(format!("failed to write credential file: {}", e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600));
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            ApiError::configuration(format!("failed to rename credential file: {}", e))
        })?;

        debug!("saved credentials to {:?}", self.path);
        Ok(())
    }

    /// Removes the credential file if it exists.
    pub fn clear(&self) -> ApiResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                ApiError::configuration(format!("failed to remove credential file: {}", e))
            })?;
            info!("cleared credentials from {:?}", self.path);
        }
        Ok(())
    }

    /// Returns the store path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
