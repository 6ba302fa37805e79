//! Client configuration.
//!
//! All settings live in `~/.config/ggbackup/config.toml` by default:
//!
//! ```toml
//! [google]
//! client_id = "pass::google/ggbackup-id"
//! client_secret = "env::GGBACKUP_SECRET"
//! domain = "example.com"
//!
//! [backup]
//! output = "/var/backups/groups.json"
//! pretty = true
//! ```
//!
//! Credential values support secret references (see [`crate::secret`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use ggbackup_google::google::{AuthFlow, GoogleConfig, OAuthCredentials};
use serde::{Deserialize, Serialize};

/// Configuration for the ggbackup client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Google API settings.
    pub google: Option<GoogleSettings>,

    /// Backup output settings.
    pub backup: BackupSettings,
}

impl ClientConfig {
    /// Loads configuration from the default path; a missing file is empty config.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ggbackup")
    }

    /// Credential store path: the override, then `[google] token_path`, then
    /// the default location.
    pub fn token_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.google.as_ref().and_then(|g| g.token_path.clone()))
            .unwrap_or_else(GoogleConfig::default_token_path)
    }

    /// Domain to back up: the override, then `[google] domain`.
    pub fn domain(&self, cli_override: Option<&str>) -> Option<String> {
        cli_override
            .map(String::from)
            .or_else(|| self.google.as_ref().and_then(|g| g.domain.clone()))
    }

    /// Copy of this configuration with plain-text secrets masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(google) = config.google.as_mut() {
            google.client_secret = google.client_secret.as_deref().map(crate::secret::redact);
        }
        config
    }
}

/// `[google]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,

    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: Option<String>,

    /// Client secrets JSON downloaded from the Google Cloud Console, used
    /// when `client_id`/`client_secret` are not set.
    pub credentials_file: Option<PathBuf>,

    /// Google Workspace domain to back up.
    pub domain: Option<String>,

    /// Path of the credential store.
    pub token_path: Option<PathBuf>,

    /// `loopback` (default) or `manual`.
    pub auth_flow: Option<AuthFlow>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,
}

impl GoogleSettings {
    /// Resolves the OAuth client secrets.
    ///
    /// Inline `client_id`/`client_secret` win over `credentials_file`; inline
    /// values go through secret reference resolution.
    pub fn resolve_credentials(&self) -> Result<OAuthCredentials, String> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => {
                let id = crate::secret::resolve(id)
                    .map_err(|e| format!("failed to resolve client_id: {}", e))?;
                let secret = crate::secret::resolve(secret)
                    .map_err(|e| format!("failed to resolve client_secret: {}", e))?;
                Ok(OAuthCredentials::new(id, secret))
            }
            (Some(_), None) => Err("client_secret is missing from [google] section".to_string()),
            (None, Some(_)) => Err("client_id is missing from [google] section".to_string()),
            (None, None) => match &self.credentials_file {
                Some(path) => OAuthCredentials::from_file(path),
                None => Err(format!(
                    "Google credentials not found. Add to {}:\n  \
                     [google]\n  \
                     client_id = \"YOUR_ID.apps.googleusercontent.com\"\n  \
                     client_secret = \"YOUR_SECRET\"\n\n  \
                     Or run: ggbackup auth --credentials-file <path>",
                    ClientConfig::default_path().display()
                )),
            },
        }
    }

    /// Returns true if any credential source is configured.
    pub fn has_credentials(&self) -> bool {
        self.client_id.is_some() || self.client_secret.is_some() || self.credentials_file.is_some()
    }

    /// Applies these settings on top of a [`GoogleConfig`].
    pub fn apply(&self, mut config: GoogleConfig) -> GoogleConfig {
        if let Some(flow) = self.auth_flow {
            config = config.with_auth_flow(flow);
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }
}

/// `[backup]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Where to write the backup document; `-` for stdout.
    pub output: Option<PathBuf>,

    /// Pretty-print the JSON document.
    pub pretty: bool,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            output: None,
            pretty: true,
        }
    }
}
