//! Google API clients and the OAuth plumbing behind them.
//!
//! # Authentication Flow
//!
//! 1. User provides their own OAuth client ID/secret (required by Google)
//! 2. The authorization URL is opened in the browser with a PKCE challenge
//! 3. The code comes back through a loopback listener, or the user pastes it
//! 4. The code is exchanged for access and refresh tokens
//! 5. Tokens are persisted, and refreshed whenever they expire during a run
//!
//! # Example
//!
//! ```ignore
//! use ggbackup_google::GroupBackup;
//! use ggbackup_google::google::{GoogleConfig, OAuthCredentials};
//!
//! let secrets = OAuthCredentials::from_file("client_secret.json")?;
//! let mut backup = GroupBackup::new(GoogleConfig::new("example.com"));
//!
//! if !backup.restore(&path)? {
//!     backup.authenticate(secrets).await?;
//!     backup.persist(&path)?;
//! }
//! backup.establish_session().await?;
//! backup.list_groups().await?;
//! ```

mod access;
pub mod batch;
mod config;
mod directory;
mod oauth;
mod settings;
mod tokens;

pub use access::AccessToken;
pub use config::{
    AuthFlow, BACKUP_SCOPES, GoogleConfig, OAuthCredentials, SCOPE_GROUP_MEMBER_READONLY,
    SCOPE_GROUP_READONLY, SCOPE_GROUP_SETTINGS,
};
pub use directory::DirectoryClient;
pub use oauth::{OAuthClient, PkceFlow};
pub use settings::GroupsSettingsClient;
pub use tokens::{TokenInfo, TokenStorage};
