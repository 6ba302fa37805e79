//! The backup orchestrator: credentials, session, and the group map.
//!
//! A run goes `authenticate` (or `restore`) → `establish_session` →
//! `list_groups` → `fetch_settings` → `fetch_members`. Each data fetch checks
//! [`GroupBackup::require_session`] first.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ggbackup_core::{GroupRecord, GroupStore};
use tracing::{debug, info, warn};

use crate::api::{DirectoryApi, GroupsSettingsApi};
use crate::error::{ApiError, ApiResult};
use crate::fetch::{self, FetchReport};
use crate::google::{
    AccessToken, AuthFlow, DirectoryClient, GoogleConfig, GroupsSettingsClient, OAuthClient,
    OAuthCredentials, TokenInfo, TokenStorage,
};

/// Authorized transport and the service handles bound to it.
#[derive(Default, Clone)]
pub struct Session {
    transport: Option<reqwest::Client>,
    directory: Option<Arc<dyn DirectoryApi>>,
    settings: Option<Arc<dyn GroupsSettingsApi>>,
}

impl Session {
    /// Assembles a session from its pieces; any of them may be missing.
    pub fn from_parts(
        transport: Option<reqwest::Client>,
        directory: Option<Arc<dyn DirectoryApi>>,
        settings: Option<Arc<dyn GroupsSettingsApi>>,
    ) -> Self {
        Self {
            transport,
            directory,
            settings,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport.is_some())
            .field("directory", &self.directory.is_some())
            .field("settings", &self.settings.is_some())
            .finish()
    }
}

/// Service handles of an established session.
#[derive(Clone)]
pub struct Services {
    pub directory: Arc<dyn DirectoryApi>,
    pub settings: Arc<dyn GroupsSettingsApi>,
}

/// Collects the groups of one domain with their settings and members.
#[derive(Debug)]
pub struct GroupBackup {
    config: GoogleConfig,
    credentials: Option<TokenInfo>,
    storage: Option<TokenStorage>,
    token: Option<AccessToken>,
    session: Session,
    store: GroupStore,
}

impl GroupBackup {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            config,
            credentials: None,
            storage: None,
            token: None,
            session: Session::default(),
            store: GroupStore::new(),
        }
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    /// Returns the current credentials, if any.
    pub fn credentials(&self) -> Option<&TokenInfo> {
        self.credentials.as_ref()
    }

    /// Replaces the current credentials.
    pub fn set_credentials(&mut self, credentials: TokenInfo) {
        self.credentials = Some(credentials);
        self.token = None;
    }

    /// Replaces the session, e.g. with in-memory services.
    pub fn set_session(&mut self, session: Session) {
        self.session = session;
        self.token = None;
    }

    /// Runs the OAuth flow for the configured scopes and keeps the credentials.
    pub async fn authenticate(&mut self, secrets: OAuthCredentials) -> ApiResult<()> {
        let client = OAuthClient::new(secrets, self.config.token_url.clone(), self.config.timeout)?;

        let tokens = match self.config.auth_flow {
            AuthFlow::Loopback => {
                client
                    .authorize_loopback(&self.config.scopes, self.config.loopback_port_range)
                    .await?
            }
            AuthFlow::Manual => client.authorize_manual(&self.config.scopes).await?,
        };

        if !tokens.has_scopes(&self.config.scopes) {
            warn!("not all requested scopes were granted: {:?}", tokens.scopes);
        }

        self.credentials = Some(tokens);
        self.token = None;
        Ok(())
    }

    /// Writes the credentials to `path`.
    ///
    /// # Errors
    ///
    /// `CredentialsMissing` if there are none, `CredentialsInvalid` if they
    /// were revoked.
    pub fn persist(&mut self, path: impl AsRef<Path>) -> ApiResult<()> {
        let tokens = self
            .credentials
            .as_ref()
            .ok_or_else(ApiError::credentials_missing)?;
        if tokens.invalid {
            return Err(ApiError::credentials_invalid("credentials invalid"));
        }

        let storage = TokenStorage::new(path.as_ref());
        storage.put(tokens)?;
        self.storage = Some(storage);
        Ok(())
    }

    /// Loads credentials from `path`.
    ///
    /// Returns false (and leaves no credentials) when the file is absent.
    /// The path is remembered so refreshed tokens are written back.
    pub fn restore(&mut self, path: impl AsRef<Path>) -> ApiResult<bool> {
        let storage = TokenStorage::new(path.as_ref());
        self.credentials = storage.get()?;
        self.storage = Some(storage);
        self.token = None;
        Ok(self.credentials.is_some())
    }

    /// Builds the authorized transport and binds the service handles.
    ///
    /// An expired access token is refreshed first when possible. The
    /// services share one [`AccessToken`], so tokens that expire later in
    /// the run are refreshed (and written back) as well.
    pub async fn establish_session(&mut self) -> ApiResult<()> {
        let tokens = self
            .credentials
            .clone()
            .ok_or_else(ApiError::credentials_missing)?;

        let token = AccessToken::new(
            tokens,
            self.storage.clone(),
            self.config.token_url.clone(),
            self.config.timeout,
        );
        let checked = token.current().await;
        self.credentials = Some(token.snapshot().await);
        checked?;

        let http = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| ApiError::internal(format!("failed to create HTTP client: {}", e)))?;

        let directory =
            DirectoryClient::new(http.clone(), self.config.api_base.clone(), token.clone());
        let settings =
            GroupsSettingsClient::new(http.clone(), self.config.api_base.clone(), token.clone());

        self.session = Session::from_parts(
            Some(http),
            Some(Arc::new(directory)),
            Some(Arc::new(settings)),
        );
        self.token = Some(token);
        debug!("session established against {}", self.config.api_base);
        Ok(())
    }

    /// Picks up credentials refreshed by the session since the last call.
    async fn sync_credentials(&mut self) {
        if let Some(token) = &self.token {
            self.credentials = Some(token.snapshot().await);
        }
    }

    /// Checks that the transport and both services are available.
    ///
    /// # Errors
    ///
    /// `SessionIncomplete` naming the first missing piece.
    pub fn require_session(&self) -> ApiResult<Services> {
        if self.session.transport.is_none() {
            return Err(ApiError::session_incomplete(
                "HTTP transport not established",
            ));
        }
        let directory = self
            .session
            .directory
            .clone()
            .ok_or_else(|| ApiError::session_incomplete("directory service not bound"))?;
        let settings = self
            .session
            .settings
            .clone()
            .ok_or_else(|| ApiError::session_incomplete("groups settings service not bound"))?;

        Ok(Services {
            directory,
            settings,
        })
    }

    /// Lists all groups of the configured domain.
    pub async fn list_groups(&mut self) -> ApiResult<usize> {
        let services = self.require_session()?;
        let result =
            fetch::list_groups(services.directory.as_ref(), &self.config.domain, &mut self.store)
                .await;
        self.sync_credentials().await;
        result
    }

    /// Merges every group's settings into its record.
    pub async fn fetch_settings(&mut self) -> ApiResult<FetchReport> {
        let services = self.require_session()?;
        let result = fetch::fetch_settings(services.settings.as_ref(), &mut self.store).await;
        self.sync_credentials().await;
        result
    }

    /// Collects every group's members into its record.
    pub async fn fetch_members(&mut self) -> ApiResult<FetchReport> {
        let services = self.require_session()?;
        let result = fetch::fetch_members(services.directory.as_ref(), &mut self.store).await;
        self.sync_credentials().await;
        let report = result?;
        info!(
            "members collected for {} groups",
            self.store.iter().filter(|(_, g)| g.members().is_some()).count()
        );
        Ok(report)
    }

    pub fn groups(&self) -> &GroupStore {
        &self.store
    }

    /// Consumes the backup, returning the group map keyed by lowercased email.
    pub fn into_groups(self) -> BTreeMap<String, GroupRecord> {
        self.store.into_groups()
    }
}
