//! Access token shared by the API clients of one session.
//!
//! Long runs outlive an access token. Every request asks [`AccessToken`] for
//! the current bearer token, which is refreshed when it has expired; a 401
//! answer triggers one refresh and a single retry. Refreshed credentials are
//! written back to the store they were restored from.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiErrorCode, ApiResult};

use super::oauth::OAuthClient;
use super::tokens::{TokenInfo, TokenStorage};

struct TokenState {
    tokens: TokenInfo,
    storage: Option<TokenStorage>,
    token_url: String,
    timeout: Duration,
}

impl TokenState {
    async fn refresh(&mut self) -> ApiResult<()> {
        let (Some(client), Some(refresh_token)) =
            (self.tokens.client.clone(), self.tokens.refresh_token.clone())
        else {
            return Err(ApiError::credentials_invalid("no refresh token available"));
        };

        debug!("refreshing access token");
        let oauth = OAuthClient::new(client, self.token_url.clone(), self.timeout)?;
        match oauth.refresh_token(&refresh_token).await {
            Ok((access_token, expires_in)) => {
                self.tokens.update_access_token(access_token, expires_in);
                if let Some(storage) = &self.storage {
                    storage.put(&self.tokens)?;
                }
                Ok(())
            }
            Err(e) => {
                if e.code() == ApiErrorCode::CredentialsInvalid {
                    self.tokens.invalid = true;
                    let written = self.storage.as_ref().map(|s| s.put(&self.tokens));
                    if let Some(Err(write_err)) = written {
                        warn!("failed to record invalid credentials: {}", write_err);
                    }
                }
                Err(e)
            }
        }
    }
}

/// Bearer token source, cheap to clone and shared between clients.
#[derive(Clone)]
pub struct AccessToken {
    state: Arc<Mutex<TokenState>>,
}

impl AccessToken {
    /// Wraps `tokens`; refreshes go to `token_url` and are saved to `storage`.
    pub fn new(
        tokens: TokenInfo,
        storage: Option<TokenStorage>,
        token_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(TokenState {
                tokens,
                storage,
                token_url: token_url.into(),
                timeout,
            })),
        }
    }

    /// A token that never expires and cannot be refreshed.
    pub fn fixed(access_token: impl Into<String>) -> Self {
        Self::new(
            TokenInfo::new(access_token, None, None, Vec::new()),
            None,
            String::new(),
            Duration::from_secs(30),
        )
    }

    /// Returns a usable access token, refreshing an expired one first.
    ///
    /// # Errors
    ///
    /// `CredentialsInvalid` when the credentials were revoked, or expired
    /// without a way to refresh them.
    pub async fn current(&self) -> ApiResult<String> {
        let mut state = self.state.lock().await;
        if state.tokens.invalid {
            return Err(ApiError::credentials_invalid("credentials invalid"));
        }
        if state.tokens.is_expired() {
            if !state.tokens.can_refresh() {
                return Err(ApiError::credentials_invalid(
                    "access token expired and cannot be refreshed",
                ));
            }
            state.refresh().await?;
        }
        Ok(state.tokens.access_token.clone())
    }

    /// Replaces `rejected` after the API refused it.
    ///
    /// Returns `None` when the credentials cannot be refreshed. When another
    /// request already replaced `rejected`, its successor is returned as is.
    pub async fn renew(&self, rejected: &str) -> ApiResult<Option<String>> {
        let mut state = self.state.lock().await;
        if state.tokens.access_token != rejected {
            return Ok(Some(state.tokens.access_token.clone()));
        }
        if !state.tokens.can_refresh() {
            return Ok(None);
        }
        state.refresh().await?;
        Ok(Some(state.tokens.access_token.clone()))
    }

    /// Copy of the credentials as they are now.
    pub async fn snapshot(&self) -> TokenInfo {
        self.state.lock().await.tokens.clone()
    }

    /// Sends the request made by `build` with the current token.
    ///
    /// A 401 answer is retried once with a renewed token. Any other answer,
    /// or a 401 that cannot be renewed, is returned to the caller.
    pub async fn send<F>(&self, build: F) -> ApiResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.current().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        match self.renew(&token).await? {
            Some(fresh) => {
                debug!("access token rejected, retrying with a renewed one");
                Ok(build(&fresh).send().await?)
            }
            None => Ok(response),
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken").finish_non_exhaustive()
    }
}
