//! OAuth 2.0 authorization-code flow (with PKCE) for the Google APIs.
//!
//! # Flow Overview
//!
//! 1. Generate a code verifier, its SHA-256 challenge, and a random state
//! 2. Build the authorization URL and open it in the user's browser
//! 3. Collect the authorization code, either from a loopback listener that
//!    receives Google's redirect, or from the user pasting it on stdin
//! 4. Exchange the code (with the verifier) for access and refresh tokens
//!
//! Access tokens are later renewed with [`OAuthClient::refresh_token`].

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, ApiResult};

use super::config::OAuthCredentials;
use super::tokens::TokenInfo;

/// Google's authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Redirect target for the manual flow. Nothing listens there; the user copies
/// the code out of the browser's address bar.
const MANUAL_REDIRECT_URI: &str = "http://localhost";

/// The PKCE code verifier length (in bytes, before base64 encoding).
const CODE_VERIFIER_LENGTH: usize = 32;

/// Timeout for waiting for the OAuth callback.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth client bound to one set of client secrets.
#[derive(Debug)]
pub struct OAuthClient {
    credentials: OAuthCredentials,
    token_url: String,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a new OAuth client talking to `token_url`.
    pub fn new(
        credentials: OAuthCredentials,
        token_url: impl Into<String>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            credentials,
            token_url: token_url.into(),
            http_client,
        })
    }

    /// Runs the flow with a loopback listener on the first free port of
    /// `port_range` and returns the obtained tokens.
    ///
    /// # Errors
    ///
    /// Fails if no port is free, the user denies access, the callback does
    /// not arrive within five minutes, or the code exchange fails.
    pub async fn authorize_loopback(
        &self,
        scopes: &[String],
        port_range: (u16, u16),
    ) -> ApiResult<TokenInfo> {
        let pkce = PkceFlow::new();

        let (listener, port) = Self::bind_loopback_server(port_range)?;
        let redirect_uri = format!("http://127.0.0.1:{}/callback", port);
        let auth_url = pkce.build_auth_url(&self.credentials.client_id, &redirect_uri, scopes);

        info!("starting OAuth flow, opening browser...");
        open_in_browser(&auth_url);

        let (code, received_state) = tokio::task::spawn_blocking(move || {
            Self::wait_for_callback(listener)
        })
        .await
        .map_err(|e| ApiError::internal(format!("OAuth callback task failed: {}", e)))??;

        if received_state != pkce.state {
            return Err(ApiError::authentication(
                "OAuth state mismatch - possible CSRF attack",
            ));
        }

        info!("received authorization code, exchanging for tokens...");
        self.exchange_code(&code, &pkce.verifier, &redirect_uri, scopes)
            .await
    }

    /// Runs the flow asking the user to paste the authorization code.
    ///
    /// The user may paste either the bare code or the full URL the browser
    /// was redirected to. Blocks until a line is read from stdin.
    pub async fn authorize_manual(&self, scopes: &[String]) -> ApiResult<TokenInfo> {
        let pkce = PkceFlow::new();
        let auth_url =
            pkce.build_auth_url(&self.credentials.client_id, MANUAL_REDIRECT_URI, scopes);

        info!("starting OAuth flow, opening browser...");
        open_in_browser(&auth_url);

        let input = tokio::task::spawn_blocking(|| {
            let stdin = std::io::stdin();
            prompt_for_code(&mut stdin.lock(), &mut std::io::stderr())
        })
        .await
        .map_err(|e| ApiError::internal(format!("code prompt task failed: {}", e)))??;

        let code = parse_pasted_code(&input, &pkce.state)?;

        debug!("generating credentials");
        self.exchange_code(&code, &pkce.verifier, MANUAL_REDIRECT_URI, scopes)
            .await
    }

    /// Refreshes an expired access token using the refresh token.
    ///
    /// Returns the new access token and its lifetime in seconds. A refresh
    /// token that Google no longer accepts yields
    /// [`ApiErrorCode::CredentialsInvalid`](crate::ApiErrorCode::CredentialsInvalid).
    pub async fn refresh_token(&self, refresh_token: &str) -> ApiResult<(String, Option<i64>)> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let token_response = self.post_token_request(&params, "token refresh").await?;

        info!("successfully refreshed access token");
        Ok((token_response.access_token, token_response.expires_in))
    }

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> ApiResult<TokenInfo> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let token_response = self.post_token_request(&params, "token exchange").await?;

        // Google reports the scopes actually granted; fall back to the request.
        let granted = token_response
            .scope
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_else(|| scopes.to_vec());

        info!("successfully obtained tokens");
        Ok(TokenInfo::new(
            token_response.access_token,
            token_response.refresh_token,
            token_response.expires_in,
            granted,
        )
        .with_client(self.credentials.clone()))
    }

    async fn post_token_request(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> ApiResult<TokenResponse> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| ApiError::network(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let oauth_error = serde_json::from_str::<TokenErrorResponse>(&body).ok();
            if oauth_error.as_ref().is_some_and(|e| e.error == "invalid_grant") {
                return Err(ApiError::credentials_invalid(format!(
                    "{} rejected: {}",
                    what,
                    oauth_error
                        .and_then(|e| e.error_description)
                        .unwrap_or_else(|| "invalid_grant".to_string())
                )));
            }
            return Err(ApiError::authentication(format!(
                "{} failed ({}): {}",
                what, status, body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::invalid_response(format!("invalid token response: {}", e)))
    }

    /// Tries to bind a TCP listener on an available port in the given range.
    fn bind_loopback_server(port_range: (u16, u16)) -> ApiResult<(TcpListener, u16)> {
        for port in port_range.0..=port_range.1 {
            if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
                debug!("bound loopback server on port {}", port);
                return Ok((listener, port));
            }
        }
        Err(ApiError::configuration(format!(
            "no available port in range {}-{}",
            port_range.0, port_range.1
        )))
    }

    /// Waits for the OAuth callback and extracts the authorization code.
    fn wait_for_callback(listener: TcpListener) -> ApiResult<(String, String)> {
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        if let Some(result) = Self::handle_callback(stream) {
                            let _ = tx.send(result);
                            return;
                        }
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
        });

        match rx.recv_timeout(CALLBACK_TIMEOUT) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(ApiError::authentication("OAuth callback timeout"))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ApiError::internal("callback channel disconnected"))
            }
        }
    }

    /// Handles an incoming HTTP request on the callback server.
    ///
    /// Returns `None` for requests that are not the OAuth callback (favicon
    /// and the like), so the listener keeps waiting.
    fn handle_callback(mut stream: TcpStream) -> Option<ApiResult<(String, String)>> {
        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();

        if reader.read_line(&mut request_line).is_err() {
            return None;
        }

        // GET /callback?code=...&state=... HTTP/1.1
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 2 || parts[0] != "GET" || !parts[1].starts_with("/callback") {
            return None;
        }

        let params = CallbackParams::from_query(parts[1].split_once('?').map_or("", |(_, q)| q));

        let response = if params.error.is_some() || params.code.is_none() {
            "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\n\r\n\
            <html><body><h1>Authorization Failed</h1>\
            <p>You can close this window.</p></body></html>"
        } else {
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
            <html><body><h1>Authorization Successful</h1>\
            <p>You can close this window and return to the terminal.</p></body></html>"
        };

        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();

        Some(params.into_result())
    }
}

/// Query parameters of an OAuth redirect.
#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackParams {
    fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let value = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_default();
                match key {
                    "code" => params.code = Some(value),
                    "state" => params.state = Some(value),
                    "error" => params.error = Some(value),
                    _ => {}
                }
            }
        }
        params
    }

    fn into_result(self) -> ApiResult<(String, String)> {
        if let Some(error) = self.error {
            return Err(ApiError::authentication(format!(
                "authorization denied: {}",
                error
            )));
        }
        match self.code {
            Some(code) => Ok((code, self.state.unwrap_or_default())),
            None => Err(ApiError::authentication(
                "missing authorization code in callback",
            )),
        }
    }
}

fn open_in_browser(auth_url: &str) {
    debug!("authorization URL: {}", auth_url);
    if let Err(e) = open::that(auth_url) {
        warn!("failed to open browser: {}", e);
        eprintln!("\nPlease open this URL in your browser:\n\n{}\n", auth_url);
    }
}

/// Prints the prompt and reads one line of user input.
fn prompt_for_code(input: &mut impl BufRead, output: &mut impl Write) -> ApiResult<String> {
    let _ = write!(output, "Enter the auth code: ");
    let _ = output.flush();

    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|e| ApiError::internal(format!("failed to read auth code: {}", e)))?;
    Ok(line)
}

/// Extracts the authorization code from what the user pasted.
///
/// Accepts a redirect URL (the `code` query parameter is used and `state`, if
/// present, must match) or the bare code.
fn parse_pasted_code(input: &str, expected_state: &str) -> ApiResult<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ApiError::authentication("no authorization code entered"));
    }

    let Ok(url) = url::Url::parse(input) else {
        return Ok(input.to_string());
    };

    let params = CallbackParams::from_query(url.query().unwrap_or(""));
    if params.state.as_deref().is_some_and(|state| state != expected_state) {
        return Err(ApiError::authentication(
            "OAuth state mismatch - possible CSRF attack",
        ));
    }
    params.into_result().map(|(code, _)| code)
}

/// PKCE flow state and utilities.
///
/// Implements RFC 7636 (Proof Key for Code Exchange).
#[derive(Debug)]
pub struct PkceFlow {
    /// The code verifier (high-entropy random string).
    pub verifier: String,
    /// The code challenge (SHA-256 hash of verifier, base64url encoded).
    pub challenge: String,
    /// Random state for CSRF protection.
    pub state: String,
}

impl PkceFlow {
    /// Creates a new PKCE flow with random verifier and state.
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        let challenge = Self::compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
            state: random_token(16),
        }
    }

    /// Computes the SHA-256 challenge for a code verifier.
    fn compute_challenge(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    /// Builds the Google OAuth authorization URL.
    ///
    /// Requests offline access so a refresh token is issued.
    pub fn build_auth_url(&self, client_id: &str, redirect_uri: &str, scopes: &[String]) -> String {
        let scope = scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            code_challenge={}&code_challenge_method=S256&state={}&\
            access_type=offline&prompt=consent",
            GOOGLE_AUTH_URL,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(&self.challenge),
            urlencoding::encode(&self.state),
        )
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Response from Google's token endpoint.
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Error body from Google's token endpoint.
#[derive(Debug, serde::Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorCode;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OAuthClient {
        OAuthClient::new(
            OAuthCredentials::new("test-client.apps.googleusercontent.com", "test-secret"),
            format!("{}/token", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn pkce_verifier_length() {
        let flow = PkceFlow::new();
        // Base64 encoding of 32 bytes = 43 characters (no padding)
        assert_eq!(flow.verifier.len(), 43);
    }

    #[test]
    fn pkce_challenge_is_deterministic() {
        let challenge1 = PkceFlow::compute_challenge("test-verifier-string");
        let challenge2 = PkceFlow::compute_challenge("test-verifier-string");
        assert_eq!(challenge1, challenge2);
    }

    #[test]
    fn pkce_state_is_random() {
        assert_ne!(PkceFlow::new().state, PkceFlow::new().state);
    }

    #[test]
    fn auth_url_requests_all_scopes() {
        let flow = PkceFlow::new();
        let scopes: Vec<String> = crate::google::BACKUP_SCOPES
            .iter()
            .map(|s| s.to_string())
            .collect();
        let url = flow.build_auth_url(
            "test-client.apps.googleusercontent.com",
            MANUAL_REDIRECT_URI,
            &scopes,
        );

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains(&*urlencoding::encode(&scopes.join(" "))));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost"));
    }

    #[test]
    fn pasted_bare_code() {
        assert_eq!(parse_pasted_code("  4/0Abc-def \n", "s").unwrap(), "4/0Abc-def");
    }

    #[test]
    fn pasted_redirect_url() {
        let code =
            parse_pasted_code("http://localhost/?state=s1&code=4%2F0Abc&scope=x", "s1").unwrap();
        assert_eq!(code, "4/0Abc");
    }

    #[test]
    fn pasted_url_with_wrong_state_is_rejected() {
        let err = parse_pasted_code("http://localhost/?state=other&code=abc", "s1").unwrap_err();
        assert!(err.message().contains("state mismatch"));
    }

    #[test]
    fn pasted_url_with_error_is_rejected() {
        let err = parse_pasted_code("http://localhost/?error=access_denied", "s1").unwrap_err();
        assert!(err.message().contains("access_denied"));
    }

    #[test]
    fn pasted_nothing_is_rejected() {
        assert!(parse_pasted_code("   \n", "s").is_err());
    }

    #[test]
    fn prompt_reads_one_line() {
        let mut input = std::io::Cursor::new("the-code\nignored\n");
        let mut output = Vec::new();
        let line = prompt_for_code(&mut input, &mut output).unwrap();
        assert_eq!(line, "the-code\n");
        assert_eq!(String::from_utf8(output).unwrap(), "Enter the auth code: ");
    }

    #[test]
    fn loopback_callback_extracts_code_and_state() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream
                .write_all(b"GET /callback?code=4%2Fabc&state=xyz HTTP/1.1\r\nHost: x\r\n\r\n")
                .unwrap();
            let mut reply = String::new();
            let _ = BufReader::new(stream).read_line(&mut reply);
            reply
        });

        let (stream, _) = listener.accept().unwrap();
        let result = OAuthClient::handle_callback(stream).unwrap().unwrap();
        assert_eq!(result, ("4/abc".to_string(), "xyz".to_string()));
        assert!(client.join().unwrap().contains("200 OK"));
    }

    #[test]
    fn loopback_ignores_unrelated_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\n").unwrap();
        });

        let (stream, _) = listener.accept().unwrap();
        assert!(OAuthClient::handle_callback(stream).is_none());
        client.join().unwrap();
    }

    #[tokio::test]
    async fn refresh_returns_new_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let (token, expires_in) = client(&server).refresh_token("rt-1").await.unwrap();
        assert_eq!(token, "new-access");
        assert_eq!(expires_in, Some(3599));
    }

    #[tokio::test]
    async fn refresh_with_revoked_grant_marks_credentials_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let err = client(&server).refresh_token("rt-1").await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::CredentialsInvalid);
        assert!(err.message().contains("revoked"));
    }

    #[tokio::test]
    async fn exchange_failure_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .exchange_code("code", "verifier", MANUAL_REDIRECT_URI, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::AuthenticationFailed);
    }

    #[tokio::test]
    async fn exchange_records_granted_scopes_and_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=verifier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3600,
                "scope": "scope-a scope-b"
            })))
            .mount(&server)
            .await;

        let tokens = client(&server)
            .exchange_code("code", "verifier", MANUAL_REDIRECT_URI, &["ignored".to_string()])
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(tokens.scopes, vec!["scope-a", "scope-b"]);
        assert!(tokens.can_refresh());
    }
}
