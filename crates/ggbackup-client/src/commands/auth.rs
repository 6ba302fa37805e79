//! Authentication command.

use std::path::{Path, PathBuf};

use ggbackup_google::GroupBackup;
use ggbackup_google::google::{AuthFlow, GoogleConfig, OAuthCredentials};
use tracing::{info, warn};

use crate::cli::AuthArgs;
use crate::config::{ClientConfig, GoogleSettings};
use crate::error::{ClientError, ClientResult};

/// Runs the OAuth flow and stores the resulting credentials at `token_path`.
///
/// Client secrets come from CLI flags, a `--credentials-file`, or
/// `config.toml`. When they came from the command line they are saved to
/// `config_path` so later `backup` runs can refresh tokens.
pub async fn run(
    args: AuthArgs,
    config: &ClientConfig,
    config_path: &Path,
    token_path: &Path,
) -> ClientResult<()> {
    let (credentials, source) = resolve_google_credentials(
        args.client_id,
        args.client_secret,
        args.credentials_file,
        config.google.as_ref(),
    )?;
    credentials
        .validate()
        .map_err(|e| ClientError::Config(format!("invalid Google credentials: {}", e)))?;

    let settings = config.google.clone().unwrap_or_default();
    let mut google_config = settings.apply(
        GoogleConfig::new(config.domain(None).unwrap_or_default()).with_token_path(token_path),
    );
    if args.manual {
        google_config = google_config.with_auth_flow(AuthFlow::Manual);
    }
    let scopes = google_config.scopes.clone();

    let mut backup = GroupBackup::new(google_config);

    if !args.force && backup.restore(token_path)? {
        let usable = backup
            .credentials()
            .is_some_and(|t| !t.invalid && t.has_scopes(&scopes));
        if usable {
            persist_source(config_path, &credentials, &source);
            println!("Already authenticated with Google.");
            println!("Use --force to re-authenticate.");
            return Ok(());
        }
        info!("stored credentials are unusable, starting a new authorization");
    }

    println!("Starting Google authentication...");
    println!();
    println!("A browser window will open for you to authorize read access to");
    println!("the domain's groups, members and group settings.");
    println!();

    backup.authenticate(credentials.clone()).await?;
    backup.persist(token_path)?;

    persist_source(config_path, &credentials, &source);

    info!("Google authentication successful");
    println!();
    println!("Authentication successful!");
    println!("Credentials saved to {}", token_path.display());
    Ok(())
}

/// Where the client secrets were resolved from.
#[derive(Debug, PartialEq)]
enum CredentialSource {
    /// `--client-id` and `--client-secret`
    Flags,
    /// `--credentials-file`
    File(PathBuf),
    /// `config.toml` (already persisted)
    Config,
}

fn persist_source(config_path: &Path, credentials: &OAuthCredentials, source: &CredentialSource) {
    match save_credentials_to_config(config_path, credentials, source) {
        Ok(true) => println!("Client secrets saved to {}", config_path.display()),
        Ok(false) => {}
        Err(e) => warn!("could not save client secrets to {}: {}", config_path.display(), e),
    }
}

/// Records the client secrets under `[google]` in `config_path`.
///
/// A `--credentials-file` is stored as a path; flags are stored inline.
/// Existing content and formatting are preserved. Returns false when the
/// secrets already came from the config.
fn save_credentials_to_config(
    config_path: &Path,
    credentials: &OAuthCredentials,
    source: &CredentialSource,
) -> Result<bool, String> {
    if *source == CredentialSource::Config {
        return Ok(false);
    }

    let content = if config_path.exists() {
        std::fs::read_to_string(config_path).map_err(|e| e.to_string())?
    } else {
        String::new()
    };

    let mut doc = content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| format!("could not parse config for writing: {}", e))?;

    if !doc.contains_key("google") {
        doc["google"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    let google = doc["google"]
        .as_table_mut()
        .ok_or_else(|| "[google] is not a table".to_string())?;

    match source {
        CredentialSource::File(path) => {
            let path = std::path::absolute(path).unwrap_or_else(|_| path.clone());
            google["credentials_file"] = toml_edit::value(path.display().to_string());
            google.remove("client_id");
            google.remove("client_secret");
        }
        _ => {
            google["client_id"] = toml_edit::value(credentials.client_id.as_str());
            google["client_secret"] = toml_edit::value(credentials.client_secret.as_str());
        }
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("could not create {}: {}", parent.display(), e))?;
    }
    std::fs::write(config_path, doc.to_string()).map_err(|e| e.to_string())?;

    info!("client secrets saved to {}", config_path.display());
    Ok(true)
}

/// Resolves Google client secrets from multiple sources.
///
/// Priority (highest to lowest):
/// 1. CLI `--client-id` + `--client-secret`
/// 2. CLI `--credentials-file` (Google Cloud Console JSON)
/// 3. `config.toml` `[google]` section (inline values or `credentials_file`)
fn resolve_google_credentials(
    cli_client_id: Option<String>,
    cli_client_secret: Option<String>,
    cli_credentials_file: Option<PathBuf>,
    config_google: Option<&GoogleSettings>,
) -> ClientResult<(OAuthCredentials, CredentialSource)> {
    if let (Some(id), Some(secret)) = (&cli_client_id, &cli_client_secret) {
        return Ok((OAuthCredentials::new(id, secret), CredentialSource::Flags));
    }

    if cli_client_id.is_some() || cli_client_secret.is_some() {
        return Err(ClientError::Config(
            "both --client-id and --client-secret are required when providing credentials directly"
                .to_string(),
        ));
    }

    if let Some(path) = cli_credentials_file {
        let creds = OAuthCredentials::from_file(&path).map_err(|e| {
            ClientError::Config(format!(
                "failed to load credentials from {}: {}",
                path.display(),
                e
            ))
        })?;
        return Ok((creds, CredentialSource::File(path)));
    }

    if let Some(google) = config_google.filter(|g| g.has_credentials()) {
        let creds = google.resolve_credentials().map_err(|e| {
            ClientError::Config(format!(
                "failed to resolve Google credentials from config: {}",
                e
            ))
        })?;
        return Ok((creds, CredentialSource::Config));
    }

    Err(ClientError::Config(format!(
        "Google credentials are required. Provide via:\n  \
         - client_id + client_secret (or credentials_file) in {}\n  \
         - --client-id and --client-secret flags\n  \
         - --credentials-file flag (path to Google Cloud Console JSON)\n  \
         - GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET env vars",
        ClientConfig::default_path().display()
    )))
}
