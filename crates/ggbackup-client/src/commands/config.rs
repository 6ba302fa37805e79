//! Configuration commands.

use std::path::Path;

use ggbackup_google::google::GoogleConfig;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the current configuration to stdout, with plain-text secrets masked.
pub fn dump(config: &ClientConfig, config_path: &Path) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(&config.redacted())
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", config_path.display());
    println!("{}", toml_str);
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    check(config)?;
    println!("Configuration is valid.");
    Ok(())
}

fn check(config: &ClientConfig) -> ClientResult<()> {
    let Some(google) = &config.google else {
        return Ok(());
    };

    if google.has_credentials() {
        let credentials = google
            .resolve_credentials()
            .map_err(|e| ClientError::Config(format!("invalid Google credentials: {}", e)))?;
        credentials
            .validate()
            .map_err(|e| ClientError::Config(format!("invalid Google credentials: {}", e)))?;
    }

    if let Some(domain) = &google.domain {
        google
            .apply(GoogleConfig::new(domain))
            .validate()
            .map_err(ClientError::Config)?;
    }

    Ok(())
}

/// Show the configuration file path.
pub fn path(config_path: &Path) -> ClientResult<()> {
    println!("config: {}", config_path.display());
    Ok(())
}
