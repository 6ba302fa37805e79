//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ggbackup_core::TracingOutputFormat;

/// ggbackup - back up a domain's Google Groups, settings and members
#[derive(Debug, Parser)]
#[command(name = "ggbackup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "GGBACKUP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Log format: compact, pretty or json
    #[arg(long, global = true)]
    pub log_format: Option<TracingOutputFormat>,

    /// Path of the stored OAuth credentials
    #[arg(long, global = true)]
    pub token_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authorize access to the domain's groups
    Auth(AuthArgs),

    /// Back up all groups with their settings and members
    Backup(BackupArgs),

    /// Remove the stored credentials
    Logout,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments of `ggbackup auth`.
#[derive(Debug, Default, Args)]
pub struct AuthArgs {
    /// OAuth client ID (from Google Cloud Console)
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret (from Google Cloud Console)
    #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// Path to Google Cloud Console credentials JSON file
    ///
    /// This is the JSON file downloaded from the Google Cloud Console
    /// OAuth 2.0 credentials page. Alternative to providing client_id
    /// and client_secret separately.
    #[arg(long, env = "GOOGLE_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Paste the authorization code instead of running a local listener
    #[arg(long)]
    pub manual: bool,

    /// Force re-authentication even if already authenticated
    #[arg(long, short)]
    pub force: bool,
}

/// Arguments of `ggbackup backup`.
#[derive(Debug, Default, Args)]
pub struct BackupArgs {
    /// Google Workspace domain
    #[arg(long, short, env = "GGBACKUP_DOMAIN")]
    pub domain: Option<String>,

    /// Output file, or `-` for stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Do not fetch group settings
    #[arg(long)]
    pub skip_settings: bool,

    /// Do not fetch group members
    #[arg(long)]
    pub skip_members: bool,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
