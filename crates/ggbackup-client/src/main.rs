//! ggbackup CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use ggbackup_client::cli::{Cli, Command, ConfigAction};
use ggbackup_client::commands;
use ggbackup_client::config::ClientConfig;
use ggbackup_client::error::{ClientError, ClientResult};
use ggbackup_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::from_flags(cli.debug, cli.log_format)) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = if cli.config.is_some() {
        ClientConfig::load_from(&config_path).map_err(ClientError::Config)?
    } else {
        ClientConfig::load().map_err(ClientError::Config)?
    };
    let token_path = config.token_path(cli.token_path.as_deref());

    match cli.command {
        Command::Auth(args) => commands::auth::run(args, &config, &config_path, &token_path).await,
        Command::Backup(args) => commands::backup::run(args, &config, &token_path).await,
        Command::Logout => commands::logout::run(&token_path),
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config_path),
        },
    }
}
