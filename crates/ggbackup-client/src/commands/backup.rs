//! Backup command.

use std::path::{Path, PathBuf};

use ggbackup_google::google::GoogleConfig;
use ggbackup_google::{ApiError, FetchReport, GroupBackup};
use tracing::info;

use crate::cli::BackupArgs;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::output::{BackupDocument, is_stdout, write_output};

/// Backs up every group of the domain to the configured output.
pub async fn run(args: BackupArgs, config: &ClientConfig, token_path: &Path) -> ClientResult<()> {
    let domain = config.domain(args.domain.as_deref()).ok_or_else(|| {
        ClientError::Config(
            "a domain is required: pass --domain or set `domain` in [google]".to_string(),
        )
    })?;

    let settings = config.google.clone().unwrap_or_default();
    let google_config = settings.apply(GoogleConfig::new(&domain).with_token_path(token_path));
    google_config.validate().map_err(ClientError::Config)?;

    let mut backup = GroupBackup::new(google_config);
    if !backup.restore(token_path)? {
        return Err(ClientError::AuthRequired(format!(
            "no credentials at {}; run `ggbackup auth` first",
            token_path.display()
        )));
    }
    backup.establish_session().await.map_err(session_error)?;

    let output = args
        .output
        .clone()
        .or_else(|| config.backup.output.clone())
        .unwrap_or_else(|| default_output(&domain));

    let document = collect(backup, &args).await?;
    write_output(&output, &document.to_json(config.backup.pretty)?)?;

    print_summary(&document, &output);
    Ok(())
}

/// Runs the listing and fetch passes on an established session.
pub async fn collect(mut backup: GroupBackup, args: &BackupArgs) -> ClientResult<BackupDocument> {
    let count = backup.list_groups().await?;
    info!("found {} groups in {}", count, backup.config().domain);

    let settings_report = if args.skip_settings {
        None
    } else {
        Some(backup.fetch_settings().await?)
    };
    let members_report = if args.skip_members {
        None
    } else {
        Some(backup.fetch_members().await?)
    };

    let domain = backup.config().domain.clone();
    let mut document = BackupDocument::new(domain, backup.into_groups());
    document.settings_report = settings_report;
    document.members_report = members_report;
    Ok(document)
}

fn default_output(domain: &str) -> PathBuf {
    PathBuf::from(format!("ggbackup-{}.json", domain))
}

fn session_error(err: ApiError) -> ClientError {
    if err.code().is_precondition() {
        ClientError::AuthRequired(format!(
            "{}; run `ggbackup auth --force`",
            err.message()
        ))
    } else {
        err.into()
    }
}

fn print_summary(document: &BackupDocument, output: &Path) {
    if !is_stdout(output) {
        eprintln!(
            "Backed up {} groups of {} to {}",
            document.group_count,
            document.domain,
            output.display()
        );
    }
    report_failures("settings", document.settings_report.as_ref());
    report_failures("members", document.members_report.as_ref());
}

fn report_failures(pass: &str, report: Option<&FetchReport>) {
    let Some(report) = report.filter(|r| !r.is_complete()) else {
        return;
    };
    eprintln!(
        "warning: {} incomplete: {} failed, {} for unknown groups",
        pass,
        report.failed.len(),
        report.unknown
    );
    for item in &report.failed {
        eprintln!("  {}: {}", item.group, item.error);
    }
}
