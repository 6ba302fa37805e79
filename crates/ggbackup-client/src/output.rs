//! The backup document and where it is written.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use ggbackup_core::GroupRecord;
use ggbackup_google::FetchReport;
use serde::Serialize;

use crate::error::{ClientError, ClientResult};

/// Everything collected by one `ggbackup backup` run.
#[derive(Debug, Serialize)]
pub struct BackupDocument {
    pub domain: String,
    pub generated_at: DateTime<Utc>,
    pub group_count: usize,
    /// `None` when the settings pass was skipped.
    pub settings_report: Option<FetchReport>,
    /// `None` when the members pass was skipped.
    pub members_report: Option<FetchReport>,
    /// Groups keyed by lowercased email.
    pub groups: BTreeMap<String, GroupRecord>,
}

impl BackupDocument {
    pub fn new(domain: impl Into<String>, groups: BTreeMap<String, GroupRecord>) -> Self {
        Self {
            domain: domain.into(),
            generated_at: Utc::now(),
            group_count: groups.len(),
            settings_report: None,
            members_report: None,
            groups,
        }
    }

    pub fn to_json(&self, pretty: bool) -> ClientResult<String> {
        let result = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        result.map_err(|e| ClientError::Output(format!("failed to serialize backup: {}", e)))
    }
}

/// Returns true if `path` means standard output.
pub fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Writes `content` to `path`, or to stdout for `-`.
///
/// Files are written to a temporary sibling first and renamed into place, so
/// an interrupted run never leaves a truncated backup behind.
pub fn write_output(path: &Path, content: &str) -> ClientResult<()> {
    if is_stdout(path) {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(content.as_bytes())?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
        return Ok(());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);

    fs::write(temp_path, content).map_err(|e| {
        ClientError::Output(format!("failed to write {}: {}", temp_path.display(), e))
    })?;
    fs::rename(temp_path, path).map_err(|e| {
        ClientError::Output(format!("failed to move backup to {}: {}", path.display(), e))
    })?;

    Ok(())
}
