//! Removing stored credentials.

use std::path::Path;

use ggbackup_google::google::TokenStorage;

use crate::error::ClientResult;

/// Deletes the credential store at `token_path`, if present.
pub fn run(token_path: &Path) -> ClientResult<()> {
    if !token_path.exists() {
        println!("No stored credentials at {}.", token_path.display());
        return Ok(());
    }

    TokenStorage::new(token_path).clear()?;
    println!("Removed credentials from {}.", token_path.display());
    Ok(())
}
