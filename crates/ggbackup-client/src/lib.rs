//! Command-line interface for backing up a domain's Google Groups.
//!
//! This crate provides the `ggbackup` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod secret;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
