//! Subcommand implementations.

pub mod auth;
pub mod backup;
pub mod config;
pub mod logout;
