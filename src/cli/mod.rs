mod commands;

pub use commands::execute;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Scheduled database dumps streamed to S3-compatible storage.
#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"), version)]
pub struct Cli {
    /// Optional TOML file; environment variables take precedence over it.
    #[clap(long, short, global = true, env = "DBDUMPER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    /// Run backups on the configured cron schedule until interrupted (default).
    Run,
    /// Run a single backup immediately and exit.
    BackupNow,
    /// List stored backups, newest first.
    List,
}
