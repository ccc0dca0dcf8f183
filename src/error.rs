use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// An engine name outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported database type: {0}, must be 'mysql' or 'postgres'")]
pub struct UnsupportedEngine(pub String);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid {field} value '{value}': {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    UnsupportedEngine(#[from] UnsupportedEngine),

    #[error("failed to read config file {}: {reason}", path.display())]
    File { path: PathBuf, reason: String },
}

/// Terminal state of the dump stream as seen by its reader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("{0}")]
    ProducerFailed(String),

    #[error("dump stream closed before the dump finished")]
    ProducerVanished,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket {0} does not exist")]
    BucketMissing(String),

    #[error("{op} failed: {message}")]
    Request { op: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("dump stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("backup deadline of {}s exceeded", .0.as_secs())]
    DeadlineExceeded(Duration),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("database dump failed: {reason} (stderr: {diagnostics})")]
    DumpFailed { reason: String, diagnostics: String },

    #[error("failed to upload backup: {0}")]
    UploadFailed(#[from] UploadError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("error listing objects: {0}")]
    Listing(StoreError),

    #[error("failed to remove {} of {} old backups", failures.len(), failures.len() + removed.len())]
    Partial {
        removed: Vec<String>,
        failures: Vec<CleanupFailure>,
    },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to schedule backup: invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

/// Everything that can stop a subcommand, in the order it can happen.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Error loading configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Error initializing backup service: {0}")]
    Storage(#[from] StoreError),

    #[error("Error starting scheduler: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Error performing backup: {0}")]
    Backup(#[from] BackupError),

    #[error("Error installing signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
