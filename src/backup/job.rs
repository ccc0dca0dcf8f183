use super::bridge;
use super::retention::{CleanupSummary, RetentionManager};
use super::scheduler::BackupRunner;
use crate::config::{BackupSettings, DatabaseConfig};
use crate::database::{self, DumpCommand};
use crate::error::{BackupError, CleanupError, Result, UploadError};
use crate::upload::{ObjectStore, UploadSink};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct BackupReport {
    pub key: String,
    pub bytes: u64,
    pub sha256: String,
    pub duration: Duration,
    /// Cleanup never fails the run; its outcome is carried here instead.
    pub cleanup: std::result::Result<CleanupSummary, CleanupError>,
}

/// Runs one backup end to end: dump, stream, upload, then retention.
pub struct BackupService {
    database: DatabaseConfig,
    sink: UploadSink,
    retention: RetentionManager,
    timeout: Duration,
}

impl BackupService {
    pub fn new(database: DatabaseConfig, store: Arc<dyn ObjectStore>, settings: &BackupSettings) -> Self {
        Self {
            database,
            sink: UploadSink::new(store.clone(), settings.prefix.clone()),
            retention: RetentionManager::new(store, settings.prefix.clone(), settings.retention),
            timeout: settings.timeout,
        }
    }

    pub async fn perform_backup(&self) -> Result<BackupReport> {
        let command = database::build_command(&self.database);
        self.run_with(&command).await
    }

    pub(crate) async fn run_with(&self, command: &DumpCommand) -> Result<BackupReport> {
        let start = Instant::now();
        info!(
            "Starting backup of {} database {} at {}",
            self.database.engine,
            self.database.name,
            Utc::now().to_rfc3339()
        );

        let (writer, mut reader) = bridge::channel();
        let dump = database::run_dump(command, writer);
        // The reader is owned by the upload so that an early upload failure
        // closes the bridge and unblocks the dump.
        let upload = async move {
            self.sink
                .upload(&self.database.name, self.database.engine, &mut reader)
                .await
        };

        // On timeout both futures are dropped: the dump process is killed and
        // any partial upload is aborted.
        let joined = tokio::time::timeout(self.timeout, async { tokio::join!(dump, upload) }).await;
        let (dumped, uploaded) = match joined {
            Ok(results) => results,
            Err(_) => {
                error!(
                    "Backup of {} exceeded its {}s deadline, dump process terminated",
                    self.database.name,
                    self.timeout.as_secs()
                );
                return Err(UploadError::DeadlineExceeded(self.timeout).into());
            }
        };

        let receipt = match (dumped, uploaded) {
            (Ok(stats), Ok(receipt)) => {
                if !stats.diagnostics.is_empty() {
                    warn!("Dump of {} reported: {}", self.database.name, stats.diagnostics);
                }
                debug!("Dump produced {} bytes, {} uploaded", stats.bytes, receipt.bytes);
                receipt
            }
            // The producer's own error carries the diagnostics; the upload
            // only saw its echo through the stream.
            (Err(dump_err), Err(UploadError::Stream(_))) | (Err(dump_err), Ok(_)) => {
                error!("Backup of {} failed: {}", self.database.name, dump_err);
                return Err(dump_err);
            }
            (_, Err(upload_err)) => {
                error!("Backup of {} failed: {}", self.database.name, upload_err);
                return Err(BackupError::UploadFailed(upload_err));
            }
        };

        let cleanup = self
            .retention
            .apply(&self.database.name, self.database.engine)
            .await;
        if let Err(e) = &cleanup {
            warn!("Warning: failed to cleanup old backups: {}", e);
        }

        let duration = start.elapsed();
        info!(
            "Backup completed successfully: {} in {} sec",
            receipt.key,
            duration.as_secs()
        );
        Ok(BackupReport {
            key: receipt.key,
            bytes: receipt.bytes,
            sha256: receipt.sha256,
            duration,
            cleanup,
        })
    }
}

#[async_trait]
impl BackupRunner for BackupService {
    async fn run_backup(&self) -> Result<BackupReport> {
        self.perform_backup().await
    }
}
