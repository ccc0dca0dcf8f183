use crate::config::DatabaseEngine;
use crate::error::{CleanupError, CleanupFailure};
use crate::upload::naming::retention_prefix;
use crate::upload::{ObjectEntry, ObjectStore};
use std::sync::Arc;
use tracing::{info, warn};

/// How many dumps to keep per database. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep_last: usize,
}

impl RetentionPolicy {
    pub fn new(keep_last: usize) -> Option<Self> {
        (keep_last >= 1).then_some(Self { keep_last })
    }

    pub fn keep_last(&self) -> usize {
        self.keep_last
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep_last: 5 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub kept: usize,
    pub removed: Vec<String>,
}

/// Splits `entries` into (kept, expired): newest `keep_last` by last-modified
/// time are kept. Listings come back in arbitrary order, so this sorts fully.
pub fn partition_expired(
    mut entries: Vec<ObjectEntry>,
    policy: RetentionPolicy,
) -> (Vec<ObjectEntry>, Vec<ObjectEntry>) {
    entries.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.key.cmp(&a.key))
    });
    let expired = entries.split_off(policy.keep_last().min(entries.len()));
    (entries, expired)
}

pub struct RetentionManager {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    policy: RetentionPolicy,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            policy,
        }
    }

    /// Deletes all but the newest dumps of one database. Every expired object
    /// is attempted even if earlier deletions fail.
    pub async fn apply(&self, db_name: &str, engine: DatabaseEngine) -> Result<CleanupSummary, CleanupError> {
        let prefix = retention_prefix(&self.prefix, db_name, engine);
        let entries = self.store.list(&prefix).await.map_err(CleanupError::Listing)?;
        let (kept, expired) = partition_expired(entries, self.policy);

        if expired.is_empty() {
            info!(
                "Retention: {} backup(s) under {}, nothing to remove (keep {})",
                kept.len(),
                prefix,
                self.policy.keep_last()
            );
            return Ok(CleanupSummary {
                kept: kept.len(),
                removed: Vec::new(),
            });
        }

        let mut removed = Vec::new();
        let mut failures = Vec::new();
        for entry in expired {
            match self.store.delete(&entry.key).await {
                Ok(()) => {
                    info!("Removed old backup: {}", entry.key);
                    removed.push(entry.key);
                }
                Err(e) => {
                    warn!("Failed to remove old backup {}: {}", entry.key, e);
                    failures.push(CleanupFailure {
                        key: entry.key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(CleanupSummary {
                kept: kept.len(),
                removed,
            })
        } else {
            Err(CleanupError::Partial { removed, failures })
        }
    }
}
