use super::naming::{object_key, KeyClock};
use super::store::{ChunkSource, ObjectStore};
use crate::config::DatabaseEngine;
use crate::error::{StreamError, UploadError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

pub const CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub key: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Names each dump and streams it into the object store.
pub struct UploadSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    clock: KeyClock,
}

impl UploadSink {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            clock: KeyClock::default(),
        }
    }

    pub async fn upload(
        &self,
        db_name: &str,
        engine: DatabaseEngine,
        source: &mut dyn ChunkSource,
    ) -> Result<UploadReceipt, UploadError> {
        let key = object_key(&self.prefix, db_name, engine, self.clock.stamp());
        info!("Uploading {} to {}", key, self.store.name());

        let mut digesting = Digesting {
            inner: source,
            hasher: Sha256::new(),
            bytes: 0,
        };
        self.store
            .put_stream(&key, CONTENT_TYPE, &mut digesting)
            .await?;

        let receipt = UploadReceipt {
            key,
            bytes: digesting.bytes,
            sha256: hex::encode(digesting.hasher.finalize()),
        };
        info!(
            "Uploaded {} ({:.2} MB, sha256 {})",
            receipt.key,
            receipt.bytes as f64 / 1024.0 / 1024.0,
            receipt.sha256
        );
        Ok(receipt)
    }
}

/// Hashes and counts bytes as they pass through.
struct Digesting<'a> {
    inner: &'a mut dyn ChunkSource,
    hasher: Sha256,
    bytes: u64,
}

#[async_trait]
impl ChunkSource for Digesting<'_> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        let chunk = self.inner.next_chunk().await?;
        if let Some(chunk) = &chunk {
            self.hasher.update(chunk);
            self.bytes += chunk.len() as u64;
        }
        Ok(chunk)
    }
}
