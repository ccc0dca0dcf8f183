use crate::error::{StoreError, StreamError, UploadError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One object from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// A byte stream of unknown length, pulled one chunk at a time.
#[async_trait]
pub trait ChunkSource: Send {
    /// `Ok(None)` marks a clean end; an error is terminal.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self) -> Result<bool, StoreError>;

    /// Streams `body` into `key`. Nothing is left behind under `key` unless
    /// the whole stream ended cleanly. Returns the number of bytes stored.
    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        body: &mut dyn ChunkSource,
    ) -> Result<u64, UploadError>;

    /// Every object whose key starts with `prefix`, at any depth, in no
    /// particular order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn name(&self) -> String;
}
