//! In-memory object store and chunk sources for tests.

use super::store::{ChunkSource, ObjectEntry, ObjectStore};
use crate::error::{StoreError, StreamError, UploadError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_deletes: Mutex<HashSet<String>>,
    reject_puts: AtomicBool,
    fail_listing: AtomicBool,
}

impl MemoryStore {
    pub fn insert(&self, key: &str, last_modified: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: Vec::new(),
                content_type: String::new(),
                last_modified,
            },
        );
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.data.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|o| o.content_type.clone())
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn reject_puts(&self) {
        self.reject_puts.store(true, Ordering::SeqCst);
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        body: &mut dyn ChunkSource,
    ) -> Result<u64, UploadError> {
        if self.reject_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Request {
                op: "PutObject",
                message: "Access Denied".to_string(),
            }
            .into());
        }

        let mut data = Vec::new();
        while let Some(chunk) = body.next_chunk().await? {
            data.extend_from_slice(&chunk);
        }
        let bytes = data.len() as u64;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(bytes)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StoreError::Request {
                op: "ListObjectsV2",
                message: "connection reset".to_string(),
            });
        }
        // Reverse key order so callers cannot rely on the listing being sorted.
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectEntry {
                key: key.clone(),
                last_modified: object.last_modified,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(StoreError::Request {
                op: "DeleteObject",
                message: format!("Access Denied for {}", key),
            });
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

/// Replays fixed chunks, then ends cleanly or with the given error.
pub struct VecSource {
    chunks: VecDeque<Vec<u8>>,
    end: Option<StreamError>,
}

impl VecSource {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            end: None,
        }
    }

    pub fn failing(chunks: Vec<Vec<u8>>, error: StreamError) -> Self {
        Self {
            chunks: chunks.into(),
            end: Some(error),
        }
    }
}

#[async_trait]
impl ChunkSource for VecSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => match &self.end {
                Some(error) => Err(error.clone()),
                None => Ok(None),
            },
        }
    }
}
