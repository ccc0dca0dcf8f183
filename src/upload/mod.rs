#[cfg(test)]
pub mod memory;
pub mod naming;
mod s3;
mod sink;
mod store;

pub use s3::S3Store;
pub use sink::UploadSink;
pub use store::{ChunkSource, ObjectEntry, ObjectStore};

use crate::error::StoreError;

/// Every object under the `prefix/` directory, newest first. Sibling
/// prefixes such as `prefix-old/` are not included.
pub async fn list_backups(store: &dyn ObjectStore, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
    let directory = format!("{}/", prefix.trim_end_matches('/'));
    let mut backups = store.list(&directory).await?;
    backups.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.key.cmp(&a.key))
    });
    Ok(backups)
}
