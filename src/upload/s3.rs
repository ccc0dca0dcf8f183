use super::store::{ChunkSource, ObjectEntry, ObjectStore};
use crate::config::StorageConfig;
use crate::error::{StoreError, UploadError};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::{Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use tracing::{debug, info, warn};

/// Size of the first multipart parts. S3 requires at least 5 MiB for every
/// part but the last.
const BASE_PART_SIZE: u64 = 8 * 1024 * 1024;
/// Parts per size tier; the part size doubles after each tier.
const PARTS_PER_TIER: u64 = 1000;
/// S3 rejects part numbers above this.
const MAX_PARTS: u64 = 10_000;

/// Bytes to buffer for the given 1-based part number. Doubling every
/// thousand parts keeps the largest part at 4 GiB (under S3's 5 GiB limit)
/// while letting 10,000 parts cover more than S3's 5 TiB object limit.
fn part_size(part_number: u64) -> u64 {
    let tier = (part_number.saturating_sub(1) / PARTS_PER_TIER).min(9);
    BASE_PART_SIZE << tier
}

pub struct S3Store {
    client: s3::Client,
    bucket: String,
}

impl S3Store {
    /// Builds the client and fails unless the bucket already exists.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(config.endpoint_url())
            .region(Region::new(config.region.clone()))
            .credentials_provider(Credentials::new(
                &config.access_key,
                &config.secret_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;
        // Path-style addressing keeps MinIO and other self-hosted stores working.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        let store = Self {
            client: s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        };
        if !store.bucket_exists().await? {
            return Err(StoreError::BucketMissing(config.bucket.clone()));
        }
        info!("Connected to bucket {} at {}", config.bucket, config.endpoint_url());
        Ok(store)
    }

    async fn put_single(&self, key: &str, content_type: &str, data: Vec<u8>) -> Result<(), StoreError> {
        debug!("Uploading {} as a single object ({} bytes)", key, data.len());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| request_error("PutObject", e))?;
        Ok(())
    }

    async fn begin_multipart(&self, key: &str, content_type: &str) -> Result<MultipartUpload, StoreError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| request_error("CreateMultipartUpload", e))?;
        let upload_id = created.upload_id().ok_or_else(|| StoreError::Request {
            op: "CreateMultipartUpload",
            message: "no upload ID returned".to_string(),
        })?;

        debug!("Started multipart upload {} for {}", upload_id, key);
        Ok(MultipartUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            parts: Vec::new(),
            settled: false,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e.as_service_error().is_some_and(|se| se.is_not_found())
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                if not_found {
                    Ok(false)
                } else {
                    Err(request_error("HeadBucket", e))
                }
            }
        }
    }

    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        body: &mut dyn ChunkSource,
    ) -> Result<u64, UploadError> {
        let mut part = Vec::new();
        let mut multipart: Option<MultipartUpload> = None;
        let mut total = 0u64;

        loop {
            let chunk = match body.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    if let Some(upload) = multipart {
                        upload.abort().await;
                    }
                    return Err(e.into());
                }
            };
            total += chunk.len() as u64;
            part.extend_from_slice(&chunk);

            let part_number = multipart.as_ref().map_or(1, |u| u.parts.len() as u64 + 1);
            if part.len() as u64 >= part_size(part_number) {
                let mut upload = match multipart.take() {
                    Some(upload) => upload,
                    None => self.begin_multipart(key, content_type).await?,
                };
                let data = std::mem::take(&mut part);
                if let Err(e) = upload.send_part(data).await {
                    upload.abort().await;
                    return Err(e.into());
                }
                multipart = Some(upload);
            }
        }

        match multipart {
            // Small dump: never filled a part, one request is enough.
            None => self.put_single(key, content_type, part).await?,
            Some(mut upload) => {
                if !part.is_empty() {
                    if let Err(e) = upload.send_part(part).await {
                        upload.abort().await;
                        return Err(e.into());
                    }
                }
                upload.complete().await?;
            }
        }
        Ok(total)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut entries = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| request_error("ListObjectsV2", e))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                entries.push(ObjectEntry {
                    key: key.to_string(),
                    last_modified,
                });
            }
        }
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("DeleteObject", e))?;
        Ok(())
    }

    fn name(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

/// An in-progress multipart upload. Dropping it unsettled (for example when
/// the run deadline cancels the upload) aborts it in the background.
struct MultipartUpload {
    client: s3::Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    settled: bool,
}

impl MultipartUpload {
    async fn send_part(&mut self, data: Vec<u8>) -> Result<(), StoreError> {
        let part_number = self.parts.len() as u64 + 1;
        if part_number > MAX_PARTS {
            return Err(StoreError::Request {
                op: "UploadPart",
                message: format!("{} exceeds the {} part limit of a multipart upload", self.key, MAX_PARTS),
            });
        }
        let part_number = part_number as i32;
        debug!("Uploading part {} of {} ({} bytes)", part_number, self.key, data.len());

        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| request_error("UploadPart", e))?;

        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }

    async fn complete(mut self) -> Result<(), StoreError> {
        let parts = std::mem::take(&mut self.parts);
        let part_count = parts.len();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed)
            .send()
            .await;

        match result {
            Ok(_) => {
                self.settled = true;
                debug!("Completed multipart upload of {} ({} parts)", self.key, part_count);
                Ok(())
            }
            Err(e) => {
                let err = request_error("CompleteMultipartUpload", e);
                self.abort().await;
                Err(err)
            }
        }
    }

    async fn abort(mut self) {
        self.settled = true;
        warn!("Aborting multipart upload of {}", self.key);
        if let Err(e) = abort_request(&self.client, &self.bucket, &self.key, &self.upload_id).await {
            warn!("Failed to abort multipart upload of {}: {}", self.key, e);
        }
    }
}

impl Drop for MultipartUpload {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        warn!("Multipart upload of {} abandoned, aborting", key);
        runtime.spawn(async move {
            if let Err(e) = abort_request(&client, &bucket, &key, &upload_id).await {
                warn!("Failed to abort multipart upload of {}: {}", key, e);
            }
        });
    }
}

async fn abort_request(
    client: &s3::Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<(), StoreError> {
    client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await
        .map_err(|e| request_error("AbortMultipartUpload", e))?;
    Ok(())
}

fn request_error<E>(op: &'static str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Request {
        op,
        message: DisplayErrorContext(err).to_string(),
    }
}
