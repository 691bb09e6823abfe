use super::StorageBackend;
use crate::config::ObjectStoreConfig;
use crate::error::{Result, StorageError};
use crate::models::{ArtifactMetadata, Content, Location, Presence, Stage};
use crate::services::progress::ProgressTracker;
use crate::utils::validation::validate_key;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

/// One part acknowledged by the store during a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub e_tag: Option<String>,
}

/// One entry of a bucket ACL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketGrant {
    pub grantee: Option<String>,
    pub permission: String,
}

/// The handful of object-store calls the backend relies on.
///
/// Implementations map "does not exist" to [`StorageError::NotFound`] with the
/// failing operation's name and a 404 status, and permission problems to
/// [`StorageError::AccessDenied`].
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn head_bucket(&self, bucket: &str) -> Result<()>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;

    /// Returns the upload id.
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadedPart>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<()>;

    /// Server-side copy keeping the key.
    async fn copy_object(&self, source_bucket: &str, dest_bucket: &str, key: &str) -> Result<()>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ArtifactMetadata>;

    async fn get_bucket_acl(&self, bucket: &str) -> Result<Vec<BucketGrant>>;
}

/// Stage storage on three buckets of an S3-compatible store.
pub struct ObjectStoreBackend {
    client: Arc<dyn ObjectClient>,
    config: ObjectStoreConfig,
}

impl ObjectStoreBackend {
    pub fn new(client: Arc<dyn ObjectClient>, config: ObjectStoreConfig) -> Self {
        Self { client, config }
    }

    pub fn bucket(&self, stage: Stage) -> &str {
        self.config.buckets.get(stage)
    }

    pub fn config(&self) -> &ObjectStoreConfig {
        &self.config
    }

    fn location(&self, stage: Stage, key: &str) -> Location {
        Location::new(stage, key, self.config.object_uri(self.bucket(stage), key))
    }

    /// Checks that the configured identity holds FULL_CONTROL on a stage bucket.
    /// Unlike `up_check`, failures propagate.
    pub async fn verify_acl(&self, stage: Stage) -> Result<Vec<BucketGrant>> {
        let bucket = self.bucket(stage);
        let grants = self.client.get_bucket_acl(bucket).await?;

        if grants.iter().any(|g| g.permission == "FULL_CONTROL") {
            Ok(grants)
        } else {
            Err(StorageError::AccessDenied {
                operation: "GetBucketAcl",
                message: format!("no FULL_CONTROL grant on bucket {}", bucket),
            })
        }
    }

    /// Uploads everything `reader` yields to (bucket, key).
    ///
    /// Content shorter than the multipart threshold goes up in a single
    /// PutObject; anything longer is split into fixed-size parts.
    async fn upload<R>(
        &self,
        mut reader: R,
        bucket: &str,
        key: &str,
        progress: &ProgressTracker,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let threshold = self.config.multipart_threshold.max(1);
        let mut pending = Vec::new();
        let eof = fill(&mut reader, &mut pending, threshold).await?;

        if eof && pending.len() < threshold {
            let len = pending.len() as u64;
            self.client
                .put_object(bucket, key, Bytes::from(pending))
                .await?;
            progress.advance(len);
            debug!("PutObject {}/{} ({} bytes)", bucket, key, len);
            return Ok(());
        }

        let upload_id = self.client.create_multipart_upload(bucket, key).await?;
        let result = self
            .upload_parts(&mut reader, pending, bucket, key, &upload_id, progress)
            .await;

        if let Err(e) = result {
            error!(
                "Multipart upload {} for {}/{} failed, aborting: {}",
                upload_id, bucket, key, e
            );
            if let Err(abort_err) = self
                .client
                .abort_multipart_upload(bucket, key, &upload_id)
                .await
            {
                warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn upload_parts<R>(
        &self,
        reader: &mut R,
        mut pending: Vec<u8>,
        bucket: &str,
        key: &str,
        upload_id: &str,
        progress: &ProgressTracker,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let chunk_size = self.config.multipart_chunk_size.max(1);
        let mut completed_parts = Vec::new();
        let mut part_number = 1;
        let mut eof = false;

        loop {
            if !eof && pending.len() < chunk_size {
                eof = fill(reader, &mut pending, chunk_size).await?;
            }
            if pending.is_empty() {
                break;
            }

            let take = pending.len().min(chunk_size);
            let body: Vec<u8> = pending.drain(..take).collect();
            let part = self
                .client
                .upload_part(bucket, key, upload_id, part_number, Bytes::from(body))
                .await?;
            completed_parts.push(part);
            progress.advance(take as u64);

            part_number += 1;
        }

        let parts = completed_parts.len();
        self.client
            .complete_multipart_upload(bucket, key, upload_id, completed_parts)
            .await?;
        debug!("Multipart upload {}/{} completed in {} parts", bucket, key, parts);
        Ok(())
    }
}

/// Reads until `buf` holds `limit` bytes or the reader is exhausted.
/// Returns true when the end of the stream was reached.
async fn fill<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<bool>
where
    R: AsyncRead + Unpin + Send,
{
    let want = limit.saturating_sub(buf.len());
    if want == 0 {
        return Ok(false);
    }
    let read = (&mut *reader).take(want as u64).read_to_end(buf).await?;
    Ok(read < want)
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn location_name(&self, stage: Stage) -> String {
        self.bucket(stage).to_string()
    }

    async fn stage(&self) -> Result<()> {
        for (_, bucket) in self.config.buckets.iter() {
            match self.client.head_bucket(bucket).await {
                Ok(()) => info!("✅ Bucket '{}' is ready", bucket),
                Err(StorageError::NotFound { .. }) => {
                    info!("🪣 Bucket '{}' not found, creating...", bucket);
                    self.client.create_bucket(bucket).await?;
                    info!("✅ Bucket '{}' created successfully", bucket);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn write_tracked(
        &self,
        content: Content,
        stage: Stage,
        key: &str,
        progress: &ProgressTracker,
    ) -> Result<Location> {
        validate_key(key)?;
        let bucket = self.bucket(stage);

        match content {
            Content::Bytes(bytes) => {
                progress.set_total(bytes.len() as u64);
                self.upload(Cursor::new(bytes), bucket, key, progress).await?;
            }
            Content::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                progress.set_total(file.metadata().await?.len());
                self.upload(file, bucket, key, progress).await?;
            }
            Content::Stream { reader, len } => {
                if let Some(len) = len {
                    progress.set_total(len);
                }
                self.upload(reader, bucket, key, progress).await?;
            }
        }

        progress.finish();
        Ok(self.location(stage, key))
    }

    async fn copy(&self, from: Stage, to: Stage, key: &str) -> Result<Location> {
        validate_key(key)?;
        if from == to {
            return Err(StorageError::SameStage { stage: from });
        }

        let source_bucket = self.bucket(from);
        let dest_bucket = self.bucket(to);

        // CopyObject on a missing key only yields a generic error, so check first.
        match self.client.head_object(source_bucket, key).await {
            Ok(_) => {}
            Err(StorageError::NotFound { .. }) => {
                return Err(StorageError::SourceNotFound {
                    stage: from,
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(e),
        }

        // TODO: objects over 5 GB need UploadPartCopy instead of a single CopyObject.
        if let Err(e) = self.client.copy_object(source_bucket, dest_bucket, key).await {
            error!(
                "S3 copy_object failed: source={}/{}, dest={}/{}, error={:?}",
                source_bucket, key, dest_bucket, key, e
            );
            return Err(e);
        }

        info!("📋 Copied {} from {} to {}", key, source_bucket, dest_bucket);
        Ok(self.location(to, key))
    }

    async fn ls(&self, stage: Stage, key: &str) -> Result<Presence> {
        validate_key(key)?;
        match self.client.head_object(self.bucket(stage), key).await {
            Ok(meta) => Ok(Presence::Found(meta)),
            Err(StorageError::NotFound { .. }) => Ok(Presence::Absent),
            Err(e) => Err(e),
        }
    }

    /// Raises the store's own 404 error for a missing key.
    async fn head(&self, stage: Stage, key: &str) -> Result<ArtifactMetadata> {
        validate_key(key)?;
        self.client.head_object(self.bucket(stage), key).await
    }

    async fn probe(&self, name: &str) -> bool {
        if !self.config.buckets.iter().any(|(_, bucket)| bucket == name) {
            return false;
        }
        match self.client.head_bucket(name).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Bucket {} is not reachable: {}", name, e);
                false
            }
        }
    }
}
