pub mod local;
pub mod memory;
pub mod object_store;
pub mod s3;

pub use local::LocalDiskBackend;
pub use memory::MemoryObjectClient;
pub use object_store::{BucketGrant, ObjectClient, ObjectStoreBackend, UploadedPart};
pub use s3::S3ObjectClient;

use crate::error::{Result, StorageError};
use crate::models::{ArtifactMetadata, Content, Location, Presence, Stage};
use crate::services::progress::{ProgressHandle, ProgressTracker};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// What a successful write hands back: where the artifact landed and a handle
/// on the transfer's progress.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    pub location: Location,
    pub progress: ProgressHandle,
}

/// Storage medium holding the three stages.
///
/// Every implementation guarantees that a key written under a stage is either
/// fully visible or not visible at all, and that `copy` keeps the key while
/// moving the bytes to another stage's location.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs ("local", "s3")
    fn backend_name(&self) -> &'static str;

    /// Configured name of a stage's backing location (directory or bucket).
    fn location_name(&self, stage: Stage) -> String;

    /// Ensures every stage location exists. Idempotent.
    async fn stage(&self) -> Result<()>;

    /// Writes `content` under (stage, key), reporting acknowledged bytes to
    /// `progress` and finishing it on success.
    async fn write_tracked(
        &self,
        content: Content,
        stage: Stage,
        key: &str,
        progress: &ProgressTracker,
    ) -> Result<Location>;

    /// Writes `content` under (stage, key). Returns once the bytes are durably
    /// acknowledged, so the returned progress is already complete.
    async fn write(&self, content: Content, stage: Stage, key: &str) -> Result<WriteReceipt> {
        let tracker = ProgressTracker::new(content.len_hint());
        let progress = tracker.handle();
        let location = self.write_tracked(content, stage, key, &tracker).await?;
        Ok(WriteReceipt { location, progress })
    }

    /// Duplicates (from, key) into (to, key). The source stays in place.
    async fn copy(&self, from: Stage, to: Stage, key: &str) -> Result<Location>;

    /// Metadata-only existence query. Absence is not an error.
    async fn ls(&self, stage: Stage, key: &str) -> Result<Presence>;

    /// Like [`StorageBackend::ls`] but treats absence as an error.
    async fn head(&self, stage: Stage, key: &str) -> Result<ArtifactMetadata> {
        match self.ls(stage, key).await? {
            Presence::Found(meta) => Ok(meta),
            Presence::Absent => Err(StorageError::SourceNotFound {
                stage,
                key: key.to_string(),
            }),
        }
    }

    /// Whether `name` is one of the configured stage locations and reachable.
    /// Never fails; anything else is `false`.
    async fn probe(&self, name: &str) -> bool;

    /// Liveness of a stage's backing location.
    async fn up_check(&self, stage: Stage) -> bool {
        self.probe(&self.location_name(stage)).await
    }
}

/// A write running in the background.
#[derive(Debug)]
pub struct PendingWrite {
    pub progress: ProgressHandle,
    task: JoinHandle<Result<Location>>,
}

impl PendingWrite {
    /// Waits for the upload to finish.
    pub async fn finish(self) -> Result<WriteReceipt> {
        let location = self
            .task
            .await
            .map_err(|e| StorageError::transfer("Write", e.to_string()))??;
        Ok(WriteReceipt {
            location,
            progress: self.progress,
        })
    }
}

/// Starts a write on a tokio task so the caller can poll progress while the
/// bytes move.
pub fn spawn_write(
    backend: Arc<dyn StorageBackend>,
    content: Content,
    stage: Stage,
    key: impl Into<String>,
) -> PendingWrite {
    let key = key.into();
    let tracker = ProgressTracker::new(content.len_hint());
    let progress = tracker.handle();

    let task = tokio::spawn(async move {
        let result = backend.write_tracked(content, stage, &key, &tracker).await;
        if let Err(e) = &result {
            tracing::error!(
                "Background write of {} to {} ({}) failed: {}",
                key,
                stage,
                backend.backend_name(),
                e
            );
        }
        result
    });

    PendingWrite { progress, task }
}
