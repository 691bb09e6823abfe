use super::StorageBackend;
use crate::config::LocalDiskConfig;
use crate::error::{Result, StorageError};
use crate::models::{ArtifactMetadata, Content, Location, Presence, Stage, StageLocations};
use crate::services::progress::ProgressTracker;
use crate::utils::validation::validate_key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

/// Stage storage on a directory tree, one directory per stage.
///
/// Writes land in a hidden temporary file inside the destination directory and
/// are renamed into place once synced, so readers never see a truncated file.
#[derive(Debug, Clone)]
pub struct LocalDiskBackend {
    dirs: StageLocations<PathBuf>,
}

impl LocalDiskBackend {
    pub fn new(config: LocalDiskConfig) -> Self {
        Self { dirs: config.dirs }
    }

    pub fn dir(&self, stage: Stage) -> &Path {
        self.dirs.get(stage)
    }

    pub fn path_for(&self, stage: Stage, key: &str) -> PathBuf {
        self.dir(stage).join(key)
    }

    fn location(&self, stage: Stage, key: &str) -> Location {
        let path = self.path_for(stage, key);
        Location::new(stage, key, path.to_string_lossy())
    }

    /// The stage directory, which must already exist. Writes never create it.
    async fn destination(&self, stage: Stage) -> Result<&Path> {
        let dir = self.dir(stage);
        match fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::DestinationNotFound {
                stage,
                location: dir.display().to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::DestinationNotFound {
                stage,
                location: dir.display().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Streams `reader` into a temp file next to the target and renames it
    /// over (stage, key).
    async fn persist_from<R>(
        &self,
        mut reader: R,
        stage: Stage,
        key: &str,
        progress: &ProgressTracker,
    ) -> Result<Location>
    where
        R: AsyncRead + Unpin + Send,
    {
        let dir = self.destination(stage).await?;

        // The temp path is removed on drop, so an early return leaves nothing behind.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".incoming-")
            .suffix(".part")
            .tempfile_in(dir)?
            .into_parts();
        let mut file = fs::File::from_std(file);

        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let target = dir.join(key);
        temp_path.persist(&target).map_err(|e| e.error)?;

        progress.set_total(written);
        progress.advance(written);
        progress.finish();

        debug!("Wrote {} bytes to {}", written, target.display());
        Ok(self.location(stage, key))
    }
}

#[async_trait]
impl StorageBackend for LocalDiskBackend {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn location_name(&self, stage: Stage) -> String {
        self.dir(stage).display().to_string()
    }

    async fn stage(&self) -> Result<()> {
        for (stage, dir) in self.dirs.iter() {
            fs::create_dir_all(dir).await?;
            info!("📁 Stage {} ready at {}", stage, dir.display());
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

        match content {
            Content::Bytes(bytes) => {
                self.persist_from(std::io::Cursor::new(bytes), stage, key, progress)
                    .await
            }
            Content::File(path) => {
                let file = fs::File::open(&path).await?;
                self.persist_from(file, stage, key, progress).await
            }
            Content::Stream { reader, .. } => {
                self.persist_from(reader, stage, key, progress).await
            }
        }
    }

    async fn copy(&self, from: Stage, to: Stage, key: &str) -> Result<Location> {
        validate_key(key)?;
        if from == to {
            return Err(StorageError::SameStage { stage: from });
        }

        let source = self.path_for(from, key);
        let not_found = || StorageError::SourceNotFound {
            stage: from,
            key: key.to_string(),
        };
        let file = match fs::File::open(&source).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        if !file.metadata().await?.is_file() {
            return Err(not_found());
        }

        let location = self
            .persist_from(file, to, key, &ProgressTracker::new(None))
            .await?;
        info!("📋 Copied {} from {} to {}", key, from, to);
        Ok(location)
    }

    async fn ls(&self, stage: Stage, key: &str) -> Result<Presence> {
        validate_key(key)?;

        match fs::metadata(self.path_for(stage, key)).await {
            Ok(meta) if meta.is_file() => Ok(Presence::Found(ArtifactMetadata {
                content_length: meta.len(),
                status_code: 200,
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                e_tag: None,
            })),
            Ok(_) => Ok(Presence::Absent),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Presence::Absent),
            Err(e) => Err(e.into()),
        }
    }

    async fn probe(&self, name: &str) -> bool {
        let wanted = Path::new(name);
        match self.dirs.iter().find(|(_, dir)| dir.as_path() == wanted) {
            Some((stage, _)) => self.up_check(stage).await,
            None => false,
        }
    }

    async fn up_check(&self, stage: Stage) -> bool {
        fs::metadata(self.dir(stage))
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }
}
