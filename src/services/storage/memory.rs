use super::object_store::{BucketGrant, ObjectClient, UploadedPart};
use crate::error::{Result, StorageError};
use crate::models::ArtifactMetadata;
use crate::utils::hash::calculate_hash;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    e_tag: String,
    last_modified: DateTime<Utc>,
    parts: usize,
}

impl StoredObject {
    fn new(data: Bytes, parts: usize) -> Self {
        Self {
            e_tag: format!("\"{}\"", &calculate_hash(&data)[..32]),
            data,
            last_modified: Utc::now(),
            parts,
        }
    }
}

#[derive(Debug)]
struct MultipartUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, HashMap<String, StoredObject>>,
    uploads: HashMap<String, MultipartUpload>,
    denied: HashSet<String>,
    failing: HashSet<&'static str>,
}

impl State {
    fn check(&self, operation: &'static str, bucket: &str) -> Result<()> {
        if self.failing.contains(operation) {
            return Err(StorageError::transfer(operation, "injected failure"));
        }
        if self.denied.contains(bucket) {
            return Err(StorageError::AccessDenied {
                operation,
                message: format!("access to bucket {} denied", bucket),
            });
        }
        if !self.buckets.contains_key(bucket) {
            return Err(StorageError::NotFound {
                operation,
                status: 404,
            });
        }
        Ok(())
    }
}

/// In-process [`ObjectClient`] with S3 visibility rules: a multipart upload
/// only becomes an object when it is completed.
///
/// Test support: it stands in for a live store in this crate's integration
/// tests. The binary never builds it, and nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    state: Mutex<State>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with the given buckets already created.
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = State {
            buckets: buckets
                .into_iter()
                .map(|b| (b.into(), HashMap::new()))
                .collect(),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Every call against `bucket` fails with `AccessDenied` from now on.
    pub async fn deny_access(&self, bucket: &str) {
        self.state.lock().await.denied.insert(bucket.to_string());
    }

    /// Every call to `operation` (e.g. "UploadPart") fails from now on.
    pub async fn fail_operation(&self, operation: &'static str) {
        self.state.lock().await.failing.insert(operation);
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().await;
        state.buckets.get(bucket)?.get(key).map(|o| o.data.clone())
    }

    /// Number of parts the stored object was assembled from (1 for PutObject).
    pub async fn part_count(&self, bucket: &str, key: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state.buckets.get(bucket)?.get(key).map(|o| o.parts)
    }

    /// Multipart uploads started but neither completed nor aborted.
    pub async fn open_uploads(&self) -> usize {
        self.state.lock().await.uploads.len()
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.state.lock().await.check("HeadBucket", bucket)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check("PutObject", bucket)?;
        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.insert(key.to_string(), StoredObject::new(body, 1));
        }
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.check("CreateMultipartUpload", bucket)?;

        let upload_id = Uuid::new_v4().simple().to_string();
        state.uploads.insert(
            upload_id.clone(),
            MultipartUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadedPart> {
        let mut state = self.state.lock().await;
        state.check("UploadPart", bucket)?;

        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or(StorageError::NotFound {
                operation: "UploadPart",
                status: 404,
            })?;
        let e_tag = format!("\"{}\"", &calculate_hash(&body)[..32]);
        upload.parts.insert(part_number, body);

        Ok(UploadedPart {
            part_number,
            e_tag: Some(e_tag),
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check("CompleteMultipartUpload", bucket)?;

        let upload = state
            .uploads
            .remove(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or(StorageError::NotFound {
                operation: "CompleteMultipartUpload",
                status: 404,
            })?;

        let mut data = Vec::new();
        for part in &parts {
            let body = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::transfer(
                    "CompleteMultipartUpload",
                    format!("part {} was never uploaded", part.part_number),
                )
            })?;
            data.extend_from_slice(body);
        }

        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.insert(
                key.to_string(),
                StoredObject::new(Bytes::from(data), parts.len()),
            );
        }
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<()> {
        self.state.lock().await.uploads.remove(upload_id);
        Ok(())
    }

    async fn copy_object(&self, source_bucket: &str, dest_bucket: &str, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check("CopyObject", source_bucket)?;
        state.check("CopyObject", dest_bucket)?;

        let source = state
            .buckets
            .get(source_bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or(StorageError::NotFound {
                operation: "CopyObject",
                status: 404,
            })?;

        if let Some(objects) = state.buckets.get_mut(dest_bucket) {
            objects.insert(
                key.to_string(),
                StoredObject {
                    last_modified: Utc::now(),
                    ..source
                },
            );
        }
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ArtifactMetadata> {
        let state = self.state.lock().await;
        state.check("HeadObject", bucket)?;

        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| ArtifactMetadata {
                content_length: o.data.len() as u64,
                status_code: 200,
                last_modified: Some(o.last_modified),
                e_tag: Some(o.e_tag.clone()),
            })
            .ok_or(StorageError::NotFound {
                operation: "HeadObject",
                status: 404,
            })
    }

    async fn get_bucket_acl(&self, bucket: &str) -> Result<Vec<BucketGrant>> {
        self.state.lock().await.check("GetBucketAcl", bucket)?;
        Ok(vec![BucketGrant {
            grantee: Some("memory-owner".to_string()),
            permission: "FULL_CONTROL".to_string(),
        }])
    }
}
