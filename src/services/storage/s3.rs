use super::object_store::{BucketGrant, ObjectClient, UploadedPart};
use crate::config::ObjectStoreConfig;
use crate::error::{Result, StorageError};
use crate::models::{ArtifactMetadata, encode_key};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use bytes::Bytes;
use tracing::info;

/// [`ObjectClient`] over the AWS SDK, for AWS itself or any S3-compatible store.
#[derive(Clone)]
pub struct S3ObjectClient {
    client: Client,
    region: String,
}

impl S3ObjectClient {
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    /// Builds the SDK client from config. Static credentials are used when both
    /// keys are set; otherwise the default AWS credential chain applies.
    pub async fn from_config(config: &ObjectStoreConfig) -> Self {
        info!(
            "☁️  S3 Storage: {} (Buckets: {}, {}, {})",
            config.endpoint.as_deref().unwrap_or("aws"),
            config.buckets.quarantine,
            config.buckets.perm,
            config.buckets.reject
        );

        let mut loader = aws_config::from_env().region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "static",
            ));
        }
        let aws_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(config.force_path_style)
            .build();

        Self::new(Client::from_conf(s3_config), config.region.clone())
    }
}

/// Maps an SDK failure onto the broker's error taxonomy.
fn map_sdk_error<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err
        .as_service_error()
        .and_then(|e| e.code())
        .map(str::to_string);

    match (status, code.as_deref()) {
        (Some(404), _) | (_, Some("NoSuchKey" | "NoSuchBucket" | "NotFound")) => {
            StorageError::NotFound {
                operation,
                status: 404,
            }
        }
        (Some(403), _) | (_, Some("AccessDenied")) => StorageError::AccessDenied {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        },
        _ => StorageError::TransferFailure {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error("HeadBucket", e))?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| map_sdk_error("CreateBucket", e))?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error("PutObject", e))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let res = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("CreateMultipartUpload", e))?;

        res.upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::transfer("CreateMultipartUpload", "No upload ID"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadedPart> {
        let res = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error("UploadPart", e))?;

        Ok(UploadedPart {
            part_number,
            e_tag: res.e_tag().map(str::to_string),
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<()> {
        let completed_parts = parts
            .into_iter()
            .map(|p| {
                CompletedPart::builder()
                    .set_e_tag(p.e_tag)
                    .part_number(p.part_number)
                    .build()
            })
            .collect();
        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| map_sdk_error("CompleteMultipartUpload", e))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("AbortMultipartUpload", e))?;
        Ok(())
    }

    async fn copy_object(&self, source_bucket: &str, dest_bucket: &str, key: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(dest_bucket)
            .copy_source(format!("{}/{}", source_bucket, encode_key(key)))
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("CopyObject", e))?;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ArtifactMetadata> {
        let res = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("HeadObject", e))?;

        let last_modified = res.last_modified().map(|d| {
            chrono::DateTime::from_timestamp(d.secs(), d.subsec_nanos()).unwrap_or_default()
        });

        Ok(ArtifactMetadata {
            content_length: res.content_length().unwrap_or(0).max(0) as u64,
            // A HeadObject response without an error is always a 200
            status_code: 200,
            last_modified,
            e_tag: res.e_tag().map(str::to_string),
        })
    }

    async fn get_bucket_acl(&self, bucket: &str) -> Result<Vec<BucketGrant>> {
        let res = self
            .client
            .get_bucket_acl()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error("GetBucketAcl", e))?;

        Ok(res
            .grants()
            .iter()
            .map(|grant| BucketGrant {
                grantee: grant
                    .grantee()
                    .and_then(|g| g.display_name().or(g.id()))
                    .map(str::to_string),
                permission: grant
                    .permission()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect())
    }
}
