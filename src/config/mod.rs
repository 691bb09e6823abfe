use crate::models::{StageLocations, encode_key};
use std::env;
use std::path::{Path, PathBuf};

/// Smallest part S3 accepts for every part but the last one.
pub const MIN_MULTIPART_CHUNK_SIZE: usize = 5 * 1024 * 1024; // 5 MB

/// Which storage medium the broker runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    S3,
}

impl BackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" | "localdisk" | "disk" => Some(BackendKind::Local),
            "s3" | "object" | "minio" => Some(BackendKind::S3),
            _ => None,
        }
    }
}

/// Directories backing each stage on the local backend
#[derive(Debug, Clone)]
pub struct LocalDiskConfig {
    pub dirs: StageLocations<PathBuf>,
}

impl LocalDiskConfig {
    /// Lays the three stage directories out under a common root.
    pub fn under_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            dirs: StageLocations::new(
                root.join("quarantine"),
                root.join("perm"),
                root.join("reject"),
            ),
        }
    }
}

impl Default for LocalDiskConfig {
    fn default() -> Self {
        Self::under_root("./storage")
    }
}

/// Buckets and client settings for the object-store backend
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Custom endpoint (MinIO, localstack). `None` means AWS.
    pub endpoint: Option<String>,

    /// Region (default: "us-east-1")
    pub region: String,

    /// Static access key. Falls back to the default AWS credential chain when unset.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,

    /// Path-style addressing, required by most self-hosted stores (default: true)
    pub force_path_style: bool,

    pub buckets: StageLocations<String>,

    /// Content at or above this size goes through multipart upload (default: 8 MB)
    pub multipart_threshold: usize,

    /// Part size for multipart uploads (default: 8 MB, min: 5 MB)
    pub multipart_chunk_size: usize,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            force_path_style: true,
            buckets: StageLocations::new(
                "staging-quarantine".to_string(),
                "staging-perm".to_string(),
                "staging-reject".to_string(),
            ),
            multipart_threshold: 8 * 1024 * 1024, // 8 MB
            multipart_chunk_size: 8 * 1024 * 1024, // 8 MB
        }
    }
}

impl ObjectStoreConfig {
    /// URL for an object. The key is percent-encoded as the last path segment.
    pub fn object_uri(&self, bucket: &str, key: &str) -> String {
        let key = encode_key(key);
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key),
        }
    }
}

/// Where storage events are reported. Everything is optional; without
/// credentials the client stays silent.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub url: Option<String>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Measurement name events are written under (default: "stage_broker")
    pub namespace: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            url: None,
            database: "metrics".to_string(),
            username: None,
            password: None,
            namespace: "stage_broker".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Endpoint and credentials, only when all of them are present.
    pub fn credentials(&self) -> Option<(&str, &str, &str)> {
        match (&self.url, &self.username, &self.password) {
            (Some(url), Some(user), Some(password)) => Some((url, user, password)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Storage medium (default: local)
    pub backend: BackendKind,
    pub local: LocalDiskConfig,
    pub object_store: ObjectStoreConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            local: LocalDiskConfig::default(),
            object_store: ObjectStoreConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`BrokerConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let parse_usize = |name: &str, fallback: usize| {
            lookup(name)
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        };

        let backend = match lookup("STORAGE_BACKEND") {
            Some(value) => BackendKind::parse(&value).unwrap_or_else(|| {
                tracing::warn!("Unknown STORAGE_BACKEND '{}', using local disk", value);
                BackendKind::Local
            }),
            None => default.backend,
        };

        let root_layout = lookup("STORAGE_ROOT")
            .map(LocalDiskConfig::under_root)
            .unwrap_or(default.local);
        let local = LocalDiskConfig {
            dirs: StageLocations::new(
                lookup("QUARANTINE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(root_layout.dirs.quarantine),
                lookup("PERM_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(root_layout.dirs.perm),
                lookup("REJECT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(root_layout.dirs.reject),
            ),
        };

        let os = default.object_store;
        let object_store = ObjectStoreConfig {
            endpoint: lookup("S3_ENDPOINT").or(os.endpoint),
            region: lookup("S3_REGION").unwrap_or(os.region),
            access_key: lookup("S3_ACCESS_KEY").or(os.access_key),
            secret_key: lookup("S3_SECRET_KEY").or(os.secret_key),
            force_path_style: lookup("S3_FORCE_PATH_STYLE")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(os.force_path_style),
            buckets: StageLocations::new(
                lookup("QUARANTINE_BUCKET").unwrap_or(os.buckets.quarantine),
                lookup("PERM_BUCKET").unwrap_or(os.buckets.perm),
                lookup("REJECT_BUCKET").unwrap_or(os.buckets.reject),
            ),
            multipart_threshold: parse_usize("MULTIPART_THRESHOLD", os.multipart_threshold),
            multipart_chunk_size: parse_usize("MULTIPART_CHUNK_SIZE", os.multipart_chunk_size)
                .max(MIN_MULTIPART_CHUNK_SIZE),
        };

        let tel = default.telemetry;
        let telemetry = TelemetryConfig {
            url: lookup("INFLUXDB_URL").or(tel.url),
            database: lookup("INFLUXDB_DATABASE").unwrap_or(tel.database),
            username: lookup("INFLUXDB_USER").or(tel.username),
            password: lookup("INFLUXDB_PASSWORD").or(tel.password),
            namespace: lookup("INFLUXDB_NAMESPACE").unwrap_or(tel.namespace),
        };

        Self {
            backend,
            local,
            object_store,
            telemetry,
        }
    }

    /// Create config for development (local MinIO defaults, telemetry off)
    pub fn development() -> Self {
        Self {
            backend: BackendKind::Local,
            local: LocalDiskConfig::under_root("./storage"),
            object_store: ObjectStoreConfig {
                endpoint: Some("http://127.0.0.1:9000".to_string()),
                access_key: Some("minioadmin".to_string()),
                secret_key: Some("minioadmin".to_string()),
                ..ObjectStoreConfig::default()
            },
            telemetry: TelemetryConfig::default(),
        }
    }
}
