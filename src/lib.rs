//! Staging storage for untrusted content.
//!
//! Artifacts enter the `quarantine` stage and are later copied to `perm` or
//! `reject`. The same [`StorageBackend`] contract is implemented on a local
//! directory tree and on three buckets of an S3-compatible store.

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{Result, StorageError};
pub use models::{
    ArtifactMetadata, Content, Location, Presence, Stage, StageLocations, encode_key, key_segment,
};
pub use services::progress::{ProgressHandle, ProgressSnapshot, ProgressTracker};
pub use services::storage::{
    LocalDiskBackend, MemoryObjectClient, ObjectClient, ObjectStoreBackend, PendingWrite,
    S3ObjectClient, StorageBackend, WriteReceipt, spawn_write,
};
pub use services::telemetry::TelemetryClient;
