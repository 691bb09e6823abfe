use crate::config::{BackendKind, BrokerConfig, LocalDiskConfig, ObjectStoreConfig};
use crate::services::storage::{LocalDiskBackend, ObjectStoreBackend, S3ObjectClient, StorageBackend};
use std::sync::Arc;
use tracing::info;

pub fn setup_local_storage(config: &LocalDiskConfig) -> Arc<LocalDiskBackend> {
    info!(
        "💾 Local Storage: {}, {}, {}",
        config.dirs.quarantine.display(),
        config.dirs.perm.display(),
        config.dirs.reject.display()
    );
    Arc::new(LocalDiskBackend::new(config.clone()))
}

pub async fn setup_object_storage(config: &ObjectStoreConfig) -> Arc<ObjectStoreBackend> {
    let client = S3ObjectClient::from_config(config).await;
    Arc::new(ObjectStoreBackend::new(Arc::new(client), config.clone()))
}

/// Builds the backend selected by config. Stage locations are not created
/// here; call `stage()` for that.
pub async fn setup_storage(config: &BrokerConfig) -> Arc<dyn StorageBackend> {
    match config.backend {
        BackendKind::Local => setup_local_storage(&config.local),
        BackendKind::S3 => setup_object_storage(&config.object_store).await,
    }
}
