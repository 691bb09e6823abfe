use stage_broker::config::ObjectStoreConfig;
use stage_broker::utils::hash::calculate_hash;
use stage_broker::{
    Content, MemoryObjectClient, ObjectStoreBackend, Presence, Stage, StorageBackend,
    StorageError, key_segment, spawn_write,
};
use std::sync::Arc;
use uuid::Uuid;

fn test_config() -> ObjectStoreConfig {
    ObjectStoreConfig {
        endpoint: Some("http://localhost:9000".to_string()),
        multipart_threshold: 1024,
        multipart_chunk_size: 1024,
        ..ObjectStoreConfig::default()
    }
}

async fn setup() -> (Arc<MemoryObjectClient>, ObjectStoreBackend) {
    let client = Arc::new(MemoryObjectClient::new());
    let backend = ObjectStoreBackend::new(client.clone(), test_config());
    backend.stage().await.unwrap();
    (client, backend)
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_write() {
    let (client, backend) = setup().await;
    let key = Uuid::new_v4().simple().to_string();

    let receipt = backend
        .write(Content::from(sample(100)), Stage::Quarantine, &key)
        .await
        .unwrap();

    assert!(receipt.location.as_str().contains(backend.bucket(Stage::Quarantine)));
    assert_eq!(key_segment(receipt.location.as_str()), key);
    assert_eq!(
        receipt.location.as_str(),
        format!("http://localhost:9000/staging-quarantine/{}", key)
    );
    assert_eq!(
        client.get_object("staging-quarantine", &key).await.unwrap(),
        sample(100)
    );
    assert_eq!(client.part_count("staging-quarantine", &key).await, Some(1));
}

#[tokio::test]
async fn test_write_from_file() {
    let (client, backend) = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifact.bin");
    std::fs::write(&path, sample(3000)).unwrap();

    let receipt = backend
        .write(Content::File(path), Stage::Quarantine, "abc123")
        .await
        .unwrap();

    let progress = receipt.progress.snapshot();
    assert_eq!(progress.total_bytes, Some(3000));
    assert_eq!(progress.bytes_transferred, 3000);
    assert_eq!(progress.percentage, 100.0);
    assert_eq!(
        client.get_object("staging-quarantine", "abc123").await.unwrap(),
        sample(3000)
    );
}

#[tokio::test]
async fn test_ls() {
    let (_client, backend) = setup().await;
    backend
        .write(Content::from(sample(100)), Stage::Quarantine, "abc123")
        .await
        .unwrap();

    match backend.ls(Stage::Quarantine, "abc123").await.unwrap() {
        Presence::Found(meta) => {
            assert_eq!(meta.content_length, 100);
            assert_eq!(meta.status_code, 200);
            assert!(meta.e_tag.is_some());
        }
        Presence::Absent => panic!("written object should be found"),
    }
}

#[tokio::test]
async fn test_ls_file_not_found() {
    let (_client, backend) = setup().await;

    assert_eq!(
        backend.ls(Stage::Quarantine, "abc123").await.unwrap(),
        Presence::Absent
    );

    let err = backend.head(Stage::Quarantine, "abc123").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "An error occurred (404) when calling the HeadObject operation: Not Found"
    );
    assert_eq!(err.status_code(), Some(404));
}

#[tokio::test]
async fn test_copy() {
    let (client, backend) = setup().await;
    let receipt = backend
        .write(Content::from(sample(100)), Stage::Quarantine, "abc123")
        .await
        .unwrap();

    let copied = backend
        .copy(Stage::Quarantine, Stage::Perm, "abc123")
        .await
        .unwrap();

    assert_eq!(
        key_segment(receipt.location.as_str()),
        key_segment(copied.as_str())
    );
    assert_ne!(receipt.location.as_str(), copied.as_str());
    assert!(copied.as_str().contains(backend.bucket(Stage::Perm)));

    let original = client.get_object("staging-quarantine", "abc123").await.unwrap();
    let copy = client.get_object("staging-perm", "abc123").await.unwrap();
    assert_eq!(calculate_hash(&original), calculate_hash(&copy));
}

#[tokio::test]
async fn test_copy_missing_source() {
    let (_client, backend) = setup().await;

    let err = backend
        .copy(Stage::Quarantine, Stage::Reject, "abc123")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::SourceNotFound {
            stage: Stage::Quarantine,
            ..
        }
    ));

    let err = backend
        .copy(Stage::Perm, Stage::Perm, "abc123")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::SameStage { stage: Stage::Perm }));
}

#[tokio::test]
async fn test_write_missing_bucket() {
    let client = Arc::new(MemoryObjectClient::new());
    let backend = ObjectStoreBackend::new(client, test_config());

    let err = backend
        .write(Content::from(sample(10)), Stage::Reject, "abc123")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_stage() {
    let client = Arc::new(MemoryObjectClient::with_buckets(["staging-perm"]));
    let backend = ObjectStoreBackend::new(client.clone(), test_config());

    assert!(!backend.up_check(Stage::Quarantine).await);

    // Twice, to make sure it is idempotent
    backend.stage().await.unwrap();
    backend.stage().await.unwrap();

    for stage in Stage::ALL {
        assert!(backend.up_check(stage).await);
    }
}

#[tokio::test]
async fn test_up_check() {
    let (client, backend) = setup().await;

    assert!(backend.up_check(Stage::Quarantine).await);
    assert!(backend.probe("staging-reject").await);
    assert!(!backend.probe("SomeBucket").await);

    client.deny_access("staging-reject").await;
    assert!(!backend.up_check(Stage::Reject).await);
}

#[tokio::test]
async fn test_multipart_write() {
    let (client, backend) = setup().await;
    let data = sample(4500);

    let receipt = backend
        .write(Content::from(data.clone()), Stage::Quarantine, "large")
        .await
        .unwrap();

    // 4 full parts of 1024 bytes and a 404 byte tail
    assert_eq!(client.part_count("staging-quarantine", "large").await, Some(5));
    assert_eq!(
        client.get_object("staging-quarantine", "large").await.unwrap(),
        data
    );
    assert_eq!(client.open_uploads().await, 0);
    assert_eq!(receipt.progress.bytes_transferred(), 4500);
}

#[tokio::test]
async fn test_multipart_stream_without_length() {
    let (client, backend) = setup().await;
    let data = sample(2048);
    let reader = std::io::Cursor::new(data.clone());

    let receipt = backend
        .write(Content::stream(reader, None), Stage::Quarantine, "streamed")
        .await
        .unwrap();

    assert_eq!(client.part_count("staging-quarantine", "streamed").await, Some(2));
    let progress = receipt.progress.snapshot();
    assert!(progress.complete);
    assert_eq!(progress.percentage, 100.0);
}

#[tokio::test]
async fn test_failed_part_aborts_upload() {
    let (client, backend) = setup().await;
    client.fail_operation("UploadPart").await;

    let err = backend
        .write(Content::from(sample(4500)), Stage::Quarantine, "large")
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::TransferFailure { .. }));
    assert_eq!(client.open_uploads().await, 0);
    assert_eq!(
        backend.ls(Stage::Quarantine, "large").await.unwrap(),
        Presence::Absent
    );
}

#[tokio::test]
async fn test_spawn_write() {
    let (client, backend) = setup().await;
    let backend: Arc<dyn StorageBackend> = Arc::new(backend);

    let pending = spawn_write(
        backend,
        Content::from(sample(3000)),
        Stage::Quarantine,
        "abc123",
    );
    let snapshot = pending.progress.wait().await.unwrap();
    assert_eq!(snapshot.bytes_transferred, 3000);

    let receipt = pending.finish().await.unwrap();
    assert!(receipt.progress.is_complete());
    assert!(
        client
            .get_object("staging-quarantine", "abc123")
            .await
            .is_some()
    );
}

#[tokio::test]
async fn test_verify_acl() {
    let (client, backend) = setup().await;

    let grants = backend.verify_acl(Stage::Perm).await.unwrap();
    assert!(grants.iter().any(|g| g.permission == "FULL_CONTROL"));

    client.deny_access("staging-perm").await;
    let err = backend.verify_acl(Stage::Perm).await.unwrap_err();
    assert!(matches!(err, StorageError::AccessDenied { .. }));
}

#[tokio::test]
async fn test_key_round_trips_through_location() {
    let (client, backend) = setup().await;

    for key in ["q3 report", "résumé (final).pdf", "v1+draft"] {
        let receipt = backend
            .write(Content::from(sample(100)), Stage::Quarantine, key)
            .await
            .unwrap();
        let copied = backend.copy(Stage::Quarantine, Stage::Perm, key).await.unwrap();

        assert!(!receipt.location.as_str().contains(' '));
        assert_eq!(key_segment(receipt.location.as_str()), key);
        assert_eq!(key_segment(copied.as_str()), key);
        assert!(client.get_object("staging-perm", key).await.is_some());
    }

    for key in ["v1?draft", "report#2", "100%"] {
        let err = backend
            .write(Content::from(sample(10)), Stage::Quarantine, key)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }), "key {:?}", key);
    }
}

#[tokio::test]
async fn test_concurrent_writers_last_one_wins() {
    let (client, backend) = setup().await;
    let first = vec![b'a'; 4500];
    let second = vec![b'b'; 4500];

    let (r1, r2) = tokio::join!(
        backend.write(Content::from(first.clone()), Stage::Quarantine, "abc123"),
        backend.write(Content::from(second.clone()), Stage::Quarantine, "abc123"),
    );
    r1.unwrap();
    r2.unwrap();

    let stored = client
        .get_object("staging-quarantine", "abc123")
        .await
        .unwrap();
    assert!(stored == first || stored == second);
    assert_eq!(client.open_uploads().await, 0);
}
