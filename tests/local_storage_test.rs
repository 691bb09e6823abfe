use chrono::Utc;
use stage_broker::config::LocalDiskConfig;
use stage_broker::utils::hash::{calculate_file_hash, calculate_hash};
use stage_broker::{
    Content, LocalDiskBackend, Presence, Stage, StorageBackend, StorageError, key_segment,
    spawn_write,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// 100 random alphanumeric characters
fn file_data() -> String {
    (0..4)
        .map(|_| Uuid::new_v4().simple().to_string())
        .collect::<String>()[..100]
        .to_string()
}

fn setup() -> (TempDir, LocalDiskBackend) {
    let root = TempDir::new().unwrap();
    let backend = LocalDiskBackend::new(LocalDiskConfig::under_root(root.path().join("storage")));
    (root, backend)
}

async fn staged() -> (TempDir, LocalDiskBackend) {
    let (root, backend) = setup();
    backend.stage().await.unwrap();
    (root, backend)
}

#[tokio::test]
async fn test_write() {
    let (_root, backend) = staged().await;
    let key = Uuid::new_v4().simple().to_string();

    let receipt = backend
        .write(Content::from(file_data()), Stage::Quarantine, &key)
        .await
        .unwrap();

    assert_eq!(key_segment(receipt.location.as_str()), key);
    assert_eq!(receipt.location.key(), key);
    assert!(Path::new(receipt.location.as_str()).is_file());
}

#[tokio::test]
async fn test_write_wrong_destination() {
    let (_root, backend) = staged().await;
    std::fs::remove_dir_all(backend.dir(Stage::Reject)).unwrap();

    let err = backend
        .write(Content::from(file_data()), Stage::Reject, "abc123")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StorageError::DestinationNotFound {
            stage: Stage::Reject,
            ..
        }
    ));
    assert!(err.is_not_found());
    // write never creates stage directories
    assert!(!backend.dir(Stage::Reject).exists());
}

#[tokio::test]
async fn test_write_no_folders_at_all() {
    let (_root, backend) = setup();

    let err = backend
        .write(Content::from(file_data()), Stage::Quarantine, "abc123")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DestinationNotFound { .. }));

    backend.stage().await.unwrap();
    let receipt = backend
        .write(Content::from(file_data()), Stage::Quarantine, "abc123")
        .await
        .unwrap();
    assert!(Path::new(receipt.location.as_str()).is_file());
}

#[tokio::test]
async fn test_write_callback() {
    let (_root, backend) = staged().await;

    let receipt = backend
        .write(Content::from(file_data()), Stage::Quarantine, "abc123")
        .await
        .unwrap();

    let now = Utc::now();
    let progress = receipt.progress.snapshot();
    assert!(progress.complete);
    assert_eq!(progress.percentage, 100.0);
    assert_eq!(progress.bytes_transferred, 100);
    assert!(progress.time_last_updated <= now);
    assert!((now - progress.time_last_updated).num_milliseconds() <= 2_000);
}

#[tokio::test]
async fn test_write_from_file_and_stream() {
    let (root, backend) = staged().await;
    let source = root.path().join("upload.bin");
    std::fs::write(&source, vec![42u8; 64 * 1024]).unwrap();

    let from_file = backend
        .write(Content::File(source.clone()), Stage::Quarantine, "from-file")
        .await
        .unwrap();
    let reader = tokio::fs::File::open(&source).await.unwrap();
    let from_stream = backend
        .write(Content::stream(reader, None), Stage::Quarantine, "from-stream")
        .await
        .unwrap();

    let expected = calculate_file_hash(&source).await.unwrap();
    assert_eq!(calculate_file_hash(from_file.location.as_str()).await.unwrap(), expected);
    assert_eq!(calculate_file_hash(from_stream.location.as_str()).await.unwrap(), expected);
    assert_eq!(from_stream.progress.snapshot().total_bytes, Some(64 * 1024));
}

#[tokio::test]
async fn test_overwrite_replaces_content() {
    let (_root, backend) = staged().await;

    backend
        .write(Content::from("first version"), Stage::Quarantine, "abc123")
        .await
        .unwrap();
    let receipt = backend
        .write(Content::from("second"), Stage::Quarantine, "abc123")
        .await
        .unwrap();

    assert_eq!(std::fs::read(receipt.location.as_str()).unwrap(), b"second");
}

#[tokio::test]
async fn test_ls() {
    let (_root, backend) = staged().await;
    let data = file_data();
    backend
        .write(Content::from(data.clone()), Stage::Quarantine, "abc123")
        .await
        .unwrap();

    match backend.ls(Stage::Quarantine, "abc123").await.unwrap() {
        Presence::Found(meta) => {
            assert_eq!(meta.content_length, data.len() as u64);
            assert_eq!(meta.status_code, 200);
            assert!(meta.last_modified.is_some());
        }
        Presence::Absent => panic!("written artifact should be found"),
    }
}

#[tokio::test]
async fn test_ls_file_not_found() {
    let (_root, backend) = staged().await;

    assert_eq!(
        backend.ls(Stage::Quarantine, "abc123").await.unwrap(),
        Presence::Absent
    );

    let err = backend.head(Stage::Quarantine, "abc123").await.unwrap_err();
    assert!(matches!(err, StorageError::SourceNotFound { .. }));
}

#[tokio::test]
async fn test_stage() {
    let (_root, backend) = setup();

    // Twice, to make sure it is idempotent
    backend.stage().await.unwrap();
    backend.stage().await.unwrap();

    for stage in Stage::ALL {
        assert!(backend.dir(stage).is_dir());
    }
}

#[tokio::test]
async fn test_copy() {
    let (_root, backend) = staged().await;
    let receipt = backend
        .write(Content::from(file_data()), Stage::Quarantine, "abc123")
        .await
        .unwrap();
    let original_path = receipt.location.as_str().to_string();
    let original_checksum = calculate_file_hash(&original_path).await.unwrap();

    let copied = backend
        .copy(Stage::Quarantine, Stage::Perm, "abc123")
        .await
        .unwrap();

    assert_eq!(key_segment(&original_path), key_segment(copied.as_str()));
    assert_ne!(original_path, copied.as_str());
    assert_eq!(copied.stage, Stage::Perm);
    assert_eq!(
        Path::new(copied.as_str()),
        backend.dir(Stage::Perm).join("abc123")
    );

    // Checksum confirmation!
    assert_eq!(
        calculate_file_hash(copied.as_str()).await.unwrap(),
        original_checksum
    );
    // copy is not a move
    assert!(Path::new(&original_path).is_file());
    assert!(backend.ls(Stage::Quarantine, "abc123").await.unwrap().is_found());
}

#[tokio::test]
async fn test_copy_missing_source() {
    let (_root, backend) = staged().await;

    let err = backend
        .copy(Stage::Quarantine, Stage::Reject, "never-written")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StorageError::SourceNotFound {
            stage: Stage::Quarantine,
            ..
        }
    ));
    assert_eq!(
        backend.ls(Stage::Reject, "never-written").await.unwrap(),
        Presence::Absent
    );
}

#[tokio::test]
async fn test_invalid_keys_rejected() {
    let (_root, backend) = staged().await;

    for key in ["", "../escape", "a/b", ".hidden"] {
        let err = backend
            .write(Content::from("x"), Stage::Quarantine, key)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }), "key {:?}", key);
    }
}

#[tokio::test]
async fn test_up_check() {
    let (_root, backend) = setup();
    assert!(!backend.up_check(Stage::Quarantine).await);

    backend.stage().await.unwrap();
    for stage in Stage::ALL {
        assert!(backend.up_check(stage).await);
        assert!(backend.probe(&backend.location_name(stage)).await);
    }
    assert!(!backend.probe("some-random-folder").await);
    assert!(!backend.probe("/tmp").await);
}

#[tokio::test]
async fn test_spawn_write() {
    let (_root, backend) = staged().await;
    let backend: Arc<dyn StorageBackend> = Arc::new(backend);
    let data = file_data();

    let pending = spawn_write(
        backend.clone(),
        Content::from(data.clone()),
        Stage::Quarantine,
        "abc123",
    );
    let snapshot = pending.progress.wait().await.unwrap();
    assert_eq!(snapshot.percentage, 100.0);

    let receipt = pending.finish().await.unwrap();
    let stored = std::fs::read(receipt.location.as_str()).unwrap();
    assert_eq!(calculate_hash(&stored), calculate_hash(data.as_bytes()));
}

#[tokio::test]
async fn test_key_round_trips_through_location() {
    let (_root, backend) = staged().await;

    for key in ["q3 report", "résumé (final).pdf", "v1+draft"] {
        let receipt = backend
            .write(Content::from(file_data()), Stage::Quarantine, key)
            .await
            .unwrap();
        let copied = backend.copy(Stage::Quarantine, Stage::Perm, key).await.unwrap();

        assert_eq!(key_segment(receipt.location.as_str()), key);
        assert_eq!(key_segment(copied.as_str()), key);
    }

    for key in ["v1?draft", "report#2", "100%"] {
        let err = backend
            .write(Content::from(file_data()), Stage::Quarantine, key)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }), "key {:?}", key);
    }
}

#[tokio::test]
async fn test_concurrent_writers_last_one_wins() {
    let (_root, backend) = staged().await;
    let first = vec![b'a'; 256 * 1024];
    let second = vec![b'b'; 256 * 1024];

    let (r1, r2) = tokio::join!(
        backend.write(Content::from(first.clone()), Stage::Quarantine, "abc123"),
        backend.write(Content::from(second.clone()), Stage::Quarantine, "abc123"),
    );
    r1.unwrap();
    r2.unwrap();

    let stored = std::fs::read(backend.path_for(Stage::Quarantine, "abc123")).unwrap();
    assert!(stored == first || stored == second);

    let names: Vec<String> = std::fs::read_dir(backend.dir(Stage::Quarantine))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["abc123".to_string()]);
}
