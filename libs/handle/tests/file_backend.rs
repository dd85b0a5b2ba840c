//! The literal end-to-end scenarios (spec §8, S1–S6), run once more against
//! the file-backed Store so the façade is exercised against both Providers,
//! not just `InMemoryProvider` (covered in `src/handle.rs`'s unit tests).

use std::sync::Arc;

use streams_domain::{IdempotencyKey, JsonSerializer, StreamId, SystemClock, UuidUniqueId};
use streams_handle::Store;
use streams_providers::FileProvider;
use tempfile::tempdir;

fn key(s: &str) -> IdempotencyKey {
    IdempotencyKey::new(s).unwrap()
}

fn store(root: &std::path::Path) -> Store<String, FileProvider<String, JsonSerializer<String>>> {
    let provider = Arc::new(FileProvider::new(
        root,
        JsonSerializer::new(),
        Arc::new(SystemClock),
        Arc::new(UuidUniqueId),
    ));
    Store::new(provider)
}

#[tokio::test]
async fn s1_through_s5_against_the_file_backend() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());
    let handle = store.get_stream(&StreamId::new("orders").unwrap());

    // S1
    let v = handle
        .append(
            vec![(key("idem1"), "data1".to_string()), (key("idem2"), "data2".to_string())],
            None,
        )
        .await
        .unwrap();
    assert_eq!(v, 2);
    assert_eq!(handle.version(None).await.unwrap(), 2);

    // S4: a third item, then a snapshot at version 2.
    handle
        .append(vec![(key("idem3"), "data3".to_string())], None)
        .await
        .unwrap();
    handle
        .snapshot(2, key("snap"), "snap".to_string(), None)
        .await
        .unwrap();

    let snapshotted = handle.read_all(true, None).await.unwrap();
    assert_eq!(snapshotted.version, 3);
    let payloads: Vec<_> = snapshotted.items.iter().map(|i| i.payload.clone()).collect();
    assert_eq!(payloads, vec!["snap".to_string(), "data3".to_string()]);

    // S5: clearing the snapshot restores full replay.
    handle.clear_snapshot(Some(2), None).await.unwrap();
    let full = handle.read_all(true, None).await.unwrap();
    assert_eq!(full.version, 3);
    let payloads: Vec<_> = full.items.iter().map(|i| i.payload.clone()).collect();
    assert_eq!(
        payloads,
        vec!["data1".to_string(), "data2".to_string(), "data3".to_string()]
    );
}

#[tokio::test]
async fn s2_and_s3_expected_version_append_on_file_backend() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());
    let handle = store.get_stream(&StreamId::new("orders").unwrap());

    let v = handle
        .append_with_expected_version(vec![(key("idem1"), "data1".to_string())], 0, None)
        .await
        .unwrap();
    assert_eq!(v, 1);

    let err = handle
        .append_with_expected_version(vec![(key("idem2"), "data2".to_string())], 0, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        streams_domain::StreamError::VersionMismatch {
            expected: 0,
            actual: 1
        }
    ));
}

#[tokio::test]
async fn s6_registry_identity_on_file_backend() {
    let dir = tempdir().unwrap();
    let store = store(dir.path());

    let a1 = store.get_stream(&StreamId::new("a").unwrap());
    let a2 = store.get_stream(&StreamId::new("a").unwrap());
    let b = store.get_stream(&StreamId::new("b").unwrap());

    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b));
}
