//! Cross-cutting assertions run against both `Provider` backends so they
//! cannot silently drift in behavior (spec invariants 1–5, 7).

use std::sync::Arc;

use streams_domain::{IdempotencyKey, Item, SessionId, StreamError, StreamId};
use streams_providers::{FileProvider, InMemoryProvider, StoreProvider};
use streams_domain::{JsonSerializer, SystemClock, UuidUniqueId};
use tempfile::tempdir;

async fn monotonic_dense_versioning(provider: &impl StoreProvider<String>) {
    let stream = StreamId::new("monotonic").unwrap();
    let session = provider.open_session(&stream, None, None).await.unwrap();

    for (i, key) in ["a", "b", "c"].iter().enumerate() {
        let version = provider
            .append_with_idempotency(
                &session,
                &stream,
                IdempotencyKey::new(*key).unwrap(),
                format!("payload-{key}"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(version, (i + 1) as u64);
    }
    assert_eq!(provider.get_version(&session, &stream, None).await.unwrap(), 3);
}

async fn duplicate_idempotency_leaves_stream_unchanged(provider: &impl StoreProvider<String>) {
    let stream = StreamId::new("dup").unwrap();
    let session = provider.open_session(&stream, None, None).await.unwrap();
    let key = IdempotencyKey::new("only-once").unwrap();

    provider
        .append_with_idempotency(&session, &stream, key.clone(), "first".to_string(), None)
        .await
        .unwrap();

    let err = provider
        .append_with_idempotency(&session, &stream, key, "second".to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::DuplicateIdempotency { .. }));
    assert_eq!(provider.get_version(&session, &stream, None).await.unwrap(), 1);
}

async fn round_trip_by_version_and_key(provider: &impl StoreProvider<String>) {
    let stream = StreamId::new("roundtrip").unwrap();
    let session = provider.open_session(&stream, None, None).await.unwrap();
    let key = IdempotencyKey::new("k").unwrap();

    let version = provider
        .append_with_idempotency(&session, &stream, key.clone(), "p".to_string(), None)
        .await
        .unwrap();

    assert_eq!(
        provider.get_by_version(&session, &stream, version, None).await.unwrap().payload,
        "p"
    );
    assert_eq!(
        provider.get_by_idempotency(&session, &stream, &key, None).await.unwrap().version,
        version
    );
}

async fn session_exclusivity(provider: &impl StoreProvider<String>) {
    let stream = StreamId::new("exclusive").unwrap();
    let a = provider.open_session(&stream, None, None).await.unwrap();

    let bogus = SessionId::new("someone-else").unwrap();
    let err = provider.get_version(&bogus, &stream, None).await.unwrap_err();
    assert!(matches!(err, StreamError::InvalidSession(_)));

    provider.close_session(&a, &stream, None).await.unwrap();
    let b = provider.open_session(&stream, None, None).await.unwrap();
    assert_ne!(a, b);
}

async fn slice_bounds_report_expected_versions(provider: &impl StoreProvider<String>) {
    let stream = StreamId::new("slice").unwrap();
    let session = provider.open_session(&stream, None, None).await.unwrap();
    for key in ["a", "b", "c", "d", "e"] {
        provider
            .append_with_idempotency(&session, &stream, IdempotencyKey::new(key).unwrap(), key.to_string(), None)
            .await
            .unwrap();
    }
    for v in 2..=4u64 {
        let item = provider.get_by_version(&session, &stream, v, None).await.unwrap();
        assert_eq!(item.version, v);
    }
}

async fn snapshot_bounds_allow_one_to_current(provider: &impl StoreProvider<String>) {
    let stream = StreamId::new("snap-bounds").unwrap();
    let session = provider.open_session(&stream, None, None).await.unwrap();
    provider
        .append_with_idempotency(&session, &stream, IdempotencyKey::new("a").unwrap(), "1".to_string(), None)
        .await
        .unwrap();

    let at_current = Item::new(IdempotencyKey::new("snap").unwrap(), 1, "x".to_string()).unwrap();
    provider.set_snapshot(&session, &stream, at_current, None).await.unwrap();

    let too_low = Item::new(IdempotencyKey::new("snap0").unwrap(), 0, "x".to_string());
    // version 0 is rejected by Item::new itself (BadArgument), never reaches the provider.
    assert!(too_low.is_err());

    let too_high = Item::new(IdempotencyKey::new("snap2").unwrap(), 2, "x".to_string()).unwrap();
    assert!(provider.set_snapshot(&session, &stream, too_high, None).await.is_err());
}

macro_rules! backend_suite {
    ($name:ident, $make:expr) => {
        #[tokio::test]
        async fn $name() {
            let provider = $make;
            monotonic_dense_versioning(&provider).await;
            duplicate_idempotency_leaves_stream_unchanged(&provider).await;
            round_trip_by_version_and_key(&provider).await;
            session_exclusivity(&provider).await;
            slice_bounds_report_expected_versions(&provider).await;
            snapshot_bounds_allow_one_to_current(&provider).await;
        }
    };
}

backend_suite!(
    in_memory_provider_satisfies_shared_invariants,
    InMemoryProvider::<String>::new(Arc::new(SystemClock), Arc::new(UuidUniqueId))
);

backend_suite!(file_provider_satisfies_shared_invariants, {
    let dir = tempdir().unwrap();
    // Leaked on purpose: the suite macro needs an owned, 'static-free value
    // and the temp directory must outlive every operation in this test.
    let path = dir.into_path();
    FileProvider::<String, JsonSerializer<String>>::new(
        path,
        JsonSerializer::new(),
        Arc::new(SystemClock),
        Arc::new(UuidUniqueId),
    )
});
