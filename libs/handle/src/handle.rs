//! The per-stream façade: hides session management behind `append`/`read_*`/
//! `snapshot*` operations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use streams_domain::{IdempotencyKey, Item, SessionId, StreamError, StreamId, StreamResult};
use streams_providers::{check_cancelled, StoreProvider, DEFAULT_LOCK_TIMEOUT};

/// `Fresh → Open → Closed`. A session is acquired lazily on the first
/// operation and released only on explicit [`StreamHandle::close`]; there is
/// no drop-time cleanup, so callers that care about releasing a lease
/// promptly must call `close`.
enum HandleState {
    Fresh,
    Open(SessionId),
    Closed,
}

/// The high-level, per-stream API layered over a [`StoreProvider`].
///
/// Obtained from a [`crate::Store`] registry rather than constructed
/// directly in normal use, though nothing prevents standalone use against a
/// bare provider.
pub struct StreamHandle<T, P> {
    provider: Arc<P>,
    stream_id: StreamId,
    lock_timeout: Duration,
    state: AsyncMutex<HandleState>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, P> StreamHandle<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: StoreProvider<T>,
{
    #[must_use]
    pub fn new(provider: Arc<P>, stream_id: StreamId) -> Self {
        Self::with_lock_timeout(provider, stream_id, DEFAULT_LOCK_TIMEOUT)
    }

    #[must_use]
    pub fn with_lock_timeout(provider: Arc<P>, stream_id: StreamId, lock_timeout: Duration) -> Self {
        Self {
            provider,
            stream_id,
            lock_timeout,
            state: AsyncMutex::new(HandleState::Fresh),
            _marker: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    fn closed_error(&self) -> StreamError {
        StreamError::InvalidSession(
            SessionId::new(format!("closed:{}", self.stream_id)).expect("non-empty"),
        )
    }

    async fn ensure_session(&self, cancel: Option<CancellationToken>) -> Result<SessionId, StreamError> {
        let mut guard = self.state.lock().await;
        match &*guard {
            HandleState::Open(session_id) => Ok(session_id.clone()),
            HandleState::Closed => Err(self.closed_error()),
            HandleState::Fresh => {
                let session_id = self
                    .provider
                    .open_session(&self.stream_id, Some(self.lock_timeout), cancel)
                    .await?;
                tracing::debug!(stream_id = %self.stream_id, %session_id, "session opened");
                *guard = HandleState::Open(session_id.clone());
                Ok(session_id)
            }
        }
    }

    /// Releases the held session, if any, and moves to `Closed`. Further
    /// operations fail with `InvalidSession`.
    pub async fn close(&self, cancel: Option<CancellationToken>) -> Result<(), StreamError> {
        let mut guard = self.state.lock().await;
        if let HandleState::Open(session_id) = &*guard {
            self.provider
                .close_session(session_id, &self.stream_id, cancel)
                .await?;
        }
        *guard = HandleState::Closed;
        Ok(())
    }

    pub async fn version(&self, cancel: Option<CancellationToken>) -> Result<u64, StreamError> {
        let session = self.ensure_session(cancel.clone()).await?;
        self.provider.get_version(&session, &self.stream_id, cancel).await
    }

    /// Appends `items` in order, assigning each the next dense version.
    /// Not atomic across items: a mid-batch failure (duplicate key, or a
    /// storage error on the file backend) leaves every item written so far
    /// persisted; `version()` reports the true count.
    pub async fn append(
        &self,
        items: Vec<(IdempotencyKey, T)>,
        cancel: Option<CancellationToken>,
    ) -> Result<u64, StreamError> {
        let session = self.ensure_session(cancel.clone()).await?;
        let mut last_version = self
            .provider
            .get_version(&session, &self.stream_id, cancel.clone())
            .await?;
        for (key, payload) in items {
            check_cancelled(&cancel)?;
            last_version = self
                .provider
                .append_with_idempotency(&session, &self.stream_id, key, payload, cancel.clone())
                .await?;
        }
        Ok(last_version)
    }

    /// Like [`Self::append`], but fails with `VersionMismatch` if the
    /// stream's current version does not equal `expected_version` before
    /// any item is written.
    pub async fn append_with_expected_version(
        &self,
        items: Vec<(IdempotencyKey, T)>,
        expected_version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<u64, StreamError> {
        let session = self.ensure_session(cancel.clone()).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel.clone())
            .await?;
        if current != expected_version {
            return Err(StreamError::VersionMismatch {
                expected: expected_version,
                actual: current,
            });
        }
        self.append(items, cancel).await
    }

    /// Full replay. With `use_snapshot`, returns the highest applicable
    /// snapshot followed by the trailing items; without, replays from
    /// version 1.
    pub async fn read_all(
        &self,
        use_snapshot: bool,
        cancel: Option<CancellationToken>,
    ) -> Result<StreamResult<T>, StreamError> {
        let session = self.ensure_session(cancel.clone()).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel.clone())
            .await?;
        if current == 0 {
            return Ok(StreamResult::empty(0));
        }

        if use_snapshot {
            let versions = self
                .provider
                .get_snapshot_versions(&session, &self.stream_id, cancel.clone())
                .await?;
            if let Some(snapshot_version) = versions.into_iter().filter(|&v| v <= current).max() {
                let snapshot = self
                    .provider
                    .get_snapshot(&session, &self.stream_id, snapshot_version, cancel.clone())
                    .await?;
                let mut items = Vec::with_capacity((current - snapshot_version + 1) as usize);
                items.push(snapshot);
                for v in (snapshot_version + 1)..=current {
                    check_cancelled(&cancel)?;
                    items.push(
                        self.provider
                            .get_by_version(&session, &self.stream_id, v, cancel.clone())
                            .await?,
                    );
                }
                return Ok(StreamResult { items, version: current });
            }
        }

        let mut items = Vec::with_capacity(current as usize);
        for v in 1..=current {
            check_cancelled(&cancel)?;
            items.push(
                self.provider
                    .get_by_version(&session, &self.stream_id, v, cancel.clone())
                    .await?,
            );
        }
        Ok(StreamResult { items, version: current })
    }

    /// Requires `1 ≤ first ≤ last ≤ current`. If `use_snapshot` is `Some(true)`
    /// and a snapshot exists with `first ≤ version < last`, the highest such
    /// snapshot replaces items `[first..version]` in the returned sequence.
    pub async fn read_slice(
        &self,
        first: u64,
        last: u64,
        use_snapshot: Option<bool>,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<Item<T>>, StreamError> {
        let session = self.ensure_session(cancel.clone()).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel.clone())
            .await?;
        if first < 1 || last < first || last > current {
            return Err(StreamError::BadArgument(format!(
                "slice [{first}..{last}] out of range for stream at version {current}"
            )));
        }

        if use_snapshot.unwrap_or(false) {
            let versions = self
                .provider
                .get_snapshot_versions(&session, &self.stream_id, cancel.clone())
                .await?;
            if let Some(snapshot_version) = versions
                .into_iter()
                .filter(|&v| v >= first && v < last)
                .max()
            {
                let snapshot = self
                    .provider
                    .get_snapshot(&session, &self.stream_id, snapshot_version, cancel.clone())
                    .await?;
                let mut items = Vec::with_capacity((last - snapshot_version + 1) as usize);
                items.push(snapshot);
                for v in (snapshot_version + 1)..=last {
                    check_cancelled(&cancel)?;
                    items.push(
                        self.provider
                            .get_by_version(&session, &self.stream_id, v, cancel.clone())
                            .await?,
                    );
                }
                return Ok(items);
            }
        }

        let mut items = Vec::with_capacity((last - first + 1) as usize);
        for v in first..=last {
            check_cancelled(&cancel)?;
            items.push(
                self.provider
                    .get_by_version(&session, &self.stream_id, v, cancel.clone())
                    .await?,
            );
        }
        Ok(items)
    }

    /// Stores a precomputed digest at `version`. Requires `1 ≤ version ≤
    /// current` (the Provider enforces the bound; see `set_snapshot`).
    pub async fn snapshot(
        &self,
        version: u64,
        idempotency_key: IdempotencyKey,
        payload: T,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        let session = self.ensure_session(cancel.clone()).await?;
        let item = Item::new(idempotency_key, version, payload)?;
        self.provider
            .set_snapshot(&session, &self.stream_id, item, cancel)
            .await
    }

    /// `Some(v)` removes the snapshot at `v` (idempotent); `None` removes
    /// every known snapshot.
    pub async fn clear_snapshot(
        &self,
        version: Option<u64>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        let session = self.ensure_session(cancel.clone()).await?;
        match version {
            Some(v) => {
                self.provider
                    .remove_snapshot(&session, &self.stream_id, v, cancel)
                    .await
            }
            None => {
                let versions = self
                    .provider
                    .get_snapshot_versions(&session, &self.stream_id, cancel.clone())
                    .await?;
                for v in versions {
                    check_cancelled(&cancel)?;
                    self.provider
                        .remove_snapshot(&session, &self.stream_id, v, cancel.clone())
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Highest snapshot version `≤ current`, or 0 if none applies.
    pub async fn snapshot_version(&self, cancel: Option<CancellationToken>) -> Result<u64, StreamError> {
        let session = self.ensure_session(cancel.clone()).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel.clone())
            .await?;
        let versions = self
            .provider
            .get_snapshot_versions(&session, &self.stream_id, cancel)
            .await?;
        Ok(versions.into_iter().filter(|&v| v <= current).max().unwrap_or(0))
    }

    /// Clears existing snapshots, then snapshots every `chunk_size`
    /// boundary up to the current version, folding the prefix `[1..k]`
    /// through `fold_fn` to produce each snapshot's idempotency key and
    /// payload.
    pub async fn snapshot_all<F>(
        &self,
        chunk_size: u64,
        fold_fn: F,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError>
    where
        F: Fn(&[Item<T>]) -> (IdempotencyKey, T),
    {
        if chunk_size == 0 {
            return Err(StreamError::BadArgument("chunk_size must be >= 1".to_string()));
        }
        self.clear_snapshot(None, cancel.clone()).await?;
        let current = self.version(cancel.clone()).await?;

        let mut boundary = chunk_size;
        while boundary <= current {
            check_cancelled(&cancel)?;
            let prefix = self.read_slice(1, boundary, Some(false), cancel.clone()).await?;
            let (key, payload) = fold_fn(&prefix);
            self.snapshot(boundary, key, payload, cancel.clone()).await?;
            boundary += chunk_size;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streams_domain::{SystemClock, UuidUniqueId};
    use streams_providers::InMemoryProvider;

    fn handle() -> StreamHandle<String, InMemoryProvider<String>> {
        let provider = Arc::new(InMemoryProvider::new(Arc::new(SystemClock), Arc::new(UuidUniqueId)));
        StreamHandle::new(provider, StreamId::new("orders").unwrap())
    }

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn s1_add_two_items_bumps_version() {
        let h = handle();
        let v = h
            .append(
                vec![(key("idem1"), "data1".to_string()), (key("idem2"), "data2".to_string())],
                None,
            )
            .await
            .unwrap();
        assert_eq!(v, 2);
        assert_eq!(h.version(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn s2_expected_version_append_succeeds_when_matched() {
        let h = handle();
        let v = h
            .append_with_expected_version(vec![(key("idem1"), "data1".to_string())], 0, None)
            .await
            .unwrap();
        assert_eq!(v, 1);
    }

    #[tokio::test]
    async fn s3_expected_version_append_fails_when_mismatched() {
        let h = handle();
        let err = h
            .append_with_expected_version(vec![(key("idem1"), "data1".to_string())], 1, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::VersionMismatch {
                expected: 1,
                actual: 0
            }
        ));
    }

    #[tokio::test]
    async fn s4_snapshot_composes_with_tail() {
        let h = handle();
        h.append(
            vec![
                (key("idem1"), "data1".to_string()),
                (key("idem2"), "data2".to_string()),
                (key("idem3"), "data3".to_string()),
            ],
            None,
        )
        .await
        .unwrap();

        h.snapshot(2, key("snap"), "snap".to_string(), None).await.unwrap();

        let result = h.read_all(true, None).await.unwrap();
        assert_eq!(result.version, 3);
        let payloads: Vec<_> = result.items.iter().map(|i| i.payload.clone()).collect();
        assert_eq!(payloads, vec!["snap".to_string(), "data3".to_string()]);
    }

    #[tokio::test]
    async fn s5_clear_snapshot_restores_full_replay() {
        let h = handle();
        h.append(
            vec![
                (key("idem1"), "data1".to_string()),
                (key("idem2"), "data2".to_string()),
                (key("idem3"), "data3".to_string()),
            ],
            None,
        )
        .await
        .unwrap();
        h.snapshot(2, key("snap"), "snap".to_string(), None).await.unwrap();

        h.clear_snapshot(Some(2), None).await.unwrap();

        let result = h.read_all(true, None).await.unwrap();
        assert_eq!(result.version, 3);
        let payloads: Vec<_> = result.items.iter().map(|i| i.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec!["data1".to_string(), "data2".to_string(), "data3".to_string()]
        );
    }

    #[tokio::test]
    async fn slice_bounds_report_expected_versions() {
        let h = handle();
        h.append(
            vec![
                (key("a"), "1".to_string()),
                (key("b"), "2".to_string()),
                (key("c"), "3".to_string()),
                (key("d"), "4".to_string()),
            ],
            None,
        )
        .await
        .unwrap();

        let slice = h.read_slice(2, 3, None, None).await.unwrap();
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0].version, 2);
        assert_eq!(slice[1].version, 3);
    }

    #[tokio::test]
    async fn mid_batch_duplicate_key_leaves_prior_items_persisted() {
        let h = handle();
        h.append(vec![(key("idem1"), "data1".to_string())], None)
            .await
            .unwrap();

        // idem1 already exists; the batch fails on its second item and the
        // third is never attempted.
        let err = h
            .append(
                vec![
                    (key("idem2"), "data2".to_string()),
                    (key("idem1"), "dup".to_string()),
                    (key("idem3"), "data3".to_string()),
                ],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::DuplicateIdempotency { .. }));

        // idem2 was written before the failure; idem3 never was.
        assert_eq!(h.version(None).await.unwrap(), 2);
        let result = h.read_all(false, None).await.unwrap();
        let payloads: Vec<_> = result.items.iter().map(|i| i.payload.clone()).collect();
        assert_eq!(payloads, vec!["data1".to_string(), "data2".to_string()]);
    }

    #[tokio::test]
    async fn closed_handle_rejects_further_operations() {
        let h = handle();
        h.append(vec![(key("a"), "1".to_string())], None).await.unwrap();
        h.close(None).await.unwrap();
        let err = h.version(None).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn snapshot_all_folds_chunks_and_replaces_existing_snapshots() {
        let h = handle();
        h.append(
            vec![
                (key("a"), "1".to_string()),
                (key("b"), "2".to_string()),
                (key("c"), "3".to_string()),
                (key("d"), "4".to_string()),
            ],
            None,
        )
        .await
        .unwrap();

        h.snapshot_all(
            2,
            |prefix| {
                let folded = prefix.iter().map(|i| i.payload.clone()).collect::<Vec<_>>().join(",");
                (key("fold"), folded)
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(h.snapshot_version(None).await.unwrap(), 4);
        let snap_versions_result = h.read_all(true, None).await.unwrap();
        assert_eq!(snap_versions_result.items[0].payload, "1,2,3,4");
    }

    #[tokio::test]
    async fn append_observes_cancellation_before_first_item() {
        let h = handle();
        let token = CancellationToken::new();
        token.cancel();
        let err = h
            .append(vec![(key("idem1"), "data1".to_string())], Some(token))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Cancelled));
    }
}
