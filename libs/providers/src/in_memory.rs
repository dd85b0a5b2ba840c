//! The in-memory `Provider` (spec §4.1.a).
//!
//! All state lives behind one `Mutex`; every operation is a short critical
//! section. `open_session` is the only operation that suspends; it polls
//! the lock table with a short sleep between attempts rather than holding
//! the mutex across the wait.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use streams_domain::{Clock, IdempotencyKey, Item, SessionId, StreamError, StreamId, UniqueId};

use crate::provider::StoreProvider;
use crate::session::{check_cancelled, SessionRecord, ACQUIRE_POLL_INTERVAL, DEFAULT_LOCK_TIMEOUT};

struct StreamState<T> {
    items: BTreeMap<u64, Item<T>>,
    idempotency: HashMap<String, u64>,
    snapshots: BTreeMap<u64, Item<T>>,
    session: Option<SessionRecord>,
}

impl<T> Default for StreamState<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            idempotency: HashMap::new(),
            snapshots: BTreeMap::new(),
            session: None,
        }
    }
}

/// A `Provider` backed entirely by process memory. Nothing survives
/// restart; useful for tests and for hosts that don't need durability.
pub struct InMemoryProvider<T> {
    clock: Arc<dyn Clock>,
    unique_id: Arc<dyn UniqueId>,
    lock_timeout: Duration,
    streams: Mutex<HashMap<String, StreamState<T>>>,
}

impl<T> InMemoryProvider<T> {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, unique_id: Arc<dyn UniqueId>) -> Self {
        Self::with_lock_timeout(clock, unique_id, DEFAULT_LOCK_TIMEOUT)
    }

    #[must_use]
    pub fn with_lock_timeout(
        clock: Arc<dyn Clock>,
        unique_id: Arc<dyn UniqueId>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            clock,
            unique_id,
            lock_timeout,
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn validate(&self, session_id: &SessionId, stream_id: &StreamId) -> Result<(), StreamError> {
        let streams = self.streams.lock().unwrap();
        let now = self.clock.now();
        match streams.get(stream_id.as_str()) {
            Some(state) => match &state.session {
                Some(record) if record.matches(session_id) && !record.is_expired(now) => Ok(()),
                _ => Err(StreamError::InvalidSession(session_id.clone())),
            },
            None => Err(StreamError::InvalidSession(session_id.clone())),
        }
    }
}

#[async_trait]
impl<T> StoreProvider<T> for InMemoryProvider<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn open_session(
        &self,
        stream_id: &StreamId,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<SessionId, StreamError> {
        let budget = timeout.unwrap_or(self.lock_timeout);
        let deadline = self.clock.now() + chrono::Duration::from_std(budget).unwrap_or_default();

        loop {
            if let Some(token) = &cancel {
                if token.is_cancelled() {
                    return Err(StreamError::Cancelled);
                }
            }

            {
                let mut streams = self.streams.lock().unwrap();
                let now = self.clock.now();
                let state = streams.entry(stream_id.to_string()).or_default();
                let held = state
                    .session
                    .as_ref()
                    .is_some_and(|record| !record.is_expired(now));
                if !held {
                    let session_id = self.unique_id.new_string();
                    let expires_at = now + chrono::Duration::from_std(self.lock_timeout).unwrap_or_default();
                    state.session = Some(SessionRecord::new(session_id.clone(), expires_at));
                    return SessionId::new(session_id);
                }
            }

            if self.clock.now() >= deadline {
                return Err(StreamError::SessionTimeout);
            }

            match &cancel {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(ACQUIRE_POLL_INTERVAL) => {}
                        _ = token.cancelled() => return Err(StreamError::Cancelled),
                    }
                }
                None => tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await,
            }
        }
    }

    async fn close_session(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        check_cancelled(&cancel)?;
        let mut streams = self.streams.lock().unwrap();
        match streams.get_mut(stream_id.as_str()) {
            Some(state) if state.session.as_ref().is_some_and(|r| r.matches(session_id)) => {
                state.session = None;
            }
            _ => {
                tracing::warn!(%session_id, %stream_id, "closing unknown or already-expired session");
            }
        }
        Ok(())
    }

    async fn get_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: Option<CancellationToken>,
    ) -> Result<u64, StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let streams = self.streams.lock().unwrap();
        Ok(streams
            .get(stream_id.as_str())
            .and_then(|s| s.items.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn get_by_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let streams = self.streams.lock().unwrap();
        streams
            .get(stream_id.as_str())
            .and_then(|s| s.items.get(&version))
            .cloned()
            .ok_or(StreamError::VersionNotFound(version))
    }

    async fn get_by_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: &IdempotencyKey,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let streams = self.streams.lock().unwrap();
        let state = streams
            .get(stream_id.as_str())
            .ok_or_else(|| StreamError::IdempotencyNotFound(key.to_string()))?;
        let version = state
            .idempotency
            .get(key.as_str())
            .ok_or_else(|| StreamError::IdempotencyNotFound(key.to_string()))?;
        state
            .items
            .get(version)
            .cloned()
            .ok_or_else(|| StreamError::IdempotencyNotFound(key.to_string()))
    }

    async fn append(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let mut streams = self.streams.lock().unwrap();
        let state = streams.entry(stream_id.to_string()).or_default();

        if let Some(&existing_version) = state.idempotency.get(item.idempotency_key.as_str()) {
            return Err(StreamError::DuplicateIdempotency {
                key: item.idempotency_key.to_string(),
                existing_version,
            });
        }

        let current = state.items.keys().next_back().copied().unwrap_or(0);
        if item.version != current + 1 {
            return Err(StreamError::VersionMismatch {
                expected: current + 1,
                actual: item.version,
            });
        }

        state
            .idempotency
            .insert(item.idempotency_key.to_string(), item.version);
        state.items.insert(item.version, item);
        Ok(())
    }

    async fn append_with_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: IdempotencyKey,
        payload: T,
        cancel: Option<CancellationToken>,
    ) -> Result<u64, StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let mut streams = self.streams.lock().unwrap();
        let state = streams.entry(stream_id.to_string()).or_default();

        if let Some(&existing_version) = state.idempotency.get(key.as_str()) {
            return Err(StreamError::DuplicateIdempotency {
                key: key.to_string(),
                existing_version,
            });
        }

        let next = state.items.keys().next_back().copied().unwrap_or(0) + 1;
        let item = Item {
            idempotency_key: key.clone(),
            version: next,
            payload,
        };
        state.idempotency.insert(key.to_string(), next);
        state.items.insert(next, item);
        Ok(next)
    }

    async fn get_snapshot_versions(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<u64>, StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let streams = self.streams.lock().unwrap();
        Ok(streams
            .get(stream_id.as_str())
            .map(|s| s.snapshots.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn get_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let streams = self.streams.lock().unwrap();
        streams
            .get(stream_id.as_str())
            .and_then(|s| s.snapshots.get(&version))
            .cloned()
            .ok_or(StreamError::SnapshotVersionNotFound(version))
    }

    async fn set_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let mut streams = self.streams.lock().unwrap();
        let state = streams.entry(stream_id.to_string()).or_default();
        let current = state.items.keys().next_back().copied().unwrap_or(0);
        if item.version < 1 || item.version > current {
            return Err(StreamError::BadArgument(format!(
                "snapshot version {} out of range 1..={current}",
                item.version
            )));
        }
        state.snapshots.insert(item.version, item);
        Ok(())
    }

    async fn remove_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        self.validate(session_id, stream_id)?;
        check_cancelled(&cancel)?;
        let mut streams = self.streams.lock().unwrap();
        if let Some(state) = streams.get_mut(stream_id.as_str()) {
            if state.snapshots.remove(&version).is_none() {
                tracing::debug!(%stream_id, version, "remove_snapshot: no snapshot at this version");
            }
        }
        Ok(())
    }
}
