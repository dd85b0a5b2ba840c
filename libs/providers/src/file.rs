//! The filesystem `Provider` (spec §4.1.b, §6).
//!
//! Layout under `root`:
//!
//! ```text
//! <root>/<stream_id>/lock.json
//! <root>/<stream_id>/Data/<version>.<idempotency_key>.<format_tag>
//! <root>/<stream_id>/Data/Snapshots/<version>.<format_tag>
//! ```
//!
//! There is no secondary index: `get_version`, `get_by_idempotency`, and
//! `get_snapshot_versions` all work by scanning a directory and parsing file
//! names. `lock.json` is a CAS cell, not a held file descriptor: an
//! `open_session` attempt takes the OS lock just long enough to read, check,
//! and (if free) overwrite the lease record, then releases it; the lease
//! itself is enforced by comparing `expires_at` to the clock, exactly as in
//! [`crate::in_memory::InMemoryProvider`].
//!
//! Every disk access runs on the blocking thread pool via
//! `tokio::task::spawn_blocking`: a directory scan or file read here must
//! never stall the worker thread other streams' `await`s are scheduled on.
//! `Inner` holds the owned, `Clone`-via-`Arc` state a blocking closure needs;
//! `FileProvider` is the thin async-trait face over it.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fs4::FileExt;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use streams_domain::{
    Clock, IdempotencyKey, Item, Serializer, SessionId, StreamError, StreamId, UniqueId,
};

use crate::provider::StoreProvider;
use crate::session::{check_cancelled, SessionRecord, ACQUIRE_POLL_INTERVAL, DEFAULT_LOCK_TIMEOUT};

const DATA_DIR: &str = "Data";
const SNAPSHOTS_DIR: &str = "Snapshots";
const LOCK_FILE: &str = "lock.json";

fn join_err(e: JoinError) -> StreamError {
    StreamError::IoFailure(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

/// The blocking-safe state behind a [`FileProvider`]: owned paths and
/// `Arc`/`Copy` collaborators, cheap to clone into a `spawn_blocking`
/// closure without requiring `S: Clone`.
struct Inner<T, S> {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    unique_id: Arc<dyn UniqueId>,
    lock_timeout: Duration,
    serializer: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> Inner<T, S>
where
    S: Serializer<T>,
{
    fn stream_dir(&self, stream_id: &StreamId) -> Result<PathBuf, StreamError> {
        if !stream_id.is_single_path_segment() {
            return Err(StreamError::BadArgument(format!(
                "stream id {stream_id:?} is not a safe path segment"
            )));
        }
        Ok(self.root.join(stream_id.as_str()))
    }

    fn data_dir(&self, stream_id: &StreamId) -> Result<PathBuf, StreamError> {
        Ok(self.stream_dir(stream_id)?.join(DATA_DIR))
    }

    fn snapshots_dir(&self, stream_id: &StreamId) -> Result<PathBuf, StreamError> {
        Ok(self.data_dir(stream_id)?.join(SNAPSHOTS_DIR))
    }

    fn lock_path(&self, stream_id: &StreamId) -> Result<PathBuf, StreamError> {
        Ok(self.stream_dir(stream_id)?.join(LOCK_FILE))
    }

    fn ensure_layout(&self, stream_id: &StreamId) -> Result<(), StreamError> {
        fs::create_dir_all(self.snapshots_dir(stream_id)?)?;
        Ok(())
    }

    fn data_filename(&self, version: u64, key: &str) -> String {
        format!("{version}.{key}.{}", self.serializer.format_tag())
    }

    fn parse_data_filename(&self, name: &str) -> Option<(u64, String)> {
        let suffix = format!(".{}", self.serializer.format_tag());
        let body = name.strip_suffix(&suffix)?;
        let (version_str, key) = body.split_once('.')?;
        let version = version_str.parse::<u64>().ok()?;
        Some((version, key.to_string()))
    }

    fn snapshot_filename(&self, version: u64) -> String {
        format!("{version}.{}", self.serializer.format_tag())
    }

    fn parse_snapshot_filename(&self, name: &str) -> Option<u64> {
        let suffix = format!(".{}", self.serializer.format_tag());
        name.strip_suffix(&suffix)?.parse::<u64>().ok()
    }

    /// Reads the current lease record, if `lock.json` exists and parses.
    fn read_lease(&self, stream_id: &StreamId) -> Result<Option<SessionRecord>, StreamError> {
        let path = self.lock_path(stream_id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StreamError::from(e)),
        }
    }

    fn write_lease(&self, stream_id: &StreamId, record: &SessionRecord) -> Result<(), StreamError> {
        let path = self.lock_path(stream_id)?;
        let bytes = serde_json::to_vec(record)
            .map_err(|e| StreamError::BadArgument(format!("lease encode failed: {e}")))?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Validates that `session_id` currently holds an unexpired lease on
    /// `stream_id`. Every non-`open_session`/`close_session` method starts
    /// here.
    fn validate(&self, session_id: &SessionId, stream_id: &StreamId) -> Result<(), StreamError> {
        match self.read_lease(stream_id)? {
            Some(record) if record.matches(session_id) && !record.is_expired(self.clock.now()) => {
                Ok(())
            }
            _ => Err(StreamError::InvalidSession(session_id.clone())),
        }
    }

    /// One `open_session` attempt: takes the lock file just long enough to
    /// read, check, and (if free) overwrite the lease. Returns the new
    /// session on success, `None` if another session currently holds it.
    fn try_acquire(&self, stream_id: &StreamId) -> Result<Option<SessionId>, StreamError> {
        self.ensure_layout(stream_id)?;
        let lock_path = self.lock_path(stream_id)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        let now = self.clock.now();
        let held = self
            .read_lease(stream_id)?
            .is_some_and(|record| !record.is_expired(now));

        if held {
            let _ = FileExt::unlock(&lock_file);
            return Ok(None);
        }

        let session_id = self.unique_id.new_string();
        let expires_at = now + chrono::Duration::from_std(self.lock_timeout).unwrap_or_default();
        let record = SessionRecord::new(session_id.clone(), expires_at);
        let write_result = self.write_lease(stream_id, &record);
        let _ = FileExt::unlock(&lock_file);
        write_result?;
        Ok(Some(SessionId::new(session_id)?))
    }

    fn close_session(&self, session_id: &SessionId, stream_id: &StreamId) -> Result<(), StreamError> {
        match self.read_lease(stream_id)? {
            Some(record) if record.matches(session_id) => {
                let path = self.lock_path(stream_id)?;
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(StreamError::from(e));
                    }
                }
            }
            _ => {
                tracing::warn!(%session_id, %stream_id, "closing unknown or already-expired session");
            }
        }
        Ok(())
    }

    fn current_version(
        &self,
        stream_id: &StreamId,
        cancel: &Option<CancellationToken>,
    ) -> Result<u64, StreamError> {
        let dir = self.data_dir(stream_id)?;
        if !dir.exists() {
            return Ok(0);
        }
        let mut max = 0u64;
        for entry in fs::read_dir(&dir)? {
            check_cancelled(cancel)?;
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((version, _key)) = self.parse_data_filename(name) {
                max = max.max(version);
            }
        }
        Ok(max)
    }

    fn find_by_version(
        &self,
        stream_id: &StreamId,
        version: u64,
        cancel: &Option<CancellationToken>,
    ) -> Result<Option<PathBuf>, StreamError> {
        let dir = self.data_dir(stream_id)?;
        if !dir.exists() {
            return Ok(None);
        }
        let mut found = None;
        for entry in fs::read_dir(&dir)? {
            check_cancelled(cancel)?;
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((v, _)) = self.parse_data_filename(name) {
                if v == version {
                    if found.is_some() {
                        return Err(StreamError::DuplicateOnDisk(format!("version {version}")));
                    }
                    found = Some(entry.path());
                }
            }
        }
        Ok(found)
    }

    fn find_by_key(
        &self,
        stream_id: &StreamId,
        key: &str,
        cancel: &Option<CancellationToken>,
    ) -> Result<Option<PathBuf>, StreamError> {
        let dir = self.data_dir(stream_id)?;
        if !dir.exists() {
            return Ok(None);
        }
        let mut found = None;
        for entry in fs::read_dir(&dir)? {
            check_cancelled(cancel)?;
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((_, k)) = self.parse_data_filename(name) {
                if k == key {
                    if found.is_some() {
                        return Err(StreamError::DuplicateOnDisk(format!("idempotency key {key:?}")));
                    }
                    found = Some(entry.path());
                }
            }
        }
        Ok(found)
    }

    fn read_item(&self, path: &Path) -> Result<Item<T>, StreamError> {
        let bytes = fs::read(path)?;
        self.serializer.decode(&bytes)
    }

    fn write_item_exclusive(&self, path: &Path, item: &Item<T>) -> Result<(), StreamError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StreamError::DuplicateOnDisk(path.display().to_string())
                } else {
                    StreamError::from(e)
                }
            })?;
        let bytes = self.serializer.encode(item)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    fn get_version(&self, stream_id: &StreamId, cancel: &Option<CancellationToken>) -> Result<u64, StreamError> {
        self.current_version(stream_id, cancel)
    }

    fn get_by_version(
        &self,
        stream_id: &StreamId,
        version: u64,
        cancel: &Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError> {
        match self.find_by_version(stream_id, version, cancel)? {
            Some(path) => self.read_item(&path),
            None => Err(StreamError::VersionNotFound(version)),
        }
    }

    fn get_by_idempotency(
        &self,
        stream_id: &StreamId,
        key: &str,
        cancel: &Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError> {
        match self.find_by_key(stream_id, key, cancel)? {
            Some(path) => self.read_item(&path),
            None => Err(StreamError::IdempotencyNotFound(key.to_string())),
        }
    }

    fn append(&self, stream_id: &StreamId, item: Item<T>, cancel: &Option<CancellationToken>) -> Result<(), StreamError> {
        if let Some(path) = self.find_by_key(stream_id, item.idempotency_key.as_str(), cancel)? {
            let existing_version = self.read_item(&path)?.version;
            return Err(StreamError::DuplicateIdempotency {
                key: item.idempotency_key.to_string(),
                existing_version,
            });
        }
        let current = self.current_version(stream_id, cancel)?;
        if item.version != current + 1 {
            return Err(StreamError::VersionMismatch {
                expected: current + 1,
                actual: item.version,
            });
        }
        let dir = self.data_dir(stream_id)?;
        let path = dir.join(self.data_filename(item.version, item.idempotency_key.as_str()));
        self.write_item_exclusive(&path, &item)
    }

    fn append_with_idempotency(
        &self,
        stream_id: &StreamId,
        key: IdempotencyKey,
        payload: T,
        cancel: &Option<CancellationToken>,
    ) -> Result<u64, StreamError> {
        if let Some(path) = self.find_by_key(stream_id, key.as_str(), cancel)? {
            let existing_version = self.read_item(&path)?.version;
            return Err(StreamError::DuplicateIdempotency {
                key: key.to_string(),
                existing_version,
            });
        }
        let next = self.current_version(stream_id, cancel)? + 1;
        let item = Item {
            idempotency_key: key.clone(),
            version: next,
            payload,
        };
        let dir = self.data_dir(stream_id)?;
        let path = dir.join(self.data_filename(next, key.as_str()));
        self.write_item_exclusive(&path, &item)?;
        Ok(next)
    }

    fn get_snapshot_versions(
        &self,
        stream_id: &StreamId,
        cancel: &Option<CancellationToken>,
    ) -> Result<Vec<u64>, StreamError> {
        let dir = self.snapshots_dir(stream_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            check_cancelled(cancel)?;
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(v) = self.parse_snapshot_filename(name) {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn get_snapshot(&self, stream_id: &StreamId, version: u64) -> Result<Item<T>, StreamError> {
        let path = self.snapshots_dir(stream_id)?.join(self.snapshot_filename(version));
        if !path.exists() {
            return Err(StreamError::SnapshotVersionNotFound(version));
        }
        self.read_item(&path)
    }

    fn set_snapshot(
        &self,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: &Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        let current = self.current_version(stream_id, cancel)?;
        if item.version < 1 || item.version > current {
            return Err(StreamError::BadArgument(format!(
                "snapshot version {} out of range 1..={current}",
                item.version
            )));
        }
        let path = self.snapshots_dir(stream_id)?.join(self.snapshot_filename(item.version));
        let bytes = self.serializer.encode(&item)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    fn remove_snapshot(&self, stream_id: &StreamId, version: u64) -> Result<(), StreamError> {
        let path = self.snapshots_dir(stream_id)?.join(self.snapshot_filename(version));
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(StreamError::from(e));
            }
            tracing::debug!(%stream_id, version, "remove_snapshot: no snapshot at this version");
        }
        Ok(())
    }
}

/// A `Provider` backed by a directory tree, one subdirectory per stream.
pub struct FileProvider<T, S> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> FileProvider<T, S>
where
    S: Serializer<T>,
{
    pub fn new(root: impl Into<PathBuf>, serializer: S, clock: Arc<dyn Clock>, unique_id: Arc<dyn UniqueId>) -> Self {
        Self::with_lock_timeout(root, serializer, clock, unique_id, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(
        root: impl Into<PathBuf>,
        serializer: S,
        clock: Arc<dyn Clock>,
        unique_id: Arc<dyn UniqueId>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                clock,
                unique_id,
                lock_timeout,
                serializer,
                _marker: PhantomData,
            }),
        }
    }
}

#[async_trait]
impl<T, S> StoreProvider<T> for FileProvider<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Serializer<T> + Send + Sync + 'static,
{
    async fn open_session(
        &self,
        stream_id: &StreamId,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<SessionId, StreamError> {
        check_cancelled(&cancel)?;
        let budget = timeout.unwrap_or(self.inner.lock_timeout);
        let deadline = self.inner.clock.now() + chrono::Duration::from_std(budget).unwrap_or_default();

        loop {
            check_cancelled(&cancel)?;

            let inner = Arc::clone(&self.inner);
            let stream_id_owned = stream_id.clone();
            let attempt = tokio::task::spawn_blocking(move || inner.try_acquire(&stream_id_owned))
                .await
                .map_err(join_err)??;

            if let Some(session_id) = attempt {
                return Ok(session_id);
            }

            if self.inner.clock.now() >= deadline {
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
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || inner.close_session(&session_id, &stream_id))
            .await
            .map_err(join_err)?
    }

    async fn get_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: Option<CancellationToken>,
    ) -> Result<u64, StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.get_version(&stream_id, &cancel)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_by_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.get_by_version(&stream_id, version, &cancel)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_by_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: &IdempotencyKey,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.get_by_idempotency(&stream_id, key.as_str(), &cancel)
        })
        .await
        .map_err(join_err)?
    }

    async fn append(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.append(&stream_id, item, &cancel)
        })
        .await
        .map_err(join_err)?
    }

    async fn append_with_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: IdempotencyKey,
        payload: T,
        cancel: Option<CancellationToken>,
    ) -> Result<u64, StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.append_with_idempotency(&stream_id, key, payload, &cancel)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_snapshot_versions(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<u64>, StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.get_snapshot_versions(&stream_id, &cancel)
        })
        .await
        .map_err(join_err)?
    }

    async fn get_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.get_snapshot(&stream_id, version)
        })
        .await
        .map_err(join_err)?
    }

    async fn set_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.set_snapshot(&stream_id, item, &cancel)
        })
        .await
        .map_err(join_err)?
    }

    async fn remove_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError> {
        check_cancelled(&cancel)?;
        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let stream_id = stream_id.clone();
        tokio::task::spawn_blocking(move || {
            inner.validate(&session_id, &stream_id)?;
            inner.remove_snapshot(&stream_id, version)
        })
        .await
        .map_err(join_err)?
    }
}
