//! The `StoreProvider` capability set (spec §4.1).
//!
//! Every operation except `open_session` takes a `session_id`, which the
//! implementation validates against its own active-session table before
//! doing any work; that validation is the single gate: no matching
//! session, no read or write, full stop.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use streams_domain::{IdempotencyKey, Item, SessionId, StreamError, StreamId};

/// Low-level, per-stream storage primitive. Implemented by
/// [`crate::in_memory::InMemoryProvider`] and [`crate::file::FileProvider`].
///
/// `T` is the opaque payload type; a `StoreProvider` never inspects it other
/// than handing it to a `Serializer` (the file backend) or cloning it in
/// place (the in-memory backend).
#[async_trait]
pub trait StoreProvider<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Acquires exclusive, time-limited access to `stream_id`. Retries
    /// while another session holds the stream, up to `timeout` (or the
    /// provider's configured `lock_timeout` if `timeout` is `None`).
    async fn open_session(
        &self,
        stream_id: &StreamId,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<SessionId, StreamError>;

    /// Releases a session. Closing an unknown or already-expired session is
    /// idempotent: it logs and returns `Ok`.
    async fn close_session(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError>;

    /// The current max version, or 0 if the stream has no items.
    async fn get_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: Option<CancellationToken>,
    ) -> Result<u64, StreamError>;

    async fn get_by_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError>;

    async fn get_by_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: &IdempotencyKey,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError>;

    /// Appends `item` at its own declared version. Fails with
    /// `DuplicateIdempotency` if the key is already used, or
    /// `VersionMismatch` if `item.version != current + 1`.
    async fn append(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError>;

    /// Assigns the next version atomically and appends. Returns the
    /// assigned version.
    async fn append_with_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: IdempotencyKey,
        payload: T,
        cancel: Option<CancellationToken>,
    ) -> Result<u64, StreamError>;

    /// Ascending snapshot versions; empty if none exist.
    async fn get_snapshot_versions(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<u64>, StreamError>;

    async fn get_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<Item<T>, StreamError>;

    /// Overwrites any existing snapshot at `item.version`. Fails if
    /// `item.version < 1` or `> current_version`.
    async fn set_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError>;

    /// Idempotent: removing an absent snapshot is not an error.
    async fn remove_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<(), StreamError>;
}
