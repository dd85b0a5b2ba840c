//! The shared error taxonomy surfaced verbatim by every layer of the store.
//!
//! A `Handle` performs no translation on `Provider` failures: whatever a
//! `Provider` returns, a `Handle` returns. Keeping every kind in one enum
//! (rather than one enum per operation, as a CRUD repository layer might)
//! is deliberate: callers match on `StreamError` once, not per call site.

use thiserror::Error;

use crate::ids::SessionId;

/// Errors produced by a `Provider` or `Handle` operation.
#[derive(Debug, Error)]
pub enum StreamError {
    /// `session_id` is not registered for the stream, or has expired.
    #[error("session {0} is not active for this stream")]
    InvalidSession(SessionId),

    /// `open_session` exceeded its retry budget.
    #[error("timed out waiting for a session lock")]
    SessionTimeout,

    /// Cancellation was observed at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// No item exists at the requested version.
    #[error("no item at version {0}")]
    VersionNotFound(u64),

    /// No item exists for the requested idempotency key.
    #[error("no item for idempotency key {0:?}")]
    IdempotencyNotFound(String),

    /// No snapshot exists at the requested version.
    #[error("no snapshot at version {0}")]
    SnapshotVersionNotFound(u64),

    /// The version of an appended item did not match the next expected version.
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// An item with this idempotency key already exists in the stream.
    #[error("idempotency key {key:?} already used at version {existing_version}")]
    DuplicateIdempotency { key: String, existing_version: u64 },

    /// More than one on-disk file matched a version or idempotency-key glob.
    ///
    /// Fatal: the on-disk layout promises at most one match per (version) or
    /// (idempotency key), so this means the store was tampered with or
    /// corrupted outside of this crate. There is no auto-repair.
    #[error("more than one file on disk matches {0:?}; the store is corrupted")]
    DuplicateOnDisk(String),

    /// A caller-supplied argument was invalid (empty id, out-of-range version, ...).
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// A required configuration setting was not present at construction time.
    #[error("missing required configuration: {0}")]
    ConfigMissing(String),

    /// The underlying storage medium failed.
    #[error("storage I/O failure")]
    IoFailure(#[source] std::io::Error),
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        Self::IoFailure(err)
    }
}
