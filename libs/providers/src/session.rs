//! The session lease record shared by both `Provider` variants.
//!
//! A session is "the same thing" whether it lives in an in-process
//! `HashMap` entry or a `lock.json` file: an opaque id plus an expiry
//! instant. This module is the one place that decides what "expired" means
//! and how long to back off between acquisition retries, so the two
//! `Provider` implementations can't drift on that behavior.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use streams_domain::{SessionId, StreamError};

/// Default session lifetime and `open_session` retry budget when the host
/// does not configure `LockTimeout` (spec default: one minute).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `open_session` sleeps between polls of a contended lock.
pub const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Checked at every suspension point (not just between batch items): each
/// per-version read/write in a loop gets its own chance to observe
/// cancellation rather than running the loop to completion first.
pub fn check_cancelled(cancel: &Option<CancellationToken>) -> Result<(), StreamError> {
    if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
        return Err(StreamError::Cancelled);
    }
    Ok(())
}

/// The record persisted (in memory, or as `lock.json`) to represent a held
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    #[must_use]
    pub fn new(session_id: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    #[must_use]
    pub fn matches(&self, session_id: &SessionId) -> bool {
        self.session_id == session_id.as_str()
    }
}
