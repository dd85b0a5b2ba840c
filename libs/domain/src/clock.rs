//! The `Clock` collaborator contract.
//!
//! Providers never call `chrono::Utc::now()` directly; they go through a
//! `Clock` so that session-expiry logic can be driven by a fake clock in
//! tests instead of sleeping in real time.

use chrono::{DateTime, Utc};

/// Returns the current instant. Monotonicity is not required; wall clock
/// suffices, matching the session-expiry use case (comparing against an
/// absolute `expires_at`).
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The default `Clock`, backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
