//! Core domain types for the versioned append-only stream store.
//!
//! This crate has no storage code in it: it is the vocabulary shared by the
//! `streams-providers` and `streams-handle` crates: items, identifiers, the
//! shared error taxonomy, and the external collaborator contracts
//! (`Clock`, `UniqueId`, `Serializer`) that a host application plugs in.

pub mod clock;
pub mod error;
pub mod ids;
pub mod item;
pub mod serializer;
pub mod unique_id;

pub use clock::{Clock, SystemClock};
pub use error::StreamError;
pub use ids::{IdempotencyKey, SessionId, StreamId};
pub use item::{Item, Snapshot, StreamResult};
pub use serializer::{JsonSerializer, Serializer};
pub use unique_id::{UniqueId, UuidUniqueId};

#[cfg(feature = "testing")]
pub use clock::MockClock;
#[cfg(feature = "testing")]
pub use unique_id::MockUniqueId;
