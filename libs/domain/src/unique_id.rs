//! The `UniqueId` collaborator contract, used to mint session identifiers.

use uuid::Uuid;

/// Returns an opaque, collision-resistant string. Used only for session ids
/// stream ids and idempotency keys are always caller-supplied.
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait UniqueId: Send + Sync {
    fn new_string(&self) -> String;
}

/// The default `UniqueId`, backed by a random (v4) UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidUniqueId;

impl UniqueId for UuidUniqueId {
    fn new_string(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
