//! The immutable unit of a stream: `Item`, and the shapes built from it.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::ids::IdempotencyKey;

/// An immutable `(idempotency_key, version, payload)` triple.
///
/// `version` of the N-th item appended to a stream equals N; `idempotency_key`
/// is unique within its stream. Items are never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item<T> {
    pub idempotency_key: IdempotencyKey,
    pub version: u64,
    pub payload: T,
}

impl<T> Item<T> {
    /// Construct an item for version 1..N, validating `version >= 1`.
    pub fn new(
        idempotency_key: IdempotencyKey,
        version: u64,
        payload: T,
    ) -> Result<Self, StreamError> {
        if version == 0 {
            return Err(StreamError::BadArgument(
                "item version must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            idempotency_key,
            version,
            payload,
        })
    }
}

/// A snapshot is an `Item` whose `version` is the highest version it
/// summarizes and whose `idempotency_key` is caller-chosen (the store does
/// not enforce idempotency-key uniqueness across the snapshot namespace).
pub type Snapshot<T> = Item<T>;

/// The result of a full or partial stream read.
///
/// `version` is the highest item version included, or, for an empty
/// result, the stream's current version (so callers can distinguish "no
/// items because the stream is empty" from "no items in this slice").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResult<T> {
    pub items: Vec<Item<T>>,
    pub version: u64,
}

impl<T> StreamResult<T> {
    #[must_use]
    pub fn empty(current_version: u64) -> Self {
        Self {
            items: Vec::new(),
            version: current_version,
        }
    }
}
