//! Validated string identifiers.
//!
//! Stream ids, idempotency keys, and session ids are all caller- or
//! collaborator-supplied strings rather than generated UUIDs, so the
//! validation these newtypes centralize is simpler than a prefixed-UUID
//! scheme: non-empty, and (for stream ids) safe to use as a single path
//! segment on the host filesystem.

use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StreamError;

macro_rules! define_string_id {
    ($name:ident, $what:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a caller-supplied string.
            pub fn new(value: impl Into<String>) -> Result<Self, StreamError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(StreamError::BadArgument(format!(
                        "{} must not be empty",
                        $what
                    )));
                }
                Ok(Self(value))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_string_id!(StreamId, "stream id");
define_string_id!(SessionId, "session id");
define_string_id!(IdempotencyKey, "idempotency key");

impl StreamId {
    /// `true` if this id is safe to use as a single path segment (no `/`,
    /// no `.` or `..`, not empty). The File provider rejects stream ids
    /// that fail this check rather than risk escaping its root directory.
    #[must_use]
    pub fn is_single_path_segment(&self) -> bool {
        let s = self.0.as_str();
        !s.is_empty() && s != "." && s != ".." && !s.contains('/') && !s.contains('\\')
    }
}
