//! The `Serializer` collaborator contract.
//!
//! Providers never know the wire format of a payload; they ask a
//! `Serializer` to turn an `Item<T>` into bytes and back, and use its
//! `format_tag` verbatim as a file extension. The core ships one concrete
//! implementation, `JsonSerializer`, as a ready-to-use default; hosts with
//! other wire formats (protobuf, bincode, ...) implement the trait directly.

use std::io::{Read, Write};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize as SerdeSerialize;

use crate::error::StreamError;
use crate::item::Item;

/// Encodes/decodes a single `Item<T>` to/from an opaque byte sequence.
pub trait Serializer<T>: Send + Sync {
    /// A short, filesystem-safe tag (`[A-Za-z0-9_-]+`) used verbatim as the
    /// file extension for items encoded with this serializer.
    fn format_tag(&self) -> &str;

    fn encode(&self, item: &Item<T>) -> Result<Vec<u8>, StreamError>;

    fn decode(&self, bytes: &[u8]) -> Result<Item<T>, StreamError>;

    /// Streams an encoded item to `sink`. The default encodes in memory and
    /// writes the whole buffer; override for true streaming encoders.
    fn encode_to_sink(&self, sink: &mut dyn Write, item: &Item<T>) -> Result<(), StreamError> {
        let bytes = self.encode(item)?;
        sink.write_all(&bytes).map_err(StreamError::from)
    }

    /// Reads an encoded item from `source`. The default reads the whole
    /// buffer into memory and decodes it.
    fn decode_from_source(&self, source: &mut dyn Read) -> Result<Item<T>, StreamError> {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf).map_err(StreamError::from)?;
        self.decode(&buf)
    }
}

/// A `Serializer` backed by `serde_json`, usable for any `T: Serialize +
/// DeserializeOwned`. `format_tag()` is `"json"`.
#[derive(Debug, Default)]
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for JsonSerializer<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Serializer<T> for JsonSerializer<T>
where
    T: SerdeSerialize + DeserializeOwned + Send + Sync,
{
    fn format_tag(&self) -> &str {
        "json"
    }

    fn encode(&self, item: &Item<T>) -> Result<Vec<u8>, StreamError> {
        serde_json::to_vec(item)
            .map_err(|e| StreamError::BadArgument(format!("json encode failed: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Item<T>, StreamError> {
        serde_json::from_slice(bytes)
            .map_err(|e| StreamError::BadArgument(format!("json decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdempotencyKey;

    #[test]
    fn json_roundtrip() {
        let ser: JsonSerializer<String> = JsonSerializer::new();
        let item = Item::new(IdempotencyKey::new("k1").unwrap(), 3, "hello".to_string()).unwrap();
        let bytes = ser.encode(&item).unwrap();
        let back = ser.decode(&bytes).unwrap();
        assert_eq!(item, back);
        assert_eq!(ser.format_tag(), "json");
    }

    #[test]
    fn sink_source_roundtrip_uses_default_impl() {
        let ser: JsonSerializer<u32> = JsonSerializer::new();
        let item = Item::new(IdempotencyKey::new("k2").unwrap(), 1, 42u32).unwrap();
        let mut buf = Vec::new();
        ser.encode_to_sink(&mut buf, &item).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let back = ser.decode_from_source(&mut cursor).unwrap();
        assert_eq!(item, back);
    }
}
