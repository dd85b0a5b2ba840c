//! The `Store` registry: get-or-insert `Handle`s by stream id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use streams_domain::StreamId;
use streams_providers::{StoreProvider, DEFAULT_LOCK_TIMEOUT};

use crate::handle::StreamHandle;

/// Vends one [`StreamHandle`] per stream id, always the same instance for
/// the same id. Does not itself arbitrate sessions; that's the Provider's
/// job; the registry only guarantees Handle identity.
pub struct Store<T, P> {
    provider: Arc<P>,
    lock_timeout: Duration,
    handles: Mutex<HashMap<String, Arc<StreamHandle<T, P>>>>,
}

impl<T, P> Store<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: StoreProvider<T>,
{
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self::with_lock_timeout(provider, DEFAULT_LOCK_TIMEOUT)
    }

    #[must_use]
    pub fn with_lock_timeout(provider: Arc<P>, lock_timeout: Duration) -> Self {
        Self {
            provider,
            lock_timeout,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the existing Handle for `stream_id`, or creates and registers
    /// a new one.
    #[must_use]
    pub fn get_stream(&self, stream_id: &StreamId) -> Arc<StreamHandle<T, P>> {
        let mut handles = self.handles.lock().unwrap();
        if let Some(handle) = handles.get(stream_id.as_str()) {
            return handle.clone();
        }
        let handle = Arc::new(StreamHandle::with_lock_timeout(
            self.provider.clone(),
            stream_id.clone(),
            self.lock_timeout,
        ));
        handles.insert(stream_id.to_string(), handle.clone());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streams_domain::{SystemClock, UuidUniqueId};
    use streams_providers::InMemoryProvider;

    fn store() -> Store<String, InMemoryProvider<String>> {
        let provider = Arc::new(InMemoryProvider::new(Arc::new(SystemClock), Arc::new(UuidUniqueId)));
        Store::new(provider)
    }

    #[test]
    fn s6_registry_identity() {
        let store = store();
        let a1 = store.get_stream(&StreamId::new("a").unwrap());
        let a2 = store.get_stream(&StreamId::new("a").unwrap());
        let b = store.get_stream(&StreamId::new("b").unwrap());

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
