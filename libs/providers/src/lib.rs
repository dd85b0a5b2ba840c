//! `Provider` implementations: the storage primitive a `Handle` sits on top
//! of. Two backends share one trait and one session-lease model.

pub mod file;
pub mod in_memory;
pub mod provider;
pub mod session;

pub use file::FileProvider;
pub use in_memory::InMemoryProvider;
pub use provider::StoreProvider;
pub use session::{check_cancelled, SessionRecord, ACQUIRE_POLL_INTERVAL, DEFAULT_LOCK_TIMEOUT};
