//! The event-sourcing-friendly façade over a `StoreProvider`: `StreamHandle`
//! for per-stream operations, `Store` for vending Handles by stream id.

pub mod handle;
pub mod store;

pub use handle::StreamHandle;
pub use store::Store;
