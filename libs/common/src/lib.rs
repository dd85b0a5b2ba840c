//! Configuration binding and telemetry setup shared across the stream store
//! crates.

pub mod settings;
pub mod telemetry;

pub use settings::StreamsSettings;
pub use telemetry::init_tracing;
