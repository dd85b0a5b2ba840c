//! Configuration binding for the `Hexalith:Streams` settings section.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use streams_domain::StreamError;

fn default_root_path() -> PathBuf {
    PathBuf::from("/Hexalith/FileStreams")
}

fn default_lock_timeout_secs() -> u64 {
    60
}

/// Bound from the host configuration under `Hexalith:Streams`. Both fields
/// have defaults, so `load()` never fails for a missing section, only a
/// present-but-malformed value is a `ConfigMissing` error, raised eagerly.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamsSettings {
    #[serde(default = "default_root_path")]
    pub file_stream_root_path: PathBuf,
    #[serde(default = "default_lock_timeout_secs")]
    lock_timeout_seconds: u64,
}

impl StreamsSettings {
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    /// Loads settings from the process environment (and a local `.env` file,
    /// if present). The `Hexalith:Streams:FileStreamRootPath` host key maps
    /// to the environment variable `HEXALITH_STREAMS__FILE_STREAM_ROOT_PATH`
    /// using double underscore as the nesting separator, per `config::Environment`.
    pub fn load() -> Result<Self, StreamError> {
        let _ = dotenvy::dotenv();
        Self::from_env_prefix("HEXALITH_STREAMS")
    }

    fn from_env_prefix(prefix: &str) -> Result<Self, StreamError> {
        let raw = config::Config::builder()
            .set_default(
                "file_stream_root_path",
                default_root_path().to_string_lossy().to_string(),
            )
            .map_err(config_error)?
            .set_default("lock_timeout_seconds", default_lock_timeout_secs())
            .map_err(config_error)?
            .add_source(
                config::Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        raw.try_deserialize().map_err(config_error)
    }
}

fn config_error(err: config::ConfigError) -> StreamError {
    StreamError::ConfigMissing(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_apply_without_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("HEXALITH_STREAMS__FILE_STREAM_ROOT_PATH");
        std::env::remove_var("HEXALITH_STREAMS__LOCK_TIMEOUT_SECONDS");

        let settings = StreamsSettings::from_env_prefix("HEXALITH_STREAMS").unwrap();
        assert_eq!(settings.file_stream_root_path, PathBuf::from("/Hexalith/FileStreams"));
        assert_eq!(settings.lock_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn env_overrides_are_applied() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("HEXALITH_STREAMS__FILE_STREAM_ROOT_PATH", "/tmp/streams");
        std::env::set_var("HEXALITH_STREAMS__LOCK_TIMEOUT_SECONDS", "120");

        let settings = StreamsSettings::from_env_prefix("HEXALITH_STREAMS").unwrap();
        assert_eq!(settings.file_stream_root_path, PathBuf::from("/tmp/streams"));
        assert_eq!(settings.lock_timeout(), Duration::from_secs(120));

        std::env::remove_var("HEXALITH_STREAMS__FILE_STREAM_ROOT_PATH");
        std::env::remove_var("HEXALITH_STREAMS__LOCK_TIMEOUT_SECONDS");
    }
}
