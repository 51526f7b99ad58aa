use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

/// Uploader settings, loadable from a TOML file. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of requests (and of parts within one request) in flight at once.
    pub threads: usize,
    /// Size of the frames a chunk is streamed in; progress is reported once per frame.
    pub frame_size: usize,
    /// Optional whole-request timeout for the HTTP client.
    pub timeout_secs: Option<u64>,
}

impl Config {
    pub const DEFAULT_THREADS: usize = 5;
    pub const DEFAULT_FRAME_SIZE: usize = 64 * 1024;

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// The validated concurrency cap. Zero threads is rejected rather than clamped.
    pub fn threads(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.threads).ok_or(ConfigError::ZeroThreads)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: Self::DEFAULT_THREADS,
            frame_size: Self::DEFAULT_FRAME_SIZE,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("thread count must be at least 1")]
    ZeroThreads,

    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.threads, 5);
        assert_eq!(config.threads().unwrap().get(), 5);
        assert_eq!(config.frame_size, 64 * 1024);
        assert_eq!(config.timeout_secs, None);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = Config {
            threads: 0,
            ..Config::default()
        };
        assert!(matches!(config.threads(), Err(ConfigError::ZeroThreads)));
    }

    #[test]
    fn test_load_partial_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "threads = 2")?;
        writeln!(file, "timeout_secs = 30")?;

        let config = Config::load(file.path())?;

        assert_eq!(config.threads, 2);
        assert_eq!(config.timeout_secs, Some(30));
        assert_eq!(config.frame_size, Config::DEFAULT_FRAME_SIZE);
        Ok(())
    }

    #[test]
    fn test_load_rejects_wrong_type() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "threads = \"many\"")?;

        let err = Config::load(file.path()).unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/upsync.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
