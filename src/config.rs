use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default data directory, relative to the current working directory, used when
/// neither an explicit path nor the environment variable is set.
const DEFAULT_DATADIR: &str = ".imposters";

/// Environment variable that overrides the default data directory.
const DATADIR_ENV: &str = "IMPOSTER_STORE_DATADIR";

/// Resolved configuration for a repository instance: where it lives on disk and
/// how hard it retries a contended lock before giving up.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    datadir: PathBuf,
    backoff: BackoffConfig,
}

impl RepositoryConfig {
    /// Build a configuration rooted at an explicit path, ignoring the environment.
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        Self {
            datadir: datadir.into(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Resolve a configuration the way the embedder normally would: explicit
    /// override first, then `IMPOSTER_STORE_DATADIR`, then the relative default.
    pub fn from_env() -> Self {
        let dir = std::env::var(DATADIR_ENV).unwrap_or_else(|_| DEFAULT_DATADIR.to_string());
        Self::new(dir)
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Directory for a single imposter, identified by port.
    pub fn imposter_dir(&self, port: u16) -> PathBuf {
        self.datadir.join(port.to_string())
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Exponential backoff parameters for advisory file lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Upper bound on any single wait, regardless of how large the backoff grows.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_attempts: 10,
            max_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins_over_default() {
        let cfg = RepositoryConfig::new("/tmp/somewhere");
        assert_eq!(cfg.datadir(), Path::new("/tmp/somewhere"));
    }

    #[test]
    fn imposter_dir_joins_port() {
        let cfg = RepositoryConfig::new("/data");
        assert_eq!(cfg.imposter_dir(4545), Path::new("/data/4545"));
    }
}
