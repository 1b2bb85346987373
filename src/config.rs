//! Registry configuration.
//!
//! Built in code with the `with_*` methods, or loaded from an optional TOML
//! file overlaid with `DISCOVERY__*` environment variables.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::error::Result;

/// Default root of the service namespace.
pub const DEFAULT_ROOT_PATH: &str = "/microservices";

/// Default timeout for store calls that honor a deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Path under which every service node lives.
    pub root_path: String,
    /// Deadline applied to `Registry::deregister`.
    pub timeout: Duration,
    /// When set, each watch loop re-reads its snapshot at this interval even
    /// if the store watch never fires.
    pub resync_interval: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root_path: DEFAULT_ROOT_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            resync_interval: None,
        }
    }
}

impl RegistryConfig {
    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }

    /// Load configuration with priority (lowest first):
    /// 1. Defaults
    /// 2. `path`, if given (TOML)
    /// 3. `DISCOVERY__*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("DISCOVERY")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let raw: RawConfig = builder.build()?.try_deserialize()?;
        Ok(raw.into())
    }
}

/// On-disk shape; durations are milliseconds.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    root_path: String,
    timeout_ms: u64,
    resync_interval_ms: Option<u64>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            root_path: DEFAULT_ROOT_PATH.to_string(),
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            resync_interval_ms: None,
        }
    }
}

impl From<RawConfig> for RegistryConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            root_path: raw.root_path,
            timeout: Duration::from_millis(raw.timeout_ms),
            resync_interval: raw
                .resync_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.root_path, "/microservices");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.resync_interval.is_none());
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::default()
            .with_root_path("/svc")
            .with_timeout(Duration::from_millis(200))
            .with_resync_interval(Duration::from_secs(1));
        assert_eq!(config.root_path, "/svc");
        assert_eq!(config.timeout, Duration::from_millis(200));
        assert_eq!(config.resync_interval, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "root_path = \"/services\"").unwrap();
        writeln!(file, "timeout_ms = 1500").unwrap();
        writeln!(file, "resync_interval_ms = 250").unwrap();

        let config = RegistryConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.root_path, "/services");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.resync_interval, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = RegistryConfig::load(Some("/nonexistent/discovery.toml"));
        assert!(matches!(result, Err(crate::DiscoveryError::Config(_))));
    }

    #[test]
    fn test_zero_resync_disables_it() {
        let raw = RawConfig {
            resync_interval_ms: Some(0),
            ..Default::default()
        };
        assert!(RegistryConfig::from(raw).resync_interval.is_none());
    }
}
