//! Configuration types for cache partitions, storage and fetching.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Names of the three cache partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionNames {
    /// Live cache consulted on every fetch.
    pub current: String,
    /// Holding area populated during install.
    pub staging: String,
    /// Partition holding the last activated resource table.
    pub manifest: String,
}

impl Default for PartitionNames {
    fn default() -> Self {
        Self {
            current: "flutter-app-cache".to_string(),
            staging: "flutter-temp-cache".to_string(),
            manifest: "flutter-app-manifest".to_string(),
        }
    }
}

/// Network settings for the HTTP fetcher and bulk downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Number of concurrent requests during bulk downloads.
    pub concurrent_fetches: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrent_fetches: 4,
            timeout_secs: 30,
            user_agent: format!("offline-shell/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FetchConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent requests.
    #[must_use]
    pub const fn with_concurrent_fetches(mut self, concurrent: usize) -> Self {
        self.concurrent_fetches = concurrent;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Where partitions are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each partition is a subdirectory.
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: cache_dir.join("offline-shell"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Origin every cached URL belongs to, e.g. `https://game.example.com`.
    pub origin: Option<String>,
    /// Partition names.
    pub partitions: PartitionNames,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Fetch configuration.
    pub fetch: FetchConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Sets the storage root directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.cache_dir = dir.into();
        self
    }

    /// Returns the default config file location
    /// (`$XDG_CONFIG_HOME/offline-shell/config.toml`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-shell")
            .join("config.toml")
    }

    /// Parses a configuration from TOML. Missing sections use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, or defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> crate::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if self.fetch.concurrent_fetches == 0 {
            return Err(crate::Error::Config(
                "fetch.concurrent_fetches must be at least 1".to_string(),
            ));
        }
        let p = &self.partitions;
        if p.current == p.staging || p.current == p.manifest || p.staging == p.manifest {
            return Err(crate::Error::Config(
                "partition names must be distinct".to_string(),
            ));
        }
        Ok(())
    }
}
