//! Configuration for topology sync and backup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default remote service address.
pub const DEFAULT_TARGET: &str = "https://api.meter4.me";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Remote relations service.
    pub remote: RemoteConfig,
    /// Backup behaviour.
    pub backup: BackupConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Storage path is not empty
    /// - Remote target is an http(s) URL and the timeout is non-zero
    /// - Backup worker count and window length are within bounds
    ///
    /// # Example
    ///
    /// ```
    /// use meter_sync::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.storage.validate());
        errors.extend(self.remote.validate());
        errors.extend(self.backup.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: meter_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }
        errors
    }
}

/// Remote relations service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the service.
    pub target: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts after the first for retryable sync failures.
    pub retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            timeout_secs: 30,
            retries: 3,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.target.starts_with("http://") && !self.target.starts_with("https://") {
            errors.push(ValidationError {
                field: "remote.target".to_string(),
                message: format!(
                    "invalid target '{}': must start with http:// or https://",
                    self.target
                ),
            });
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "remote.timeout_secs".to_string(),
                message: "timeout must be at least 1 second".to_string(),
            });
        }
        if self.retries > 10 {
            errors.push(ValidationError {
                field: "remote.retries".to_string(),
                message: format!("{} retries is too many (max 10)", self.retries),
            });
        }
        errors
    }
}

/// Backup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Sensors exported concurrently (1 = sequential).
    pub workers: usize,
    /// Time budget for one sensor's export, in seconds.
    pub sensor_timeout_secs: u64,
    /// Abort the run at the first failed sensor.
    pub fail_fast: bool,
    /// Length of one exported window, in hours.
    pub window_hours: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            sensor_timeout_secs: 300,
            fail_fast: false,
            window_hours: 24,
        }
    }
}

impl BackupConfig {
    pub const MAX_WORKERS: usize = 16;
    pub const MAX_WINDOW_HOURS: u32 = 168;

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.workers == 0 || self.workers > Self::MAX_WORKERS {
            errors.push(ValidationError {
                field: "backup.workers".to_string(),
                message: format!(
                    "workers must be between 1 and {}, got {}",
                    Self::MAX_WORKERS,
                    self.workers
                ),
            });
        }
        if self.sensor_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "backup.sensor_timeout_secs".to_string(),
                message: "timeout must be at least 1 second".to_string(),
            });
        }
        if self.window_hours == 0 || self.window_hours > Self::MAX_WINDOW_HOURS {
            errors.push(ValidationError {
                field: "backup.window_hours".to_string(),
                message: format!(
                    "window must be between 1 and {} hours, got {}",
                    Self::MAX_WINDOW_HOURS,
                    self.window_hours
                ),
            });
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `backup.workers`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meter4")
        .join("config.toml")
}
