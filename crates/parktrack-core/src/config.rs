//! Application configuration management.
//!
//! Configuration is layered with the `config` crate:
//! 1. Built-in defaults (every field has one)
//! 2. A TOML file, by default `config.toml` in the platform config directory,
//!    overridable with `PARKTRACK_CONFIG`
//! 3. Environment variables `PARKTRACK__<SECTION>__<KEY>`, e.g.
//!    `PARKTRACK__BLUETOOTH__TARGET_NAME`
//!
//! Sections:
//! - `bluetooth`: tracker name, characteristic and optional timeouts
//! - `storage`: where and under which account the last location is kept
//! - `directions`: walking-route service
//! - `server`: HTTP bind address
//! - `logging`: level and output mode

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::bluetooth::{parse_characteristic_uuid, LinkConfig, DEFAULT_TARGET_NAME};
use crate::store::{is_valid_account, DEFAULT_ACCOUNT};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "PARKTRACK_CONFIG";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PARKTRACK";

// =============================================================================
// ERRORS
// =============================================================================

/// Errors that can occur while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// Writing the config file failed.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing the configuration to TOML failed.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// No platform config directory could be determined.
    #[error("Cannot determine a configuration directory for this platform")]
    NoConfigDir,

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// =============================================================================
// SECTIONS
// =============================================================================

/// Tracker hardware and link behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Exact advertised name of the tracker.
    pub target_name: String,

    /// Location characteristic, 4 hex digits or a full UUID.
    pub location_characteristic: String,

    /// Stop scanning after this many seconds. Unset scans forever.
    pub scan_timeout_secs: Option<u64>,

    /// Cancel an unfinished connection after this many seconds. Unset waits forever.
    pub connect_timeout_secs: Option<u64>,

    /// Use the built-in simulated tracker instead of real hardware.
    pub simulate: bool,

    /// Simulated tracker parameters.
    pub simulator: SimulatorSection,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            location_characteristic: "2AAF".to_string(),
            scan_timeout_secs: None,
            connect_timeout_secs: None,
            simulate: false,
            simulator: SimulatorSection::default(),
        }
    }
}

impl BluetoothConfig {
    /// Build the link parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the characteristic UUID is malformed.
    pub fn link_config(&self) -> ConfigResult<LinkConfig> {
        let characteristic = parse_characteristic_uuid(&self.location_characteristic)
            .map_err(|e| invalid("bluetooth.location_characteristic", e.to_string()))?;
        Ok(LinkConfig {
            target_name: self.target_name.clone(),
            characteristic,
            scan_timeout: self.scan_timeout_secs.map(Duration::from_secs),
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
        })
    }
}

/// Position streamed by the simulated tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSection {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
    /// Milliseconds between frames.
    pub interval_ms: u64,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            latitude: 52.520_008,
            longitude: 13.404_954,
            altitude: 34.0,
            interval_ms: 1000,
        }
    }
}

/// Persistence of the last known location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the record. Unset uses the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Account identifier keying the record.
    pub account: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            account: DEFAULT_ACCOUNT.to_string(),
        }
    }
}

impl StorageConfig {
    /// The effective data directory.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Walking-directions service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionsConfig {
    /// Whether route requests are served.
    pub enabled: bool,

    /// Base URL of an OSRM-compatible service.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for DirectionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://router.project-osrm.org".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,

    /// JSON rolling files plus compact stdout instead of pretty stdout.
    pub production: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            production: false,
        }
    }
}

// =============================================================================
// ROOT
// =============================================================================

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracker hardware and link behaviour.
    pub bluetooth: BluetoothConfig,
    /// Persistence of the last known location.
    pub storage: StorageConfig,
    /// Walking-directions service.
    pub directions: DirectionsConfig,
    /// HTTP server.
    pub server: ServerConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from the default file location plus environment overrides.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> ConfigResult<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load from `path` (optional) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load, writing a default file first if none exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the default cannot be written or loading fails.
    pub fn load_or_init(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            Self::default().save(path)?;
            info!(path = %path.display(), "Wrote default configuration");
        }
        Self::load_from(path)
    }

    /// Write this configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Path of the config file: `PARKTRACK_CONFIG` or the platform default.
    ///
    /// # Errors
    ///
    /// Returns an error if no platform config directory exists.
    pub fn config_path() -> ConfigResult<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        directories::ProjectDirs::from("", "", "parktrack")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Check every field, reporting all violations at once.
    ///
    /// # Errors
    ///
    /// Returns the single violation, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.bluetooth.target_name.trim().is_empty() {
            errors.push(invalid("bluetooth.target_name", "must not be empty"));
        }
        if let Err(e) = self.bluetooth.link_config() {
            errors.push(e);
        }
        if self.bluetooth.scan_timeout_secs == Some(0) {
            errors.push(invalid(
                "bluetooth.scan_timeout_secs",
                "must be positive; omit it to scan without a timeout",
            ));
        }
        if self.bluetooth.connect_timeout_secs == Some(0) {
            errors.push(invalid(
                "bluetooth.connect_timeout_secs",
                "must be positive; omit it to wait without a timeout",
            ));
        }
        let sim = &self.bluetooth.simulator;
        if crate::location::Coordinate::new(sim.latitude, sim.longitude).is_err() {
            errors.push(invalid(
                "bluetooth.simulator",
                "latitude must be in [-90, 90] and longitude in [-180, 180]",
            ));
        }
        if sim.interval_ms == 0 {
            errors.push(invalid("bluetooth.simulator.interval_ms", "must be positive"));
        }

        if !is_valid_account(&self.storage.account) {
            errors.push(invalid(
                "storage.account",
                "use letters, digits, '-', '_' or '.', not starting with '.'",
            ));
        }

        if let Err(e) = Url::parse(&self.directions.base_url) {
            errors.push(invalid("directions.base_url", e.to_string()));
        }
        if self.directions.request_timeout_secs == 0 {
            errors.push(invalid("directions.request_timeout_secs", "must be positive"));
        }

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(invalid(
                "server.bind_address",
                "expected host:port, e.g. 127.0.0.1:3000",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Platform data directory for parktrack.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "parktrack")
        .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
}

// =============================================================================
// TESTS
// =============================================================================
