//! Configuration loading and validation.
//!
//! The whole file is optional field by field; a missing section falls back to
//! the values that work with a stock CloudWatcher on `/dev/ttyUSB0`.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub poll: PollConfig,
    pub thresholds: Thresholds,
    pub constants: ElectricalConstants,
    pub http: HttpConfig,
    pub store: StoreConfig,
}

/// Serial connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud_rate: u32,
    /// Read window for a single command response
    pub timeout_ms: u64,
    /// Query the relative humidity sensor (`h!`)
    pub read_humidity: bool,
    /// Query the pressure sensor (`p!`)
    pub read_pressure: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            timeout_ms: 2000,
            read_humidity: false,
            read_pressure: false,
        }
    }
}

impl DeviceConfig {
    /// Fail early when a filesystem device path does not exist.
    ///
    /// Names that are not paths (`COM3`) are left to the serial driver.
    pub fn check_path(&self) -> Result<(), ConfigError> {
        let path = Path::new(&self.port);
        if path.is_absolute() && !path.exists() {
            return Err(ConfigError::Invalid(format!(
                "device.port {} does not exist",
                self.port
            )));
        }
        Ok(())
    }
}

/// Polling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Upper bound for the reconnect backoff
    pub max_backoff_secs: u64,
    /// Age after which the cached reading is flagged stale
    pub stale_after_secs: u64,
    /// Readings kept in memory for `/latest.json` and `/today.json`
    pub history_size: usize,
    /// Number of recent readings used to compute the wind gust
    pub gust_window: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_backoff_secs: 600,
            stale_after_secs: 180,
            history_size: 1440,
            gust_window: 10,
        }
    }
}

/// Condition thresholds.
///
/// Sky thresholds apply to `sky_temp_c - ambient_temp_c`, wind thresholds to
/// km/h and rain thresholds to the rain sensor frequency, which drops as the
/// sensor gets wet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cloudy: f64,
    pub very_cloudy: f64,
    pub windy: f64,
    pub very_windy: f64,
    pub gusty: f64,
    pub very_gusty: f64,
    pub wet: f64,
    pub rainy: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cloudy: -25.0,
            very_cloudy: -15.0,
            windy: 20.0,
            very_windy: 30.0,
            gusty: 40.0,
            very_gusty: 50.0,
            wet: 2200.0,
            rainy: 1800.0,
        }
    }
}

/// Electrical constants of the CloudWatcher board.
///
/// Newer units report their own values with the `M!` command; these defaults
/// match the published Lunatico constants for the standard board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectricalConstants {
    pub zener_voltage: f64,
    pub ldr_pull_up_kohm: f64,
    pub rain_pull_up_kohm: f64,
    pub rain_res_at_25_kohm: f64,
    pub rain_beta: f64,
}

impl Default for ElectricalConstants {
    fn default() -> Self {
        Self {
            zener_voltage: 3.0,
            ldr_pull_up_kohm: 56.0,
            rain_pull_up_kohm: 1.0,
            rain_res_at_25_kohm: 1.0,
            rain_beta: 3450.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
        }
    }
}

/// SQLite persistence of published readings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "weather.db".to_string(),
        }
    }
}

impl StoreConfig {
    /// Environment variable naming the database file
    pub const DB_FILE_ENV: &'static str = "DB_FILE";

    /// Point the store at `db_file` from the command line, else at `env_db_file`.
    /// Either one enables the store.
    pub fn override_path(&mut self, env_db_file: Option<String>, db_file: Option<String>) {
        if let Some(path) = db_file.or(env_db_file).filter(|p| !p.is_empty()) {
            self.path = path;
            self.enabled = true;
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        let config = Self::parse(&contents)?;
        log::info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a YAML string and validate it
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the poller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.port.trim().is_empty() {
            return Err(ConfigError::Invalid("device.port must not be empty".into()));
        }
        if self.device.baud_rate == 0 {
            return Err(ConfigError::Invalid("device.baud_rate must be positive".into()));
        }
        if self.device.timeout_ms == 0 {
            return Err(ConfigError::Invalid("device.timeout_ms must be positive".into()));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid("poll.interval_secs must be positive".into()));
        }
        if self.poll.max_backoff_secs < self.poll.interval_secs {
            return Err(ConfigError::Invalid(
                "poll.max_backoff_secs must be >= poll.interval_secs".into(),
            ));
        }
        if self.poll.history_size == 0 || self.poll.gust_window == 0 {
            return Err(ConfigError::Invalid(
                "poll.history_size and poll.gust_window must be positive".into(),
            ));
        }

        let t = &self.thresholds;
        if t.cloudy > t.very_cloudy {
            return Err(ConfigError::Invalid(
                "thresholds.cloudy must be <= thresholds.very_cloudy".into(),
            ));
        }
        if t.windy > t.very_windy || t.gusty > t.very_gusty {
            return Err(ConfigError::Invalid(
                "wind thresholds must increase from windy/gusty to very_windy/very_gusty".into(),
            ));
        }
        if t.rainy > t.wet {
            return Err(ConfigError::Invalid(
                "thresholds.rainy must be <= thresholds.wet".into(),
            ));
        }

        let c = &self.constants;
        if c.zener_voltage <= 0.0
            || c.ldr_pull_up_kohm <= 0.0
            || c.rain_pull_up_kohm <= 0.0
            || c.rain_res_at_25_kohm <= 0.0
            || c.rain_beta <= 0.0
        {
            return Err(ConfigError::Invalid(
                "electrical constants must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
