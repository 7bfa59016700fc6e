use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::HealthPulseError;
use crate::inactivity::InactivityThresholds;
use crate::ledger::PointRates;
use crate::logging::LogConfig;
use crate::zones::ZoneThresholds;

/// Upper bound for the alarm window and the inactivity threshold (one day)
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Metric polling cadence and timeouts
    pub poller: PollerSettings,

    /// Heart-rate zone boundaries and alarm window
    pub zones: ZoneSettings,

    /// Motion thresholds and checker cadence
    pub inactivity: InactivitySettings,

    /// Point ledger settings
    pub ledger: LedgerSettings,

    /// Logging settings
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    /// Production polling period in seconds
    pub period_secs: u64,

    /// Faster period used when debug cadence is requested
    pub debug_period_secs: u64,

    /// Use the debug cadence
    pub debug: bool,

    /// Per-fetch timeout in milliseconds
    pub fetch_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneSettings {
    /// How long the alarm sounds after a zone alert, in seconds
    pub alarm_window_secs: u64,

    pub thresholds: ZoneThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InactivitySettings {
    /// Checker period in seconds
    pub check_period_secs: u64,

    pub thresholds: InactivityThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Account whose remote balance receives conversions
    pub user_id: String,

    /// SQLite file holding ledger progress
    pub store_path: PathBuf,

    pub rates: PointRates,
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            poller: PollerSettings::default(),
            zones: ZoneSettings::default(),
            inactivity: InactivitySettings::default(),
            ledger: LedgerSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        PollerSettings {
            period_secs: 15,
            debug_period_secs: 2,
            debug: false,
            fetch_timeout_ms: 5_000,
        }
    }
}

impl Default for ZoneSettings {
    fn default() -> Self {
        ZoneSettings {
            thresholds: ZoneThresholds::default(),
            alarm_window_secs: 90,
        }
    }
}

impl Default for InactivitySettings {
    fn default() -> Self {
        InactivitySettings {
            thresholds: InactivityThresholds::default(),
            check_period_secs: 60,
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            user_id: "local-user".to_string(),
            store_path: AppConfig::default_data_dir().join("ledger.db"),
            rates: PointRates::default(),
        }
    }
}

impl PollerSettings {
    /// Period in effect, honouring the debug flag
    pub fn effective_period(&self) -> Duration {
        if self.debug {
            Duration::from_secs(self.debug_period_secs)
        } else {
            Duration::from_secs(self.period_secs)
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl ZoneSettings {
    pub fn alarm_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alarm_window_secs.min(MAX_WINDOW_SECS) as i64)
    }
}

impl InactivitySettings {
    pub fn check_period(&self) -> Duration {
        Duration::from_secs(self.check_period_secs)
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        // Update modification timestamp
        self.metadata.updated_at = Utc::now();

        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".healthpulse")
            .join("config.toml")
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("healthpulse")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %e,
                    "Config file not loaded, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Reject settings the loops cannot run with
    pub fn validate(&self) -> crate::error::Result<()> {
        let positive = [
            ("poller.period_secs", self.poller.period_secs),
            ("poller.debug_period_secs", self.poller.debug_period_secs),
            ("poller.fetch_timeout_ms", self.poller.fetch_timeout_ms),
            ("inactivity.check_period_secs", self.inactivity.check_period_secs),
            ("inactivity.thresholds.inactivity_secs", self.inactivity.thresholds.inactivity_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(HealthPulseError::Configuration(format!(
                "{} must be greater than zero",
                name
            )));
        }

        let bounded = [
            ("zones.alarm_window_secs", self.zones.alarm_window_secs),
            ("inactivity.thresholds.inactivity_secs", self.inactivity.thresholds.inactivity_secs),
        ];
        if let Some((name, _)) = bounded.iter().find(|(_, value)| *value > MAX_WINDOW_SECS) {
            return Err(HealthPulseError::Configuration(format!(
                "{} must not exceed {} seconds",
                name, MAX_WINDOW_SECS
            )));
        }

        self.zones.thresholds.validate()?;

        let motion = &self.inactivity.thresholds;
        if motion.angular_threshold < 0.0 || motion.linear_threshold < 0.0 {
            return Err(HealthPulseError::Configuration(
                "motion thresholds must not be negative".to_string(),
            ));
        }
        if self.ledger.user_id.trim().is_empty() {
            return Err(HealthPulseError::Configuration(
                "ledger.user_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
