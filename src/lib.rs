// Library interface for HealthPulse modules
// This allows integration tests to access the core functionality

pub mod alerts;
pub mod clock;
pub mod config;
pub mod error;
pub mod inactivity;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod poller;
pub mod remote;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use alerts::{AlertEvent, AlertSeverity, AlertSink, ChannelAlertSink, LogAlertSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{HealthPulseError, Result};
pub use inactivity::{InactivityMonitor, InactivityThresholds, MovementState};
pub use ledger::{ConversionOutcome, PointRates, ScoreLedger};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use monitor::HealthMonitor;
pub use poller::MetricPoller;
pub use remote::{InMemoryBalanceStore, RemoteBalanceStore};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use zones::{classify, HeartRateZone, ZoneAlertEvaluator, ZoneThresholds};
