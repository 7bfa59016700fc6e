//! Alert events and the sinks that deliver them to the notification layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::zones::HeartRateZone;

/// How urgently an alert should be surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// What started or stopped the audible alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCause {
    HeartRateZone,
}

/// Discrete events emitted to the presentation/notification layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    /// Heart rate entered a different zone
    ZoneAlert {
        id: Uuid,
        zone: HeartRateZone,
        severity: AlertSeverity,
        bpm: f64,
        at: DateTime<Utc>,
    },

    /// No movement for at least the inactivity threshold
    InactivityAlert {
        id: Uuid,
        idle_seconds: i64,
        at: DateTime<Utc>,
    },

    AlarmStarted {
        cause: AlarmCause,
        until: DateTime<Utc>,
    },

    AlarmStopped {
        cause: AlarmCause,
        at: DateTime<Utc>,
    },
}

impl AlertEvent {
    pub fn is_alarm_signal(&self) -> bool {
        matches!(
            self,
            AlertEvent::AlarmStarted { .. } | AlertEvent::AlarmStopped { .. }
        )
    }
}

/// Consumer of alert events
pub trait AlertSink: Send + Sync {
    fn emit(&self, event: AlertEvent);
}

/// Forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<AlertEvent>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn emit(&self, event: AlertEvent) {
        if self.tx.send(event).is_err() {
            warn!("Alert receiver dropped; event discarded");
        }
    }
}

/// Writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn emit(&self, event: AlertEvent) {
        match &event {
            AlertEvent::ZoneAlert {
                zone, severity, bpm, ..
            } => warn!(%zone, %severity, bpm, "Heart rate zone alert"),
            AlertEvent::InactivityAlert { idle_seconds, .. } => {
                warn!(idle_seconds, "Inactivity alert")
            }
            AlertEvent::AlarmStarted { until, .. } => info!(%until, "Alarm started"),
            AlertEvent::AlarmStopped { at, .. } => info!(%at, "Alarm stopped"),
        }
    }
}
