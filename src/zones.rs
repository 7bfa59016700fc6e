//! Heart-rate zone classification and edge-triggered zone alerts
//!
//! Zones (default thresholds, bpm):
//! - VeryLow: below 40
//! - Low: 40 up to but excluding 60
//! - Normal: 60 to 100 inclusive
//! - Unknown: above 100 up to 120 inclusive (no alert band)
//! - High: above 120 up to 150 inclusive
//! - VeryHigh: above 150
//!
//! An alert fires only when the classified zone differs from the zone of the
//! last fired alert. Unknown readings never fire and never replace the last
//! fired zone, so the evaluator stays on the last real zone across the gap.
//! A fresh evaluator starts from the Normal baseline: a first reading in the
//! Normal band is silent, a first abnormal reading fires.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerts::{AlarmCause, AlertEvent, AlertSeverity, AlertSink};
use crate::clock::Clock;
use crate::error::{HealthPulseError, Result};
use crate::models::{MetricKind, ReadingSet};
use crate::scheduler::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateZone {
    VeryLow,
    Low,
    Normal,
    High,
    VeryHigh,
    Unknown,
}

impl HeartRateZone {
    /// Severity of the alert fired on entering this zone
    pub fn severity(&self) -> AlertSeverity {
        match self {
            HeartRateZone::VeryLow | HeartRateZone::VeryHigh => AlertSeverity::Critical,
            HeartRateZone::Low | HeartRateZone::High => AlertSeverity::Warning,
            HeartRateZone::Normal | HeartRateZone::Unknown => AlertSeverity::Info,
        }
    }
}

impl fmt::Display for HeartRateZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HeartRateZone::VeryLow => "very_low",
            HeartRateZone::Low => "low",
            HeartRateZone::Normal => "normal",
            HeartRateZone::High => "high",
            HeartRateZone::VeryHigh => "very_high",
            HeartRateZone::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Zone boundaries in bpm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneThresholds {
    /// Readings below this are VeryLow
    pub very_low_below: f64,
    /// Readings below this (and not VeryLow) are Low
    pub low_below: f64,
    /// Upper inclusive bound of Normal
    pub normal_max: f64,
    /// Upper inclusive bound of the no-alert gap above Normal
    pub gap_max: f64,
    /// Upper inclusive bound of High; anything above is VeryHigh
    pub high_max: f64,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            very_low_below: 40.0,
            low_below: 60.0,
            normal_max: 100.0,
            gap_max: 120.0,
            high_max: 150.0,
        }
    }
}

impl ZoneThresholds {
    /// Boundaries must be finite and non-decreasing
    pub fn validate(&self) -> Result<()> {
        let bounds = [
            self.very_low_below,
            self.low_below,
            self.normal_max,
            self.gap_max,
            self.high_max,
        ];
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(HealthPulseError::Configuration(
                "zone thresholds must be finite".to_string(),
            ));
        }
        if bounds.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(HealthPulseError::Configuration(format!(
                "zone thresholds must be non-decreasing: {:?}",
                bounds
            )));
        }
        Ok(())
    }

    /// Total classification; NaN, infinite and negative readings are Unknown
    pub fn classify(&self, bpm: f64) -> HeartRateZone {
        if !bpm.is_finite() || bpm < 0.0 {
            HeartRateZone::Unknown
        } else if bpm < self.very_low_below {
            HeartRateZone::VeryLow
        } else if bpm < self.low_below {
            HeartRateZone::Low
        } else if bpm <= self.normal_max {
            HeartRateZone::Normal
        } else if bpm <= self.gap_max {
            HeartRateZone::Unknown
        } else if bpm <= self.high_max {
            HeartRateZone::High
        } else {
            HeartRateZone::VeryHigh
        }
    }
}

/// Classify with the default thresholds
pub fn classify(bpm: f64) -> HeartRateZone {
    ZoneThresholds::default().classify(bpm)
}

/// Evaluator bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneAlertState {
    pub last_fired_zone: Option<HeartRateZone>,
    /// End of the alarm-active window, if an alarm is sounding
    pub alarm_until: Option<DateTime<Utc>>,
}

/// Edge-triggered heart-rate zone alerting
#[derive(Debug, Clone)]
pub struct ZoneAlertEvaluator {
    thresholds: ZoneThresholds,
    alarm_window: Duration,
    state: ZoneAlertState,
}

impl ZoneAlertEvaluator {
    pub fn new(thresholds: ZoneThresholds, alarm_window: Duration) -> Self {
        Self {
            thresholds,
            alarm_window,
            state: ZoneAlertState {
                last_fired_zone: Some(HeartRateZone::Normal),
                alarm_until: None,
            },
        }
    }

    pub fn state(&self) -> ZoneAlertState {
        self.state
    }

    pub fn last_fired_zone(&self) -> Option<HeartRateZone> {
        self.state.last_fired_zone
    }

    pub fn alarm_window(&self) -> Duration {
        self.alarm_window
    }

    pub fn alarm_active(&self, now: DateTime<Utc>) -> bool {
        self.state.alarm_until.is_some_and(|until| now < until)
    }

    /// Feed one heart-rate reading
    ///
    /// Returns the zone alert followed by an alarm start signal when the zone
    /// changed, otherwise nothing. A new alert restarts the alarm window.
    pub fn observe(&mut self, bpm: f64, at: DateTime<Utc>) -> Vec<AlertEvent> {
        let zone = self.thresholds.classify(bpm);

        if zone == HeartRateZone::Unknown {
            debug!(bpm, "Heart rate outside alert bands; keeping last zone");
            return Vec::new();
        }
        if self.state.last_fired_zone == Some(zone) {
            return Vec::new();
        }

        let until = at + self.alarm_window;
        info!(
            from = ?self.state.last_fired_zone,
            to = %zone,
            bpm,
            "Heart rate zone changed"
        );
        self.state.last_fired_zone = Some(zone);
        self.state.alarm_until = Some(until);

        vec![
            AlertEvent::ZoneAlert {
                id: Uuid::new_v4(),
                zone,
                severity: zone.severity(),
                bpm,
                at,
            },
            AlertEvent::AlarmStarted {
                cause: AlarmCause::HeartRateZone,
                until,
            },
        ]
    }

    /// Stop the alarm if its window has run out; the last fired zone is kept
    pub fn expire_alarm(&mut self, now: DateTime<Utc>) -> Option<AlertEvent> {
        match self.state.alarm_until {
            Some(until) if now >= until => self.silence_alarm(now),
            _ => None,
        }
    }

    /// Stop the alarm unconditionally if one is sounding
    pub fn silence_alarm(&mut self, at: DateTime<Utc>) -> Option<AlertEvent> {
        self.state.alarm_until.take().map(|_| AlertEvent::AlarmStopped {
            cause: AlarmCause::HeartRateZone,
            at,
        })
    }
}

/// Consume reading sets in arrival order and emit zone alerts
///
/// The alarm window is timed on the runtime clock, so the stop signal follows
/// the last start by exactly the configured window.
pub async fn run_zone_alerts(
    evaluator: Arc<Mutex<ZoneAlertEvaluator>>,
    mut readings: broadcast::Receiver<ReadingSet>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AlertSink>,
    shutdown: Shutdown,
) {
    let window = {
        let guard = evaluator.lock().unwrap_or_else(|e| e.into_inner());
        guard.alarm_window().to_std().unwrap_or_default()
    };
    let mut alarm_deadline: Option<Instant> = None;

    loop {
        let deadline = alarm_deadline;
        let alarm_expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Zone alert task received shutdown signal");
                break;
            }
            _ = alarm_expiry => {
                alarm_deadline = None;
                let stopped = {
                    let mut guard = evaluator.lock().unwrap_or_else(|e| e.into_inner());
                    guard.silence_alarm(clock.now())
                };
                if let Some(event) = stopped {
                    sink.emit(event);
                }
            }
            received = readings.recv() => {
                let set = match received {
                    Ok(set) => set,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Zone alert task lagged behind the poller");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(reading) = set.get(MetricKind::HeartRate) else {
                    continue;
                };
                if !reading.source_ok {
                    continue;
                }
                let events = {
                    let mut guard = evaluator.lock().unwrap_or_else(|e| e.into_inner());
                    guard.observe(reading.value, reading.timestamp)
                };
                if events.iter().any(|e| matches!(e, AlertEvent::AlarmStarted { .. })) {
                    alarm_deadline = Some(Instant::now() + window);
                }
                for event in events {
                    sink.emit(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn evaluator() -> ZoneAlertEvaluator {
        ZoneAlertEvaluator::new(ZoneThresholds::default(), Duration::seconds(90))
    }

    fn fired_zones(events: &[AlertEvent]) -> Vec<HeartRateZone> {
        events
            .iter()
            .filter_map(|e| match e {
                AlertEvent::ZoneAlert { zone, .. } => Some(*zone),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(39.9), HeartRateZone::VeryLow);
        assert_eq!(classify(40.0), HeartRateZone::Low);
        assert_eq!(classify(59.9), HeartRateZone::Low);
        assert_eq!(classify(60.0), HeartRateZone::Normal);
        assert_eq!(classify(100.0), HeartRateZone::Normal);
        assert_eq!(classify(100.5), HeartRateZone::Unknown);
        assert_eq!(classify(120.0), HeartRateZone::Unknown);
        assert_eq!(classify(120.1), HeartRateZone::High);
        assert_eq!(classify(150.0), HeartRateZone::High);
        assert_eq!(classify(150.1), HeartRateZone::VeryHigh);
        assert_eq!(classify(f64::NAN), HeartRateZone::Unknown);
        assert_eq!(classify(-1.0), HeartRateZone::Unknown);
    }

    #[test]
    fn test_scenario_fires_three_alerts() {
        let mut eval = evaluator();
        let t0 = Utc::now();
        let mut events = Vec::new();
        for (i, bpm) in [70.0, 125.0, 125.0, 160.0, 95.0].iter().enumerate() {
            events.extend(eval.observe(*bpm, t0 + Duration::seconds(15 * i as i64)));
        }
        assert_eq!(
            fired_zones(&events),
            vec![HeartRateZone::High, HeartRateZone::VeryHigh, HeartRateZone::Normal]
        );
    }

    #[test]
    fn test_gap_is_sticky() {
        let mut eval = evaluator();
        let now = Utc::now();
        assert_eq!(fired_zones(&eval.observe(130.0, now)), vec![HeartRateZone::High]);
        assert!(eval.observe(110.0, now).is_empty());
        assert!(eval.observe(f64::NAN, now).is_empty());
        assert_eq!(eval.last_fired_zone(), Some(HeartRateZone::High));
        // Coming back to High through the gap does not re-fire
        assert!(eval.observe(135.0, now).is_empty());
    }

    #[test]
    fn test_alarm_window_expires_without_resetting_zone() {
        let mut eval = evaluator();
        let t0 = Utc::now();
        let events = eval.observe(35.0, t0);
        assert!(matches!(events[1], AlertEvent::AlarmStarted { .. }));
        assert!(eval.alarm_active(t0 + Duration::seconds(89)));

        assert!(eval.expire_alarm(t0 + Duration::seconds(89)).is_none());
        let stopped = eval.expire_alarm(t0 + Duration::seconds(90));
        assert!(matches!(stopped, Some(AlertEvent::AlarmStopped { .. })));
        assert!(!eval.alarm_active(t0 + Duration::seconds(91)));
        assert_eq!(eval.last_fired_zone(), Some(HeartRateZone::VeryLow));

        // Still VeryLow after the window: no new alert
        assert!(eval.observe(30.0, t0 + Duration::seconds(120)).is_empty());
        assert!(eval.expire_alarm(t0 + Duration::seconds(200)).is_none());
    }

    #[test]
    fn test_threshold_validation() {
        assert!(ZoneThresholds::default().validate().is_ok());
        let bad = ZoneThresholds {
            low_below: 30.0,
            ..ZoneThresholds::default()
        };
        assert!(bad.validate().is_err());
    }

    proptest! {
        #[test]
        fn test_alert_iff_zone_differs_from_last_fired(
            readings in proptest::collection::vec(20.0f64..200.0, 1..60)
        ) {
            let mut eval = evaluator();
            let now = Utc::now();
            let mut last_fired = Some(HeartRateZone::Normal);

            for bpm in readings {
                let zone = classify(bpm);
                let fired = fired_zones(&eval.observe(bpm, now));
                let expected = zone != HeartRateZone::Unknown && Some(zone) != last_fired;

                prop_assert_eq!(fired.len(), usize::from(expected));
                if expected {
                    last_fired = Some(zone);
                }
                prop_assert_eq!(eval.last_fired_zone(), last_fired);
            }
        }

        #[test]
        fn test_repeated_reading_never_refires(bpm in 0.0f64..250.0, repeats in 2usize..20) {
            let mut eval = evaluator();
            let now = Utc::now();
            let first = fired_zones(&eval.observe(bpm, now)).len();
            prop_assert!(first <= 1);
            for _ in 1..repeats {
                prop_assert!(eval.observe(bpm, now).is_empty());
            }
        }
    }
}
