//! Prolonged-inactivity detection from two independent motion streams
//!
//! The angular stream counts as movement when the rotation-rate magnitude is
//! above its threshold. The linear stream counts as movement when the
//! acceleration magnitude deviates from the gravity baseline by more than its
//! threshold. Either stream alone moves the shared last-movement timestamp.
//!
//! A periodic checker raises one alert per latch cycle once the idle time
//! reaches the threshold. Only an explicit dismissal re-arms the latch.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerts::{AlertEvent, AlertSink};
use crate::clock::Clock;
use crate::models::MotionSample;
use crate::scheduler::{ticker, Shutdown};

/// Movement and idle thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InactivityThresholds {
    /// Rotation-rate magnitude above which the angular stream reports movement
    pub angular_threshold: f64,
    /// Allowed deviation of acceleration magnitude from gravity
    pub linear_threshold: f64,
    /// Acceleration magnitude at rest, in g
    pub gravity_baseline: f64,
    /// Idle time that triggers an alert, in seconds
    pub inactivity_secs: u64,
}

impl Default for InactivityThresholds {
    fn default() -> Self {
        Self {
            angular_threshold: 0.5,
            linear_threshold: 0.4,
            gravity_baseline: 1.0,
            inactivity_secs: 60,
        }
    }
}

impl InactivityThresholds {
    /// Idle limit; values beyond `i64` seconds clamp instead of wrapping
    pub fn inactivity_limit(&self) -> Duration {
        let secs = i64::try_from(self.inactivity_secs).unwrap_or(i64::MAX);
        Duration::try_seconds(secs).unwrap_or(Duration::MAX)
    }

    pub fn is_angular_movement(&self, sample: &MotionSample) -> bool {
        sample.vector.magnitude() > self.angular_threshold
    }

    pub fn is_linear_movement(&self, sample: &MotionSample) -> bool {
        (sample.vector.magnitude() - self.gravity_baseline).abs() > self.linear_threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MovementState {
    pub last_movement_at: DateTime<Utc>,
    /// Set when an alert fires; cleared only by dismissal
    pub inactivity_alert_active: bool,
}

/// Which motion path reported a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionPath {
    Angular,
    Linear,
}

#[derive(Debug, Clone)]
pub struct InactivityMonitor {
    thresholds: InactivityThresholds,
    state: MovementState,
}

impl InactivityMonitor {
    /// The idle clock starts at `started_at`
    pub fn new(thresholds: InactivityThresholds, started_at: DateTime<Utc>) -> Self {
        Self {
            thresholds,
            state: MovementState {
                last_movement_at: started_at,
                inactivity_alert_active: false,
            },
        }
    }

    pub fn state(&self) -> MovementState {
        self.state
    }

    pub fn thresholds(&self) -> &InactivityThresholds {
        &self.thresholds
    }

    /// Returns true when the sample counted as movement
    pub fn on_angular_sample(&mut self, sample: &MotionSample) -> bool {
        let moved = self.thresholds.is_angular_movement(sample);
        if moved {
            self.record_movement(sample.timestamp);
        }
        moved
    }

    /// Returns true when the sample counted as movement
    pub fn on_linear_sample(&mut self, sample: &MotionSample) -> bool {
        let moved = self.thresholds.is_linear_movement(sample);
        if moved {
            self.record_movement(sample.timestamp);
        }
        moved
    }

    pub fn on_sample(&mut self, path: MotionPath, sample: &MotionSample) -> bool {
        match path {
            MotionPath::Angular => self.on_angular_sample(sample),
            MotionPath::Linear => self.on_linear_sample(sample),
        }
    }

    /// Never moves the timestamp backwards
    fn record_movement(&mut self, at: DateTime<Utc>) {
        if at > self.state.last_movement_at {
            self.state.last_movement_at = at;
        }
    }

    pub fn elapsed_since_movement(&self, now: DateTime<Utc>) -> Duration {
        now - self.state.last_movement_at
    }

    /// Periodic check; fires at most once until dismissed
    pub fn check(&mut self, now: DateTime<Utc>) -> Option<AlertEvent> {
        if self.state.inactivity_alert_active {
            return None;
        }
        let idle = self.elapsed_since_movement(now);
        if idle < self.thresholds.inactivity_limit() {
            return None;
        }

        self.state.inactivity_alert_active = true;
        info!(idle_seconds = idle.num_seconds(), "Inactivity threshold reached");
        Some(AlertEvent::InactivityAlert {
            id: Uuid::new_v4(),
            idle_seconds: idle.num_seconds(),
            at: now,
        })
    }

    /// Acknowledge the alert; the next one needs a full idle period from `now`
    pub fn dismiss(&mut self, now: DateTime<Utc>) {
        if self.state.inactivity_alert_active {
            debug!("Inactivity alert dismissed");
        }
        self.state.inactivity_alert_active = false;
        self.record_movement(now);
    }
}

async fn next_sample(rx: &mut Option<mpsc::Receiver<MotionSample>>) -> Option<MotionSample> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Start the monitor loop over whichever motion streams are available
///
/// With no stream at all the monitor is disabled and `None` is returned.
pub fn spawn_inactivity_monitor(
    monitor: Arc<Mutex<InactivityMonitor>>,
    mut angular: Option<mpsc::Receiver<MotionSample>>,
    mut linear: Option<mpsc::Receiver<MotionSample>>,
    check_period: std::time::Duration,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AlertSink>,
    shutdown: Shutdown,
) -> Option<JoinHandle<()>> {
    match (angular.is_some(), linear.is_some()) {
        (false, false) => {
            warn!("No motion sensor available; inactivity monitoring disabled");
            return None;
        }
        (true, false) => warn!("Linear acceleration unavailable; using rotation rate only"),
        (false, true) => warn!("Rotation rate unavailable; using linear acceleration only"),
        (true, true) => {}
    }

    Some(tokio::spawn(async move {
        let mut checker = ticker(check_period, false);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Inactivity monitor received shutdown signal");
                    break;
                }
                sample = next_sample(&mut angular) => match sample {
                    Some(sample) => {
                        let mut guard = monitor.lock().unwrap_or_else(|e| e.into_inner());
                        guard.on_angular_sample(&sample);
                    }
                    None => {
                        warn!("Rotation-rate stream ended");
                        angular = None;
                    }
                },
                sample = next_sample(&mut linear) => match sample {
                    Some(sample) => {
                        let mut guard = monitor.lock().unwrap_or_else(|e| e.into_inner());
                        guard.on_linear_sample(&sample);
                    }
                    None => {
                        warn!("Linear-acceleration stream ended");
                        linear = None;
                    }
                },
                _ = checker.tick() => {
                    let alert = {
                        let mut guard = monitor.lock().unwrap_or_else(|e| e.into_inner());
                        guard.check(clock.now())
                    };
                    if let Some(alert) = alert {
                        sink.emit(alert);
                    }
                }
            }

            if angular.is_none() && linear.is_none() {
                warn!("All motion streams ended; inactivity monitoring disabled");
                break;
            }
        }
    }))
}
