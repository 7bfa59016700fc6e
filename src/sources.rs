//! External data providers: health metrics and motion sensors
//!
//! Real providers live outside this crate. The simulated implementations here
//! drive the CLI, and the scripted one drives tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SourceError;
use crate::models::{MetricKind, MotionSample, Vector3};
use crate::scheduler::{ticker, Shutdown};

/// Point-in-time or range-aggregated health metric provider
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Value of `kind` aggregated over `[day_start, now]`, or the latest sample
    /// for instantaneous metrics such as heart rate
    async fn fetch(
        &self,
        kind: MetricKind,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<f64, SourceError>;
}

/// Response a [`ScriptedMetricSource`] plays back
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptedResponse {
    Value(f64),
    Fail,
    /// Never completes; exercises the poller timeout
    Hang,
}

/// Plays back a queue of responses per kind; the last response repeats
#[derive(Debug, Default)]
pub struct ScriptedMetricSource {
    scripts: Mutex<HashMap<MetricKind, VecDeque<ScriptedResponse>>>,
}

impl ScriptedMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, kind: MetricKind, responses: Vec<ScriptedResponse>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(kind, responses.into());
        }
        self
    }

    fn next_response(&self, kind: MetricKind) -> ScriptedResponse {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        match scripts.get_mut(&kind) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(ScriptedResponse::Fail),
            Some(queue) => queue.front().copied().unwrap_or(ScriptedResponse::Fail),
            None => ScriptedResponse::Fail,
        }
    }
}

#[async_trait]
impl MetricSource for ScriptedMetricSource {
    async fn fetch(
        &self,
        kind: MetricKind,
        _day_start: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<f64, SourceError> {
        match self.next_response(kind) {
            ScriptedResponse::Value(value) => Ok(value),
            ScriptedResponse::Fail => Err(SourceError::NoData {
                metric: kind.to_string(),
            }),
            ScriptedResponse::Hang => std::future::pending::<Result<f64, SourceError>>().await,
        }
    }
}

#[derive(Debug)]
struct SimulatedDay {
    rng: StdRng,
    started: Option<DateTime<Utc>>,
    steps: f64,
    heart_rate: f64,
    water: f64,
}

/// Random-walk metric provider with optional failure injection
#[derive(Debug)]
pub struct SimulatedMetricSource {
    state: Mutex<SimulatedDay>,
    failure_rate: f64,
}

impl SimulatedMetricSource {
    pub fn new(seed: u64, failure_rate: f64) -> Self {
        Self {
            state: Mutex::new(SimulatedDay {
                rng: StdRng::seed_from_u64(seed),
                started: None,
                steps: 0.0,
                heart_rate: 72.0,
                water: 0.0,
            }),
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl MetricSource for SimulatedMetricSource {
    async fn fetch(
        &self,
        kind: MetricKind,
        day_start: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<f64, SourceError> {
        let mut day = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Cumulative totals restart with each calendar day
        if day.started != Some(day_start) {
            if day.started.is_some() {
                debug!(%day_start, "Simulated day rolled over");
            }
            day.started = Some(day_start);
            day.steps = 0.0;
            day.water = 0.0;
        }

        if day.rng.gen::<f64>() < self.failure_rate {
            return Err(SourceError::FetchFailed {
                metric: kind.to_string(),
                reason: "simulated provider failure".to_string(),
            });
        }

        let value = match kind {
            MetricKind::Steps => {
                let walked = day.rng.gen_range(0.0..60.0_f64).floor();
                day.steps += walked;
                day.steps
            }
            MetricKind::Calories => (day.steps * 0.04).floor(),
            MetricKind::HeartRate => {
                let drift = day.rng.gen_range(-12.0..12.0);
                day.heart_rate = (day.heart_rate + drift).clamp(35.0, 175.0);
                day.heart_rate.round()
            }
            MetricKind::Distance => (day.steps * 0.75).floor(),
            MetricKind::Water => {
                if day.rng.gen_bool(0.1) {
                    day.water += 250.0;
                }
                day.water
            }
        };
        debug!(metric = %kind, value, "Simulated fetch");
        Ok(value)
    }
}

/// Receivers for the two motion streams; either may be absent
#[derive(Debug, Default)]
pub struct MotionStreams {
    pub angular: Option<mpsc::Receiver<MotionSample>>,
    pub linear: Option<mpsc::Receiver<MotionSample>>,
}

/// Emits mostly-still samples with occasional movement bursts on both streams
#[derive(Debug, Clone)]
pub struct SimulatedMotionSource {
    pub cadence: Duration,
    /// Probability that a given sample shows movement
    pub movement_probability: f64,
    pub seed: u64,
}

impl SimulatedMotionSource {
    pub fn spawn(&self, shutdown: Shutdown) -> MotionStreams {
        let (angular_tx, angular_rx) = mpsc::channel(64);
        let (linear_tx, linear_rx) = mpsc::channel(64);
        let cadence = self.cadence;
        let probability = self.movement_probability.clamp(0.0, 1.0);
        let mut rng = StdRng::seed_from_u64(self.seed);

        tokio::spawn(async move {
            let mut tick = ticker(cadence, true);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let now = Utc::now();
                        let moving = rng.gen_bool(probability);
                        let jitter = rng.gen_range(-0.02..0.02);
                        let (rotation, acceleration) = if moving {
                            (Vector3::new(0.9, 0.4, 0.2), Vector3::new(0.3, 0.2, 1.5))
                        } else {
                            (Vector3::new(jitter, jitter, 0.0), Vector3::new(0.0, 0.0, 1.0 + jitter))
                        };
                        if angular_tx.send(MotionSample::new(rotation, now)).await.is_err()
                            || linear_tx.send(MotionSample::new(acceleration, now)).await.is_err()
                        {
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });

        MotionStreams {
            angular: Some(angular_rx),
            linear: Some(linear_rx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_source_repeats_last_response() {
        let source = ScriptedMetricSource::new().with_script(
            MetricKind::HeartRate,
            vec![ScriptedResponse::Value(70.0), ScriptedResponse::Value(125.0)],
        );
        let now = Utc::now();

        let first = source.fetch(MetricKind::HeartRate, now, now).await.unwrap();
        let second = source.fetch(MetricKind::HeartRate, now, now).await.unwrap();
        let third = source.fetch(MetricKind::HeartRate, now, now).await.unwrap();
        assert_eq!((first, second, third), (70.0, 125.0, 125.0));

        assert!(source.fetch(MetricKind::Water, now, now).await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_steps_are_cumulative() {
        let source = SimulatedMetricSource::new(7, 0.0);
        let now = Utc::now();
        let a = source.fetch(MetricKind::Steps, now, now).await.unwrap();
        let b = source.fetch(MetricKind::Steps, now, now).await.unwrap();
        assert!(b >= a);

        let hr = source.fetch(MetricKind::HeartRate, now, now).await.unwrap();
        assert!((35.0..=175.0).contains(&hr));
    }

    #[tokio::test]
    async fn test_simulated_totals_restart_on_new_day() {
        let source = SimulatedMetricSource::new(7, 0.0);
        let today = Utc::now();
        let mut before = 0.0;
        for _ in 0..20 {
            before = source.fetch(MetricKind::Steps, today, today).await.unwrap();
        }
        assert!(before >= 60.0);

        let tomorrow = today + chrono::Duration::days(1);
        let after = source.fetch(MetricKind::Steps, tomorrow, tomorrow).await.unwrap();
        assert!(after < 60.0);
        let distance = source.fetch(MetricKind::Distance, tomorrow, tomorrow).await.unwrap();
        assert_eq!(distance, (after * 0.75).floor());
    }

    #[tokio::test]
    async fn test_simulated_source_always_failing() {
        let source = SimulatedMetricSource::new(1, 1.0);
        let now = Utc::now();
        assert!(source.fetch(MetricKind::Distance, now, now).await.is_err());
    }
}
