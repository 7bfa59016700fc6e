//! Fixed-period metric polling
//!
//! Every tick issues one fetch per metric kind concurrently. A fetch that
//! errors, times out or returns an unusable value is replaced by a fallback
//! reading, so subscribers always get a full set. Ticks are independent: no
//! retry, no backoff, and a slow tick never delays the next one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{day_start, Clock};
use crate::error::SourceError;
use crate::models::{LatestReadings, MetricKind, MetricReading, ReadingSet};
use crate::scheduler::{ticker, Shutdown};
use crate::sources::MetricSource;

/// Reading sets buffered per subscriber before it starts lagging
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

pub struct MetricPoller {
    source: Arc<dyn MetricSource>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    ticks: AtomicU64,
    sets_tx: broadcast::Sender<ReadingSet>,
    latest_tx: watch::Sender<LatestReadings>,
    shutdown: Shutdown,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MetricPoller {
    pub fn new(
        source: Arc<dyn MetricSource>,
        clock: Arc<dyn Clock>,
        fetch_timeout: Duration,
        shutdown: Shutdown,
    ) -> Self {
        let (sets_tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let (latest_tx, _) = watch::channel(LatestReadings::default());
        Self {
            source,
            clock,
            fetch_timeout,
            ticks: AtomicU64::new(0),
            sets_tx,
            latest_tx,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Receive every published reading set from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ReadingSet> {
        self.sets_tx.subscribe()
    }

    /// Copy of the latest reading per kind
    pub fn latest(&self) -> LatestReadings {
        self.latest_tx.borrow().clone()
    }

    pub fn watch_latest(&self) -> watch::Receiver<LatestReadings> {
        self.latest_tx.subscribe()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn fetch_one(&self, kind: MetricKind) -> MetricReading {
        let now = self.clock.now();
        let outcome =
            tokio::time::timeout(self.fetch_timeout, self.source.fetch(kind, day_start(now), now))
                .await
                .unwrap_or_else(|_| {
                    Err(SourceError::Timeout {
                        metric: kind.to_string(),
                        timeout_ms: self.fetch_timeout.as_millis() as u64,
                    })
                });

        match outcome {
            Ok(value) if value.is_finite() && value >= 0.0 => {
                MetricReading::sampled(kind, value, self.clock.now())
            }
            Ok(value) => {
                warn!(metric = %kind, value, "Unusable metric value; using fallback");
                MetricReading::fallback(kind, self.clock.now())
            }
            Err(e) => {
                warn!(metric = %kind, error = %e, "Metric fetch failed; using fallback");
                MetricReading::fallback(kind, self.clock.now())
            }
        }
    }

    /// Fetch all kinds concurrently without publishing
    async fn collect(&self) -> Vec<MetricReading> {
        let (steps, calories, heart_rate, distance, water) = tokio::join!(
            self.fetch_one(MetricKind::Steps),
            self.fetch_one(MetricKind::Calories),
            self.fetch_one(MetricKind::HeartRate),
            self.fetch_one(MetricKind::Distance),
            self.fetch_one(MetricKind::Water),
        );
        vec![steps, calories, heart_rate, distance, water]
    }

    fn publish(&self, readings: Vec<MetricReading>) -> ReadingSet {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let set = ReadingSet { tick, readings };

        self.latest_tx.send_modify(|latest| {
            for reading in &set.readings {
                latest.apply(reading.clone());
            }
        });
        // No subscribers is fine; the snapshot still holds the values
        let _ = self.sets_tx.send(set.clone());

        debug!(tick, fallbacks = set.fallback_count(), "Published reading set");
        set
    }

    /// Run a single tick immediately and publish it
    pub async fn poll_once(&self) -> ReadingSet {
        let readings = self.collect().await;
        self.publish(readings)
    }

    /// Begin polling every `period`; the first tick runs immediately
    pub fn start(self: &Arc<Self>, period: Duration) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Metric poller already running");
            return;
        }

        info!(period_ms = period.as_millis() as u64, "Starting metric poller");
        let poller = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            let mut tick = ticker(period, true);
            loop {
                tokio::select! {
                    _ = poller.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        // Dropping the in-flight fetches on shutdown cancels them
                        let readings = tokio::select! {
                            _ = poller.shutdown.cancelled() => None,
                            readings = poller.collect() => Some(readings),
                        };
                        match readings {
                            Some(readings) => {
                                poller.publish(readings);
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("Metric poller stopped");
        }));
    }

    /// Cancel pending fetches and halt the timer
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Metric poller task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::sources::{ScriptedMetricSource, ScriptedResponse};

    fn poller(source: ScriptedMetricSource) -> Arc<MetricPoller> {
        Arc::new(MetricPoller::new(
            Arc::new(source),
            Arc::new(SystemClock),
            Duration::from_secs(5),
            Shutdown::new(),
        ))
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back() {
        let source = ScriptedMetricSource::new()
            .with_script(MetricKind::Steps, vec![ScriptedResponse::Value(1200.0)])
            .with_script(MetricKind::HeartRate, vec![ScriptedResponse::Value(72.0)]);
        let poller = poller(source);

        let set = poller.poll_once().await;
        assert_eq!(set.tick, 1);
        assert_eq!(set.readings.len(), 5);
        assert!(set.get(MetricKind::Steps).unwrap().source_ok);
        assert_eq!(set.get(MetricKind::Steps).unwrap().value, 1200.0);

        let water = set.get(MetricKind::Water).unwrap();
        assert!(!water.source_ok);
        assert_eq!(water.value, 0.0);
        assert_eq!(set.fallback_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_fetch_times_out() {
        let source = ScriptedMetricSource::new()
            .with_script(MetricKind::HeartRate, vec![ScriptedResponse::Hang])
            .with_script(MetricKind::Steps, vec![ScriptedResponse::Value(10.0)]);
        let poller = poller(source);

        let set = poller.poll_once().await;
        assert!(!set.get(MetricKind::HeartRate).unwrap().source_ok);
        assert!(set.get(MetricKind::Steps).unwrap().source_ok);
    }

    #[tokio::test]
    async fn test_negative_value_is_rejected() {
        let source = ScriptedMetricSource::new()
            .with_script(MetricKind::Distance, vec![ScriptedResponse::Value(-3.0)]);
        let poller = poller(source);
        let set = poller.poll_once().await;
        assert!(!set.get(MetricKind::Distance).unwrap().source_ok);
    }

    #[tokio::test]
    async fn test_latest_snapshot_tracks_last_tick() {
        let source = ScriptedMetricSource::new().with_script(
            MetricKind::HeartRate,
            vec![ScriptedResponse::Value(70.0), ScriptedResponse::Value(88.0)],
        );
        let poller = poller(source);
        let mut rx = poller.subscribe();

        poller.poll_once().await;
        poller.poll_once().await;

        assert_eq!(rx.recv().await.unwrap().tick, 1);
        assert_eq!(rx.recv().await.unwrap().tick, 2);
        let latest = poller.latest();
        assert_eq!(latest.len(), 5);
        assert_eq!(latest.get(MetricKind::HeartRate).unwrap().value, 88.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_loop_and_stop() {
        let source = ScriptedMetricSource::new()
            .with_script(MetricKind::Steps, vec![ScriptedResponse::Value(5.0)]);
        let poller = poller(source);
        let mut rx = poller.subscribe();

        poller.start(Duration::from_secs(15));
        assert_eq!(rx.recv().await.unwrap().tick, 1);
        assert_eq!(rx.recv().await.unwrap().tick, 2);

        poller.stop().await;
        assert!(!poller.is_running());
        let ticks = poller.ticks();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(poller.ticks(), ticks);
    }
}
