//! Process-level wiring
//!
//! One [`HealthMonitor`] is built at startup and owns one instance of every
//! component. Components receive their collaborators explicitly; there is no
//! global state.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alerts::AlertSink;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::Result;
use crate::inactivity::{spawn_inactivity_monitor, InactivityMonitor, MovementState};
use crate::ledger::ScoreLedger;
use crate::models::{LatestReadings, ScoreComponents};
use crate::poller::MetricPoller;
use crate::scheduler::Shutdown;
use crate::sources::{MetricSource, MotionStreams};
use crate::zones::{run_zone_alerts, ZoneAlertEvaluator, ZoneAlertState};

pub struct HealthMonitor {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AlertSink>,
    poller: Arc<MetricPoller>,
    zones: Arc<Mutex<ZoneAlertEvaluator>>,
    inactivity: Arc<Mutex<InactivityMonitor>>,
    ledger: Arc<ScoreLedger>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn MetricSource>,
        ledger: ScoreLedger,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;

        let shutdown = Shutdown::new();
        let poller = Arc::new(MetricPoller::new(
            source,
            clock.clone(),
            config.poller.fetch_timeout(),
            shutdown.clone(),
        ));
        let zones = ZoneAlertEvaluator::new(config.zones.thresholds, config.zones.alarm_window());
        let inactivity = InactivityMonitor::new(config.inactivity.thresholds, clock.now());

        Ok(Self {
            config,
            clock,
            sink,
            poller,
            zones: Arc::new(Mutex::new(zones)),
            inactivity: Arc::new(Mutex::new(inactivity)),
            ledger: Arc::new(ledger),
            shutdown,
            tasks: Vec::new(),
        })
    }

    /// Start polling, zone alerting, ledger mirroring and inactivity monitoring
    ///
    /// A stopped monitor cannot be started again.
    pub fn start(&mut self, motion: MotionStreams) {
        if self.shutdown.is_triggered() {
            warn!("Health monitor was stopped; build a new one to restart");
            return;
        }
        if !self.tasks.is_empty() {
            warn!("Health monitor already started");
            return;
        }

        self.ledger.reset_if_new_day();
        self.ledger.reset_task_score_if_new_day();

        // Subscribe before the poller's first tick
        self.tasks.push(tokio::spawn(run_zone_alerts(
            self.zones.clone(),
            self.poller.subscribe(),
            self.clock.clone(),
            self.sink.clone(),
            self.shutdown.clone(),
        )));
        self.tasks.push(self.spawn_ledger_mirror());

        {
            let mut monitor = self.inactivity.lock().unwrap_or_else(|e| e.into_inner());
            *monitor = InactivityMonitor::new(self.config.inactivity.thresholds, self.clock.now());
        }
        if let Some(handle) = spawn_inactivity_monitor(
            self.inactivity.clone(),
            motion.angular,
            motion.linear,
            self.config.inactivity.check_period(),
            self.clock.clone(),
            self.sink.clone(),
            self.shutdown.clone(),
        ) {
            self.tasks.push(handle);
        }

        self.poller.start(self.config.poller.effective_period());
        info!(tasks = self.tasks.len() + 1, "Health monitor started");
    }

    fn spawn_ledger_mirror(&self) -> JoinHandle<()> {
        let ledger = self.ledger.clone();
        let mut readings = self.poller.subscribe();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = readings.recv() => match received {
                        Ok(set) => ledger.apply_readings(&set),
                        Err(RecvError::Lagged(skipped)) => {
                            // Values are cumulative, so the next set catches up
                            debug!(skipped, "Ledger mirror lagged behind the poller");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Stop every loop and wait for them to finish
    pub async fn stop(&mut self) {
        self.shutdown.trigger();
        self.poller.stop().await;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }
        info!("Health monitor stopped");
    }

    /// Acknowledge the current inactivity alert and re-arm the monitor
    pub fn dismiss_inactivity(&self) {
        let mut monitor = self.inactivity.lock().unwrap_or_else(|e| e.into_inner());
        monitor.dismiss(self.clock.now());
    }

    pub fn latest_readings(&self) -> LatestReadings {
        self.poller.latest()
    }

    pub fn score(&self) -> ScoreComponents {
        self.ledger.snapshot()
    }

    pub fn zone_state(&self) -> ZoneAlertState {
        self.zones.lock().unwrap_or_else(|e| e.into_inner()).state()
    }

    pub fn movement_state(&self) -> MovementState {
        self.inactivity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state()
    }

    pub fn ledger(&self) -> &Arc<ScoreLedger> {
        &self.ledger
    }

    pub fn poller(&self) -> &Arc<MetricPoller> {
        &self.poller
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
