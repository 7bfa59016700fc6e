//! Gamified point ledger
//!
//! Points accumulate locally per category and are persisted to the key/value
//! store on every change. Two day-scoped resets run independently: a full
//! reset of every category and a task-only reset, each tracked by its own
//! stored date. Once per calendar day the local total can be converted into
//! the remote balance.
//!
//! The conversion is a plain read-modify-write against the remote store. It
//! is serialized within this process, but another writer of the same remote
//! record can interleave between the read and the write and one of the two
//! updates is then lost. The remote store offers no compare-and-swap, so this
//! is a known gap rather than a detected condition.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{MetricKind, ReadingSet, ScoreCategory, ScoreComponents};
use crate::remote::RemoteBalanceStore;
use crate::store::KeyValueStore;

pub const KEY_LAST_RESET: &str = "score.last_reset_date";
pub const KEY_LAST_TASK_RESET: &str = "score.last_task_reset_date";
pub const KEY_LAST_CONVERSION: &str = "score.last_conversion_date";

fn category_key(category: ScoreCategory) -> String {
    format!("score.{}", category)
}

/// How many units of a cumulative day metric earn one point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointRates {
    pub steps_per_point: f64,
    pub calories_per_point: f64,
    pub meters_per_point: f64,
}

impl Default for PointRates {
    fn default() -> Self {
        Self {
            steps_per_point: 100.0,
            calories_per_point: 10.0,
            meters_per_point: 100.0,
        }
    }
}

impl PointRates {
    fn points_for(&self, kind: MetricKind, value: f64) -> Option<(ScoreCategory, i64)> {
        let (category, per_point) = match kind {
            MetricKind::Steps => (ScoreCategory::Steps, self.steps_per_point),
            MetricKind::Calories => (ScoreCategory::Calories, self.calories_per_point),
            MetricKind::Distance => (ScoreCategory::Distance, self.meters_per_point),
            MetricKind::HeartRate | MetricKind::Water => return None,
        };
        if per_point <= 0.0 || !value.is_finite() {
            return None;
        }
        Some((category, (value / per_point).floor() as i64))
    }
}

/// Result of a conversion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Converted {
        previous: i64,
        added: i64,
        new_balance: i64,
        date: String,
    },
    /// A conversion already succeeded today; nothing was sent
    AlreadyConverted { date: String },
}

struct LedgerState {
    score: ScoreComponents,
    last_reset: Option<String>,
    last_task_reset: Option<String>,
    last_conversion: Option<String>,
    store: Box<dyn KeyValueStore>,
}

impl LedgerState {
    /// Local persistence failures are logged; in-memory state stays authoritative
    fn persist(&mut self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            error!(key, error = %e, "Failed to persist ledger value");
        }
    }

    fn persist_category(&mut self, category: ScoreCategory) {
        let value = self.score.get(category).to_string();
        self.persist(&category_key(category), &value);
    }
}

pub struct ScoreLedger {
    state: Mutex<LedgerState>,
    remote: Arc<dyn RemoteBalanceStore>,
    clock: Arc<dyn Clock>,
    rates: PointRates,
    conversion: tokio::sync::Mutex<()>,
}

impl ScoreLedger {
    /// Load persisted progress from `store`
    pub fn open(
        store: Box<dyn KeyValueStore>,
        remote: Arc<dyn RemoteBalanceStore>,
        clock: Arc<dyn Clock>,
        rates: PointRates,
    ) -> Result<Self> {
        let mut score = ScoreComponents::default();
        for category in ScoreCategory::ALL {
            *score.get_mut(category) = store.get_i64(&category_key(category))?.unwrap_or(0);
        }
        let state = LedgerState {
            score,
            last_reset: store.get(KEY_LAST_RESET)?,
            last_task_reset: store.get(KEY_LAST_TASK_RESET)?,
            last_conversion: store.get(KEY_LAST_CONVERSION)?,
            store,
        };
        debug!(total = score.total(), "Score ledger loaded");

        Ok(Self {
            state: Mutex::new(state),
            remote,
            clock,
            rates,
            conversion: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current components
    pub fn snapshot(&self) -> ScoreComponents {
        self.lock().score
    }

    pub fn derived_total(&self) -> i64 {
        self.lock().score.total()
    }

    /// Zero every category on the first call of a new calendar day
    pub fn reset_if_new_day(&self) -> bool {
        let today = self.clock.today_string();
        let mut state = self.lock();
        Self::full_reset_locked(&mut state, &today)
    }

    /// Zero the task category on the first call of a new calendar day
    pub fn reset_task_score_if_new_day(&self) -> bool {
        let today = self.clock.today_string();
        let mut state = self.lock();
        Self::task_reset_locked(&mut state, &today)
    }

    fn full_reset_locked(state: &mut LedgerState, today: &str) -> bool {
        if state.last_reset.as_deref() == Some(today) {
            return false;
        }
        info!(previous = ?state.last_reset, today, "New day; resetting score ledger");
        state.score = ScoreComponents::default();
        for category in ScoreCategory::ALL {
            state.persist_category(category);
        }
        state.last_reset = Some(today.to_string());
        state.persist(KEY_LAST_RESET, today);
        true
    }

    fn task_reset_locked(state: &mut LedgerState, today: &str) -> bool {
        if state.last_task_reset.as_deref() == Some(today) {
            return false;
        }
        info!(previous = ?state.last_task_reset, today, "New day; resetting task score");
        state.score.task = 0;
        state.persist_category(ScoreCategory::Task);
        state.last_task_reset = Some(today.to_string());
        state.persist(KEY_LAST_TASK_RESET, today);
        true
    }

    /// Run both day checks, then apply `f` under the same lock
    fn mutate<F>(&self, category: ScoreCategory, f: F) -> i64
    where
        F: FnOnce(&mut i64),
    {
        let today = self.clock.today_string();
        let mut state = self.lock();
        Self::full_reset_locked(&mut state, &today);
        Self::task_reset_locked(&mut state, &today);

        f(state.score.get_mut(category));
        state.persist_category(category);
        state.score.get(category)
    }

    /// Add (or with a negative delta, subtract) points; never touches the remote store
    pub fn add_points(&self, category: ScoreCategory, delta: i64) -> i64 {
        let value = self.mutate(category, |points| *points = points.saturating_add(delta));
        debug!(%category, delta, value, "Points added");
        value
    }

    /// Overwrite a category, used when mirroring a cumulative day metric
    pub fn set_points(&self, category: ScoreCategory, value: i64) -> i64 {
        self.mutate(category, |points| *points = value)
    }

    /// Mirror steps, calories and distance from a poll tick
    ///
    /// Fallback readings leave their category untouched.
    pub fn apply_readings(&self, set: &ReadingSet) {
        for reading in set.readings.iter().filter(|r| r.source_ok) {
            if let Some((category, points)) = self.rates.points_for(reading.kind, reading.value) {
                self.set_points(category, points);
            }
        }
    }

    pub fn complete_task(&self, points: i64) -> i64 {
        info!(points, "Task completed");
        self.add_points(ScoreCategory::Task, points)
    }

    /// Penalty for giving up on a running task
    pub fn abandon_task(&self, penalty: i64) -> i64 {
        info!(penalty, "Task abandoned");
        self.add_points(ScoreCategory::Task, penalty.saturating_neg())
    }

    pub fn complete_water_schedule(&self, points: i64) -> i64 {
        info!(points, "Water schedule completed");
        self.add_points(ScoreCategory::Water, points)
    }

    pub fn last_conversion_date(&self) -> Option<String> {
        self.lock().last_conversion.clone()
    }

    /// Move today's local total into the remote balance, at most once per day
    ///
    /// The date is stamped only after the remote write succeeds; a failed read
    /// or write leaves today open for another attempt.
    #[instrument(skip(self))]
    pub async fn convert_to_remote_balance(&self, user_id: &str) -> Result<ConversionOutcome> {
        let _serialized = self.conversion.lock().await;
        let today = self.clock.today_string();

        let added = {
            let mut state = self.lock();
            // Roll the day over before reading the total
            Self::full_reset_locked(&mut state, &today);
            Self::task_reset_locked(&mut state, &today);
            if state.last_conversion.as_deref() == Some(today.as_str()) {
                info!(date = %today, "Points already converted today");
                return Ok(ConversionOutcome::AlreadyConverted { date: today });
            }
            state.score.total()
        };

        let previous = self.remote.get_balance(user_id).await?;
        let new_balance = previous.saturating_add(added);
        self.remote.set_balance(user_id, new_balance).await?;

        {
            let mut state = self.lock();
            state.last_conversion = Some(today.clone());
            state.persist(KEY_LAST_CONVERSION, &today);
        }
        info!(previous, added, new_balance, "Points converted to remote balance");

        Ok(ConversionOutcome::Converted {
            previous,
            added,
            new_balance,
            date: today,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::HealthPulseError;
    use crate::models::MetricReading;
    use crate::remote::InMemoryBalanceStore;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    struct Fixture {
        clock: Arc<ManualClock>,
        remote: Arc<InMemoryBalanceStore>,
        ledger: ScoreLedger,
    }

    fn fixture_with(store: MemoryStore, balance: i64) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let remote = Arc::new(InMemoryBalanceStore::with_balance("user-1", balance));
        let ledger = ScoreLedger::open(
            Box::new(store),
            remote.clone(),
            clock.clone(),
            PointRates::default(),
        )
        .unwrap();
        Fixture {
            clock,
            remote,
            ledger,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryStore::new(), 100)
    }

    #[test]
    fn test_negative_delta() {
        let f = fixture();
        f.ledger.add_points(ScoreCategory::Steps, 12);
        f.ledger.add_points(ScoreCategory::Steps, -5);
        assert_eq!(f.ledger.derived_total(), 7);
    }

    #[test]
    fn test_reset_is_idempotent_within_a_day() {
        let f = fixture();
        assert!(f.ledger.reset_if_new_day());
        f.ledger.add_points(ScoreCategory::Water, 3);

        assert!(!f.ledger.reset_if_new_day());
        assert_eq!(f.ledger.derived_total(), 3);

        f.clock.advance(Duration::days(1));
        assert!(f.ledger.reset_if_new_day());
        assert_eq!(f.ledger.snapshot(), ScoreComponents::default());
    }

    #[test]
    fn test_task_reset_scope() {
        let f = fixture();
        f.ledger.add_points(ScoreCategory::Steps, 10);
        f.ledger.complete_task(5);

        f.clock.advance(Duration::days(1));
        assert!(f.ledger.reset_task_score_if_new_day());
        let score = f.ledger.snapshot();
        assert_eq!(score.task, 0);
        assert_eq!(score.steps, 10);
        assert!(!f.ledger.reset_task_score_if_new_day());
    }

    #[test]
    fn test_add_points_rolls_over_day() {
        let f = fixture();
        f.ledger.add_points(ScoreCategory::Calories, 8);
        f.clock.advance(Duration::days(1));
        f.ledger.add_points(ScoreCategory::Calories, 2);
        assert_eq!(f.ledger.derived_total(), 2);
    }

    #[test]
    fn test_task_events() {
        let f = fixture();
        f.ledger.complete_task(20);
        f.ledger.abandon_task(5);
        f.ledger.complete_water_schedule(4);
        let score = f.ledger.snapshot();
        assert_eq!(score.task, 15);
        assert_eq!(score.water, 4);
        assert_eq!(score.total(), 19);
    }

    #[test]
    fn test_apply_readings_ignores_fallbacks() {
        let f = fixture();
        let now = f.clock.now();
        f.ledger.apply_readings(&ReadingSet {
            tick: 1,
            readings: vec![
                MetricReading::sampled(MetricKind::Steps, 1250.0, now),
                MetricReading::sampled(MetricKind::Distance, 930.0, now),
                MetricReading::sampled(MetricKind::HeartRate, 140.0, now),
            ],
        });
        f.ledger.apply_readings(&ReadingSet {
            tick: 2,
            readings: vec![
                MetricReading::fallback(MetricKind::Steps, now),
                MetricReading::sampled(MetricKind::Calories, 55.0, now),
            ],
        });

        let score = f.ledger.snapshot();
        assert_eq!(score.steps, 12);
        assert_eq!(score.distance, 9);
        assert_eq!(score.calories, 5);
    }

    #[test]
    fn test_progress_survives_reopen() {
        let mut store = MemoryStore::new();
        store.set_i64("score.steps", 40).unwrap();
        store.set_i64("score.task", -3).unwrap();
        store.set(KEY_LAST_CONVERSION, "2024-06-01").unwrap();

        let f = fixture_with(store, 0);
        assert_eq!(f.ledger.derived_total(), 37);
        assert_eq!(f.ledger.last_conversion_date().as_deref(), Some("2024-06-01"));
    }

    #[tokio::test]
    async fn test_conversion_once_per_day() {
        let f = fixture();
        f.ledger.add_points(ScoreCategory::Steps, 30);

        let first = f.ledger.convert_to_remote_balance("user-1").await.unwrap();
        assert_eq!(
            first,
            ConversionOutcome::Converted {
                previous: 100,
                added: 30,
                new_balance: 130,
                date: "2024-06-01".to_string(),
            }
        );
        assert_eq!(f.ledger.last_conversion_date().as_deref(), Some("2024-06-01"));

        let second = f.ledger.convert_to_remote_balance("user-1").await.unwrap();
        assert!(matches!(second, ConversionOutcome::AlreadyConverted { .. }));
        assert_eq!(f.remote.get_balance("user-1").await.unwrap(), 130);
        assert_eq!(f.remote.write_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_day_open() {
        let f = fixture();
        f.ledger.add_points(ScoreCategory::Task, 10);
        f.remote.set_fail_writes(true);

        let err = f.ledger.convert_to_remote_balance("user-1").await.unwrap_err();
        assert!(matches!(err, HealthPulseError::Remote(_)));
        assert_eq!(f.ledger.last_conversion_date(), None);

        f.remote.set_fail_writes(false);
        let outcome = f.ledger.convert_to_remote_balance("user-1").await.unwrap();
        assert!(matches!(outcome, ConversionOutcome::Converted { new_balance: 110, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_conversions_in_process_increment_once() {
        let f = fixture();
        f.ledger.add_points(ScoreCategory::Steps, 30);
        let ledger = Arc::new(f.ledger);

        let a = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.convert_to_remote_balance("user-1").await }
        });
        let b = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.convert_to_remote_balance("user-1").await }
        });
        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

        let converted = outcomes
            .iter()
            .filter(|o| matches!(o, ConversionOutcome::Converted { .. }))
            .count();
        assert_eq!(converted, 1);
        assert_eq!(f.remote.get_balance("user-1").await.unwrap(), 130);
    }

    #[tokio::test]
    async fn test_conversion_on_new_day_does_not_resend_yesterday() {
        let f = fixture();
        f.ledger.add_points(ScoreCategory::Steps, 30);
        f.ledger.convert_to_remote_balance("user-1").await.unwrap();

        f.clock.advance(Duration::days(1));
        let outcome = f.ledger.convert_to_remote_balance("user-1").await.unwrap();
        assert_eq!(
            outcome,
            ConversionOutcome::Converted {
                previous: 130,
                added: 0,
                new_balance: 130,
                date: "2024-06-02".to_string(),
            }
        );
        assert_eq!(f.remote.get_balance("user-1").await.unwrap(), 130);
        assert_eq!(f.ledger.derived_total(), 0);
    }

    #[test]
    fn test_points_saturate_at_i64_limits() {
        let f = fixture();
        f.ledger.add_points(ScoreCategory::Steps, i64::MAX);
        assert_eq!(f.ledger.add_points(ScoreCategory::Steps, 1), i64::MAX);
        f.ledger.add_points(ScoreCategory::Task, 1);
        assert_eq!(f.ledger.derived_total(), i64::MAX);

        f.ledger.add_points(ScoreCategory::Water, i64::MIN);
        assert_eq!(f.ledger.add_points(ScoreCategory::Water, -1), i64::MIN);
        assert_eq!(f.ledger.abandon_task(i64::MIN), i64::MAX);
    }

    #[tokio::test]
    async fn test_conversion_saturates_remote_balance() {
        let f = fixture_with(MemoryStore::new(), i64::MAX - 5);
        f.ledger.add_points(ScoreCategory::Task, 10);
        let outcome = f.ledger.convert_to_remote_balance("user-1").await.unwrap();
        assert!(matches!(
            outcome,
            ConversionOutcome::Converted {
                new_balance: i64::MAX,
                ..
            }
        ));
    }

    proptest! {
        #[test]
        fn test_total_is_sum_of_deltas(
            deltas in proptest::collection::vec((0usize..5, -50i64..50), 0..40)
        ) {
            let f = fixture();
            let mut expected = 0;
            for (idx, delta) in deltas {
                f.ledger.add_points(ScoreCategory::ALL[idx], delta);
                expected += delta;
            }
            prop_assert_eq!(f.ledger.derived_total(), expected);
            prop_assert_eq!(f.ledger.snapshot().total(), expected);
        }
    }
}
