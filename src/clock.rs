//! Time sources
//!
//! Components read wall-clock time through [`Clock`] so day boundaries and
//! inactivity gaps can be simulated.

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use std::sync::Mutex;

/// Date format used for every stored day key
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day used for reset and conversion bookkeeping
    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&Local).date_naive()
    }

    fn today_string(&self) -> String {
        self.today().format(DATE_FORMAT).to_string()
    }
}

/// Wall clock, local calendar day
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock; the calendar day is taken in UTC
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Start of the local calendar day containing `now`
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        // DST gap at midnight: fall back to the UTC day start
        .unwrap_or_else(|| {
            now.date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|m| m.and_utc())
                .unwrap_or(now)
        })
}
