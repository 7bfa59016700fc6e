use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metric kinds sampled from the health-data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Steps,
    Calories,
    HeartRate,
    Distance,
    Water,
}

impl MetricKind {
    /// Every tracked kind, in polling order
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Steps,
        MetricKind::Calories,
        MetricKind::HeartRate,
        MetricKind::Distance,
        MetricKind::Water,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Steps => "steps",
            MetricKind::Calories => "calories",
            MetricKind::HeartRate => "heart_rate",
            MetricKind::Distance => "distance",
            MetricKind::Water => "water",
        }
    }

    /// Static placeholder metadata shown for this kind, real reading or not
    pub fn descriptor(&self) -> MetricDescriptor {
        match self {
            MetricKind::Steps => MetricDescriptor {
                label: "Steps",
                icon: "figure.walk",
                unit: "steps",
                daily_goal: 10_000.0,
            },
            MetricKind::Calories => MetricDescriptor {
                label: "Active Energy",
                icon: "flame",
                unit: "kcal",
                daily_goal: 500.0,
            },
            MetricKind::HeartRate => MetricDescriptor {
                label: "Heart Rate",
                icon: "heart",
                unit: "bpm",
                daily_goal: 0.0,
            },
            MetricKind::Distance => MetricDescriptor {
                label: "Distance",
                icon: "map",
                unit: "m",
                daily_goal: 5_000.0,
            },
            MetricKind::Water => MetricDescriptor {
                label: "Water",
                icon: "drop",
                unit: "ml",
                daily_goal: 2_000.0,
            },
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation metadata for a metric kind (not computed here)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricDescriptor {
    pub label: &'static str,
    pub icon: &'static str,
    pub unit: &'static str,
    /// Daily target; zero when the metric has no goal
    pub daily_goal: f64,
}

/// One sampled value of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    /// Which metric this reading is for
    pub kind: MetricKind,

    /// Sampled value (cumulative since day start for additive metrics)
    pub value: f64,

    /// When the value was sampled
    pub timestamp: DateTime<Utc>,

    /// False when the value is a fallback substituted for a failed fetch
    pub source_ok: bool,
}

impl MetricReading {
    /// A reading backed by real provider data
    pub fn sampled(kind: MetricKind, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            value,
            timestamp,
            source_ok: true,
        }
    }

    /// Zero-valued stand-in for a fetch that failed
    pub fn fallback(kind: MetricKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            value: 0.0,
            timestamp,
            source_ok: false,
        }
    }

    pub fn descriptor(&self) -> MetricDescriptor {
        self.kind.descriptor()
    }
}

/// All readings produced by one poll tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSet {
    /// Tick counter, starting at 1 for the first poll
    pub tick: u64,
    pub readings: Vec<MetricReading>,
}

impl ReadingSet {
    pub fn get(&self, kind: MetricKind) -> Option<&MetricReading> {
        self.readings.iter().find(|r| r.kind == kind)
    }

    /// Number of readings that had to fall back
    pub fn fallback_count(&self) -> usize {
        self.readings.iter().filter(|r| !r.source_ok).count()
    }
}

/// Latest reading per kind, overwritten on every delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatestReadings {
    readings: BTreeMap<MetricKind, MetricReading>,
}

impl LatestReadings {
    /// Last writer wins
    pub fn apply(&mut self, reading: MetricReading) {
        self.readings.insert(reading.kind, reading);
    }

    pub fn get(&self, kind: MetricKind) -> Option<&MetricReading> {
        self.readings.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricReading> {
        self.readings.values()
    }
}

/// Three-axis sensor vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Motion sensor sample from either stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub vector: Vector3,
    pub timestamp: DateTime<Utc>,
}

impl MotionSample {
    pub fn new(vector: Vector3, timestamp: DateTime<Utc>) -> Self {
        Self { vector, timestamp }
    }
}

/// Point ledger categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCategory {
    Steps,
    Calories,
    Distance,
    Water,
    Task,
}

impl ScoreCategory {
    pub const ALL: [ScoreCategory; 5] = [
        ScoreCategory::Steps,
        ScoreCategory::Calories,
        ScoreCategory::Distance,
        ScoreCategory::Water,
        ScoreCategory::Task,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreCategory::Steps => "steps",
            ScoreCategory::Calories => "calories",
            ScoreCategory::Distance => "distance",
            ScoreCategory::Water => "water",
            ScoreCategory::Task => "task",
        }
    }
}

impl fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScoreCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steps" => Ok(ScoreCategory::Steps),
            "calories" => Ok(ScoreCategory::Calories),
            "distance" => Ok(ScoreCategory::Distance),
            "water" => Ok(ScoreCategory::Water),
            "task" => Ok(ScoreCategory::Task),
            _ => Err(format!("Invalid score category: {}", s)),
        }
    }
}

/// Per-category points; the total is always derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub steps: i64,
    pub calories: i64,
    pub distance: i64,
    pub water: i64,
    pub task: i64,
}

impl ScoreComponents {
    pub fn get(&self, category: ScoreCategory) -> i64 {
        match category {
            ScoreCategory::Steps => self.steps,
            ScoreCategory::Calories => self.calories,
            ScoreCategory::Distance => self.distance,
            ScoreCategory::Water => self.water,
            ScoreCategory::Task => self.task,
        }
    }

    pub fn get_mut(&mut self, category: ScoreCategory) -> &mut i64 {
        match category {
            ScoreCategory::Steps => &mut self.steps,
            ScoreCategory::Calories => &mut self.calories,
            ScoreCategory::Distance => &mut self.distance,
            ScoreCategory::Water => &mut self.water,
            ScoreCategory::Task => &mut self.task,
        }
    }

    pub fn total(&self) -> i64 {
        [self.steps, self.calories, self.distance, self.water, self.task]
            .into_iter()
            .fold(0i64, i64::saturating_add)
    }
}
