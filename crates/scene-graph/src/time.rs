use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Smallest step used when an update must be strictly newer than a stored stamp.
const STAMP_EPSILON_MS: f64 = 0.001;

/// Point in time, milliseconds since the Unix epoch (UTC).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp(OrderedFloat<f64>);

impl TimeStamp {
    pub const ZERO: TimeStamp = TimeStamp(OrderedFloat(0.0));

    pub fn from_millis(millis: f64) -> Self {
        Self(OrderedFloat(millis))
    }

    pub fn from_seconds(seconds: f64) -> Self {
        Self(OrderedFloat(seconds * 1000.0))
    }

    pub fn millis(&self) -> f64 {
        self.0.into_inner()
    }

    pub fn seconds(&self) -> f64 {
        self.millis() / 1000.0
    }

    /// The smallest stamp that still counts as newer than `self`.
    pub fn successor(&self) -> Self {
        Self::from_millis(self.millis() + STAMP_EPSILON_MS)
    }

    pub fn saturating_sub_millis(&self, millis: f64) -> Self {
        Self::from_millis((self.millis() - millis).max(0.0))
    }

    /// Parses a human readable date time. Naive values are taken as UTC.
    pub fn parse_date(text: &str) -> Option<Self> {
        if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
            return Some(Self::from_millis(stamp.timestamp_millis() as f64));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .map(|naive| Self::from_millis(naive.and_utc().timestamp_millis() as f64))
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis())
    }
}

/// Tagged wire form of a [`TimeStamp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@stamptype")]
pub enum WireStamp {
    #[serde(rename = "TimeStampUTCms")]
    UtcMillis { stamp: f64 },
    #[serde(rename = "TimeStampUTCs")]
    UtcSeconds { stamp: f64 },
    #[serde(rename = "TimeStampDate")]
    Date { stamp: String },
}

impl WireStamp {
    pub fn to_stamp(&self) -> Result<TimeStamp, String> {
        match self {
            WireStamp::UtcMillis { stamp } => Ok(TimeStamp::from_millis(*stamp)),
            WireStamp::UtcSeconds { stamp } => Ok(TimeStamp::from_seconds(*stamp)),
            WireStamp::Date { stamp } => {
                TimeStamp::parse_date(stamp).ok_or_else(|| format!("unparseable date '{stamp}'"))
            }
        }
    }
}

impl From<TimeStamp> for WireStamp {
    fn from(value: TimeStamp) -> Self {
        WireStamp::UtcMillis {
            stamp: value.millis(),
        }
    }
}

impl Serialize for TimeStamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireStamp::from(*self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TimeStamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireStamp::deserialize(deserializer)?
            .to_stamp()
            .map_err(serde::de::Error::custom)
    }
}

/// "Now" provider. Stores never read the system clock directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        TimeStamp::from_millis(elapsed.as_secs_f64() * 1000.0)
    }
}

/// Hand-driven clock for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis_bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: TimeStamp) -> Self {
        Self {
            millis_bits: AtomicU64::new(start.millis().to_bits()),
        }
    }

    pub fn set(&self, stamp: TimeStamp) {
        self.millis_bits
            .store(stamp.millis().to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, millis: f64) {
        self.set(TimeStamp::from_millis(self.now().millis() + millis));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp {
        TimeStamp::from_millis(f64::from_bits(self.millis_bits.load(Ordering::SeqCst)))
    }
}
