//! Millisecond timestamp value object.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A UTC instant with millisecond resolution, stored as Unix epoch millis.
///
/// Exchanges report quote times in epoch milliseconds and the reference
/// storage keeps them as `UInt64`, so the integer form is canonical here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a timestamp from Unix epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from Unix epoch seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Unix epoch milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Convert to a `DateTime<Utc>`.
    ///
    /// Returns `None` if the value is outside chrono's representable range.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }

    /// Move the timestamp back by `duration`, saturating at `i64::MIN`.
    #[must_use]
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }

    /// Move the timestamp forward by `duration`, saturating at `i64::MAX`.
    #[must_use]
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(duration)))
    }

    /// Signed number of milliseconds elapsed from `earlier` to `self`.
    #[must_use]
    pub const fn millis_since(&self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_positive() {
        assert!(Timestamp::now().as_millis() > 0);
    }

    #[test]
    fn from_secs_scales_to_millis() {
        assert_eq!(Timestamp::from_secs(150).as_millis(), 150_000);
    }

    #[test]
    fn saturating_sub_duration() {
        let ts = Timestamp::from_secs(200);
        assert_eq!(
            ts.saturating_sub(Duration::from_secs(60)),
            Timestamp::from_secs(140)
        );
        assert_eq!(
            Timestamp::from_millis(i64::MIN).saturating_sub(Duration::from_secs(1)),
            Timestamp::from_millis(i64::MIN)
        );
    }

    #[test]
    fn millis_since_is_signed() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(1_250);
        assert_eq!(b.millis_since(a), 250);
        assert_eq!(a.millis_since(b), -250);
    }

    #[test]
    fn display_is_rfc3339() {
        let ts = Timestamp::from_millis(1_768_824_000_000);
        assert!(ts.to_string().starts_with("2026-01-19T12:00:00"));
    }

    #[test]
    fn serializes_as_integer() {
        let ts = Timestamp::from_millis(1_673_853_746_003);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1673853746003");
    }

    #[test]
    fn datetime_conversion() {
        let dt = Utc::now();
        let ts = Timestamp::from(dt);
        assert_eq!(ts.as_millis(), dt.timestamp_millis());
    }
}
