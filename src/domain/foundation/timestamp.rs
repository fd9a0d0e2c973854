//! Timestamp value object.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
///
/// Provider events carry Unix-second timestamps; persisted records carry
/// RFC 3339. This type bridges both without exposing chrono arithmetic at
/// every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a timestamp from Unix seconds (the provider's event `created`
    /// field). Out-of-range values clamp to the Unix epoch rather than panic;
    /// the provider never emits them.
    pub fn from_unix_secs(secs: i64) -> Self {
        match Utc.timestamp_opt(secs, 0) {
            chrono::LocalResult::Single(dt) => Self(dt),
            _ => Self(Utc.timestamp_opt(0, 0).unwrap()),
        }
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Checks if this timestamp is strictly before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is strictly after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Seconds elapsed from `other` to `self`; negative if `other` is later.
    pub fn secs_since(&self, other: &Timestamp) -> i64 {
        self.0.signed_duration_since(other.0).num_seconds()
    }

    /// Creates a new timestamp `secs` seconds later.
    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + Duration::seconds(secs))
    }

    /// Creates a new timestamp `secs` seconds earlier.
    pub fn minus_secs(&self, secs: i64) -> Self {
        Self(self.0 - Duration::seconds(secs))
    }

    /// Creates a new timestamp `days` days later.
    pub fn plus_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn now_is_monotonic_enough_for_ordering() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();
        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn unix_secs_roundtrip() {
        // 2024-01-15T00:00:00Z
        let ts = Timestamp::from_unix_secs(1705276800);
        assert_eq!(ts.as_unix_secs(), 1705276800);
        assert_eq!(ts.as_datetime().year(), 2024);
    }

    #[test]
    fn out_of_range_unix_secs_clamps_to_epoch() {
        let ts = Timestamp::from_unix_secs(i64::MAX);
        assert_eq!(ts.as_unix_secs(), 0);
    }

    #[test]
    fn ordering_comparisons() {
        let earlier = Timestamp::from_unix_secs(1000);
        let later = Timestamp::from_unix_secs(2000);
        assert!(earlier.is_before(&later));
        assert!(later.is_after(&earlier));
        assert!(!earlier.is_after(&later));
        assert!(earlier < later);
    }

    #[test]
    fn secs_since_is_signed() {
        let earlier = Timestamp::from_unix_secs(1000);
        let later = Timestamp::from_unix_secs(1300);
        assert_eq!(later.secs_since(&earlier), 300);
        assert_eq!(earlier.secs_since(&later), -300);
    }

    #[test]
    fn plus_and_minus_secs() {
        let ts = Timestamp::from_unix_secs(1000);
        assert_eq!(ts.plus_secs(60).as_unix_secs(), 1060);
        assert_eq!(ts.minus_secs(60).as_unix_secs(), 940);
    }

    #[test]
    fn plus_days_adds_whole_days() {
        let ts = Timestamp::from_unix_secs(0);
        assert_eq!(ts.plus_days(2).as_unix_secs(), 172800);
    }

    #[test]
    fn serializes_as_rfc3339_string() {
        let ts = Timestamp::from_unix_secs(1705276800);
        let json = serde_json::to_string(&ts).unwrap();
        assert!(json.contains("2024-01-15"));
        let restored: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, restored);
    }
}
