//! Temporal query types.
//!
//! Strata keeps every fact as an append-only chain of versions stamped with
//! the timestamp of the changeset that produced them. Reads choose a point
//! on that chain with a [`TimeThreshold`]; history scans use a [`TimeRange`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The point in time a read is evaluated against.
///
/// `Latest` tracks ongoing writes: it always resolves to the newest version
/// present when the read runs. `At` pins the read to a fixed instant, so
/// repeating the query returns the same answer.
///
/// # Examples
///
/// ```
/// use strata::TimeThreshold;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let pinned = TimeThreshold::at(now);
/// assert!(pinned.includes(now));
/// assert!(!pinned.includes(now + Duration::seconds(1)));
/// assert!(TimeThreshold::latest().includes(now + Duration::days(365)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "time", rename_all = "snake_case")]
pub enum TimeThreshold {
    #[default]
    Latest,
    At(DateTime<Utc>),
}

impl TimeThreshold {
    #[must_use]
    pub const fn latest() -> Self {
        Self::Latest
    }

    #[must_use]
    pub const fn at(time: DateTime<Utc>) -> Self {
        Self::At(time)
    }

    #[must_use]
    pub const fn is_latest(&self) -> bool {
        matches!(self, Self::Latest)
    }

    /// The pinned instant, or `None` for `Latest`.
    #[must_use]
    pub const fn time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Latest => None,
            Self::At(t) => Some(*t),
        }
    }

    /// Whether a version stamped at `timestamp` is visible to this threshold.
    #[must_use]
    pub fn includes(&self, timestamp: DateTime<Utc>) -> bool {
        match self {
            Self::Latest => true,
            Self::At(t) => timestamp <= *t,
        }
    }
}

impl std::fmt::Display for TimeThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::At(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// A range of time (half-open interval: [from, to)).
///
/// Used to window history scans over fact versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub from: DateTime<Utc>,

    /// End of the range (exclusive). None means open-ended.
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Creates a time range from two timestamps.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidValue` if `from >= to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, ValidationError> {
        if from >= to {
            return Err(ValidationError::InvalidValue {
                reason: format!("time range start {from} must precede end {to}"),
            });
        }
        Ok(Self { from, to: Some(to) })
    }

    #[must_use]
    pub const fn starting_at(from: DateTime<Utc>) -> Self {
        Self { from, to: None }
    }

    /// From the epoch, open-ended.
    #[must_use]
    pub fn forever() -> Self {
        Self {
            from: DateTime::UNIX_EPOCH,
            to: None,
        }
    }

    pub const fn is_open_ended(&self) -> bool {
        self.to.is_none()
    }

    /// Check if a timestamp falls within this range [from, to).
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.from && self.to.map_or(true, |to| time < to)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::forever()
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{} → {})", self.from, to),
            None => write!(f, "[{} → ∞)", self.from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_threshold_latest_includes_everything() {
        let t = TimeThreshold::latest();
        assert!(t.is_latest());
        assert!(t.time().is_none());
        assert!(t.includes(DateTime::UNIX_EPOCH));
        assert!(t.includes(Utc::now() + Duration::days(1)));
    }

    #[test]
    fn test_threshold_at_is_inclusive() {
        let now = Utc::now();
        let t = TimeThreshold::at(now);
        assert!(!t.is_latest());
        assert_eq!(t.time(), Some(now));
        assert!(t.includes(now));
        assert!(t.includes(now - Duration::milliseconds(1)));
        assert!(!t.includes(now + Duration::milliseconds(1)));
    }

    #[test]
    fn test_threshold_display() {
        assert_eq!(TimeThreshold::latest().to_string(), "latest");
        let t = DateTime::UNIX_EPOCH;
        assert!(TimeThreshold::at(t).to_string().starts_with("1970-01-01"));
    }

    #[test]
    fn test_threshold_serialization() {
        let t = TimeThreshold::at(Utc::now());
        let json = serde_json::to_string(&t).unwrap();
        let back: TimeThreshold = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);

        let json = serde_json::to_string(&TimeThreshold::Latest).unwrap();
        assert_eq!(json, r#"{"type":"latest"}"#);
    }

    #[test]
    fn test_time_range_contains() {
        let start = Utc::now();
        let end = start + Duration::hours(1);
        let range = TimeRange::new(start, end).unwrap();

        assert!(range.contains(start));
        assert!(range.contains(start + Duration::minutes(30)));
        assert!(!range.contains(end));
        assert!(!range.contains(start - Duration::hours(1)));
    }

    #[test]
    fn test_time_range_new_invalid() {
        let now = Utc::now();
        assert!(TimeRange::new(now, now).is_err());
        assert!(TimeRange::new(now, now - Duration::hours(1)).is_err());
    }

    #[test]
    fn test_time_range_forever() {
        let range = TimeRange::forever();
        assert!(range.is_open_ended());
        assert!(range.contains(DateTime::UNIX_EPOCH));
        assert!(range.to_string().contains('∞'));
    }
}
