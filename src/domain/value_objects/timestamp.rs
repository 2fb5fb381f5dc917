//! # Timestamp
//!
//! UTC instant used for every `*_at` column and event time.
//!
//! Values are truncated to microseconds, the resolution of a Postgres
//! `TIMESTAMPTZ`, so an entity read back from the database compares equal
//! to the one that was written.
//!
//! ```
//! use trade_accounts::domain::value_objects::Timestamp;
//!
//! let now = Timestamp::now();
//! let window_start = now.sub_secs(60);
//! assert!(window_start.is_before(&now));
//! assert_eq!(window_start.elapsed_at(&now).as_secs(), 60);
//! ```

use chrono::{DateTime, SubsecRound, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A UTC timestamp with microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(6))
    }

    /// From Unix milliseconds; `None` out of range.
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// From Unix seconds; `None` out of range.
    #[must_use]
    pub fn from_secs(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Shifts forward by `secs` (backward if negative), clamping at the
    /// representable range.
    #[must_use]
    pub fn add_secs(&self, secs: i64) -> Self {
        let shifted = TimeDelta::try_seconds(secs).and_then(|d| self.0.checked_add_signed(d));
        match shifted {
            Some(dt) => Self(dt),
            None if secs < 0 => Self(DateTime::<Utc>::MIN_UTC),
            None => Self(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Shifts backward by `secs`, clamping at the representable range.
    #[must_use]
    pub fn sub_secs(&self, secs: i64) -> Self {
        self.add_secs(secs.saturating_neg())
    }

    /// True if strictly earlier than `other`.
    #[inline]
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self.0 < other.0
    }

    /// True if strictly later than `other`.
    #[inline]
    #[must_use]
    pub fn is_after(&self, other: &Self) -> bool {
        self.0 > other.0
    }

    /// Time from `self` to `now`; zero when `self` is in the future.
    #[must_use]
    pub fn elapsed_at(&self, now: &Self) -> Duration {
        now.0
            .signed_duration_since(self.0)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// RFC 3339 form.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(6))
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}
