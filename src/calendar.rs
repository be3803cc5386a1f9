use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unix milliseconds, as accepted on the wire for date columns.
pub type Ms = i64;

/// A calendar day in UTC.
///
/// Every instant entering the system is normalized to the UTC calendar day it
/// falls on, so two instants on the same UTC date compare equal regardless of
/// their time-of-day component. Night counting and occupancy only ever see
/// `CalendarDay`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarDay(NaiveDate);

impl CalendarDay {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Truncate an instant to its UTC calendar day.
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self(instant.date_naive())
    }

    pub fn from_unix_ms(ms: Ms) -> Option<Self> {
        DateTime::from_timestamp_millis(ms).map(Self::from_instant)
    }

    /// The current UTC calendar day.
    pub fn today() -> Self {
        Self::from_instant(Utc::now())
    }

    /// Parse a day from `YYYY-MM-DD`, an RFC 3339 timestamp (any offset), a
    /// naive `YYYY-MM-DD[T ]HH:MM:SS` timestamp taken as UTC, or Unix millis.
    pub fn parse(input: &str) -> Result<Self, CalendarError> {
        let s = input.trim();
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self(date));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::from_instant(ts.with_timezone(&Utc)));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(Self::from_instant(naive.and_utc()));
            }
        }
        if let Ok(ms) = s.parse::<Ms>() {
            return Self::from_unix_ms(ms).ok_or_else(|| CalendarError::OutOfRange(ms));
        }
        Err(CalendarError::Unparseable(input.to_string()))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Midnight UTC at the start of this day.
    pub fn midnight_utc(&self) -> DateTime<Utc> {
        self.0.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    pub fn checked_add_days(&self, days: u32) -> Option<Self> {
        self.0.checked_add_days(Days::new(u64::from(days))).map(Self)
    }

    /// Signed number of days from `self` to `later` (negative if `later` is earlier).
    pub fn days_until(&self, later: CalendarDay) -> i64 {
        later.0.signed_duration_since(self.0).num_days()
    }

    /// Consecutive days in `[self, end)`.
    pub fn range_to(&self, end: CalendarDay) -> DayRange {
        DayRange { next: *self, end }
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for CalendarDay {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Finite iterator over the half-open day range `[start, end)`.
///
/// Cloning yields an independent iterator from the current position, so a
/// range can be walked any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRange {
    next: CalendarDay,
    end: CalendarDay,
}

impl Iterator for DayRange {
    type Item = CalendarDay;

    fn next(&mut self) -> Option<CalendarDay> {
        if self.next >= self.end {
            return None;
        }
        let day = self.next;
        match day.checked_add_days(1) {
            Some(succ) => self.next = succ,
            None => self.next = self.end,
        }
        Some(day)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.next.days_until(self.end).max(0) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DayRange {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("unrecognized date: {0:?} (expected YYYY-MM-DD, RFC 3339, or unix millis)")]
    Unparseable(String),
    #[error("timestamp {0} out of range")]
    OutOfRange(Ms),
}
