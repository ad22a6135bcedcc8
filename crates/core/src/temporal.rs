//! Date, time and timestamp values
//!
//! Each temporal type wraps an optional chrono value: `check()` is the
//! validity predicate and the reset form is the invalid value. Parsing
//! never fails loudly: an unparseable field yields the invalid value and
//! the caller decides whether that is worth a warning. Formatting an
//! invalid value yields the empty string.
//!
//! Format metadata is a chrono strftime string (`"%Y-%m-%d"`,
//! `"%H:%M:%S"`, …); [`check_format`] validates it once at schema compile
//! so per-record formatting cannot fail.

use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike,
};
use std::fmt;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_TIMESTAMP_TZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// True when `format` is a well-formed strftime string.
///
/// Chrono reports bad specifiers lazily at render time; rejecting them at
/// schema compile keeps per-record formatting infallible.
pub fn check_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// A calendar date. Invalid (reset) by default.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Date(Option<NaiveDate>);

/// A time of day. Invalid (reset) by default.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Time(Option<NaiveTime>);

/// A date + time of day, no offset. Invalid (reset) by default.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(Option<NaiveDateTime>);

/// A timestamp with a fixed UTC offset. Invalid (reset) by default.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TimestampTz(Option<DateTime<FixedOffset>>);

impl Date {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Date {
        Date(NaiveDate::from_ymd_opt(year, month, day))
    }

    pub fn parse(text: &str, format: &str) -> Date {
        Date(NaiveDate::parse_from_str(text.trim(), format).ok())
    }

    pub fn check(&self) -> bool {
        self.0.is_some()
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }

    pub fn format(&self, format: &str) -> String {
        match self.0 {
            Some(date) => date.format(format).to_string(),
            None => String::new(),
        }
    }

    pub fn year(&self) -> Option<i32> {
        self.0.map(|d| d.year())
    }

    pub fn month(&self) -> Option<u32> {
        self.0.map(|d| d.month())
    }

    pub fn day(&self) -> Option<u32> {
        self.0.map(|d| d.day())
    }

    /// Day of week, 1 = Monday .. 7 = Sunday.
    pub fn weekday(&self) -> Option<u32> {
        self.0.map(|d| d.weekday().number_from_monday())
    }

    pub fn year_day(&self) -> Option<u32> {
        self.0.map(|d| d.ordinal())
    }

    /// Signed difference `self - other` in days.
    pub fn diff_days(&self, other: &Date) -> Option<i64> {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Some((a - b).num_days()),
            _ => None,
        }
    }

    pub fn add_days(&self, days: i64) -> Date {
        let span = Duration::try_days(days);
        Date(self.0.zip(span).and_then(|(d, s)| d.checked_add_signed(s)))
    }

    pub(crate) fn inner(&self) -> Option<NaiveDate> {
        self.0
    }
}

impl Time {
    pub fn from_hms(hour: u32, minute: u32, second: u32) -> Time {
        Time(NaiveTime::from_hms_opt(hour, minute, second))
    }

    pub fn parse(text: &str, format: &str) -> Time {
        Time(NaiveTime::parse_from_str(text.trim(), format).ok())
    }

    pub fn check(&self) -> bool {
        self.0.is_some()
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }

    pub fn format(&self, format: &str) -> String {
        match self.0 {
            Some(time) => time.format(format).to_string(),
            None => String::new(),
        }
    }

    pub fn hour(&self) -> Option<u32> {
        self.0.map(|t| t.hour())
    }

    pub fn minute(&self) -> Option<u32> {
        self.0.map(|t| t.minute())
    }

    pub fn second(&self) -> Option<u32> {
        self.0.map(|t| t.second())
    }

    /// Hours since midnight as a fraction, e.g. 12:30:00 -> 12.5.
    pub fn decimal_time(&self) -> Option<f64> {
        self.0.map(|t| {
            t.hour() as f64 + t.minute() as f64 / 60.0 + t.second() as f64 / 3600.0
        })
    }

    /// Signed difference `self - other` in seconds.
    pub fn diff_seconds(&self, other: &Time) -> Option<i64> {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Some((a - b).num_seconds()),
            _ => None,
        }
    }

    pub(crate) fn inner(&self) -> Option<NaiveTime> {
        self.0
    }
}

impl Timestamp {
    pub fn from_date_time(date: Date, time: Time) -> Timestamp {
        match (date.inner(), time.inner()) {
            (Some(d), Some(t)) => Timestamp(Some(NaiveDateTime::new(d, t))),
            _ => Timestamp(None),
        }
    }

    pub fn parse(text: &str, format: &str) -> Timestamp {
        Timestamp(NaiveDateTime::parse_from_str(text.trim(), format).ok())
    }

    pub fn check(&self) -> bool {
        self.0.is_some()
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }

    pub fn format(&self, format: &str) -> String {
        match self.0 {
            Some(ts) => ts.format(format).to_string(),
            None => String::new(),
        }
    }

    pub fn date(&self) -> Date {
        Date(self.0.map(|ts| ts.date()))
    }

    pub fn time(&self) -> Time {
        Time(self.0.map(|ts| ts.time()))
    }

    /// Signed difference `self - other` in seconds.
    pub fn diff_seconds(&self, other: &Timestamp) -> Option<i64> {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Some((a - b).num_seconds()),
            _ => None,
        }
    }

    pub fn add_seconds(&self, seconds: i64) -> Timestamp {
        let span = Duration::try_seconds(seconds);
        Timestamp(self.0.zip(span).and_then(|(ts, s)| ts.checked_add_signed(s)))
    }
}

impl TimestampTz {
    pub fn parse(text: &str, format: &str) -> TimestampTz {
        TimestampTz(DateTime::parse_from_str(text.trim(), format).ok())
    }

    pub fn check(&self) -> bool {
        self.0.is_some()
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }

    pub fn format(&self, format: &str) -> String {
        match self.0 {
            Some(ts) => ts.format(format).to_string(),
            None => String::new(),
        }
    }

    /// The same instant as an offset-free UTC timestamp.
    pub fn utc_timestamp(&self) -> Timestamp {
        Timestamp(self.0.map(|ts| ts.naive_utc()))
    }

    /// Signed difference `self - other` in seconds.
    pub fn diff_seconds(&self, other: &TimestampTz) -> Option<i64> {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Some((a - b).num_seconds()),
            _ => None,
        }
    }
}

macro_rules! temporal_fmt {
    ($type:ty, $name:literal, $default:expr) => {
        impl fmt::Debug for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.check() {
                    write!(f, concat!($name, "({})"), self.format($default))
                } else {
                    write!(f, concat!($name, "(invalid)"))
                }
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.format($default))
            }
        }
    };
}

temporal_fmt!(Date, "Date", DEFAULT_DATE_FORMAT);
temporal_fmt!(Time, "Time", DEFAULT_TIME_FORMAT);
temporal_fmt!(Timestamp, "Timestamp", DEFAULT_TIMESTAMP_FORMAT);
temporal_fmt!(TimestampTz, "TimestampTz", DEFAULT_TIMESTAMP_TZ_FORMAT);
