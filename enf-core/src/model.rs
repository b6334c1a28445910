//! Frequency data model shared by the cache, the provider and the job pipeline.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::errors::{EnfError, EnfResult};

/// One reference measurement. Unique per `(dataset, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencySample {
    pub dataset: String,
    /// Second precision, grid-operator local time as published.
    pub timestamp: NaiveDateTime,
    pub frequency: f64,
}

impl FrequencySample {
    pub fn new(dataset: impl Into<String>, timestamp: NaiveDateTime, frequency: f64) -> Self {
        Self {
            dataset: dataset.into(),
            timestamp,
            frequency,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Inclusive calendar date interval, `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    /// Build a range; a reversed interval is a caller error and is not swapped.
    pub fn new(from: NaiveDate, to: NaiveDate) -> EnfResult<Self> {
        if from > to {
            return Err(EnfError::invalid_request(format!(
                "Invalid date range: from ({from}) is after to ({to})"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    /// Parse query-string dates. `to` defaults to `from`.
    pub fn parse(from: &str, to: Option<&str>) -> EnfResult<Self> {
        let from = parse_date(from)?;
        let to = match to {
            Some(raw) if !raw.trim().is_empty() => parse_date(raw)?,
            _ => from,
        };
        Self::new(from, to)
    }

    /// The whole calendar month.
    pub fn month(month: YearMonth) -> EnfResult<Self> {
        Self::new(month.first_day()?, month.last_day()?)
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    /// Every calendar date in the range.
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.from.iter_days().take_while(|d| *d <= self.to).collect()
    }

    pub fn len_days(&self) -> usize {
        (self.to - self.from).num_days() as usize + 1
    }

    /// Midnight at the start of `from`.
    pub fn start(&self) -> NaiveDateTime {
        self.from.and_time(NaiveTime::MIN)
    }

    /// Midnight after `to`; the upper bound of the half-open timestamp window.
    pub fn end_exclusive(&self) -> NaiveDateTime {
        (self.to + Duration::days(1)).and_time(NaiveTime::MIN)
    }

    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        *timestamp >= self.start() && *timestamp < self.end_exclusive()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// Accepts `2023-02-01`, `2023-02-01T10:00:00` and `2023-02-01 10:00:00`.
pub fn parse_date(raw: &str) -> EnfResult<NaiveDate> {
    let raw = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(day);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts.date());
        }
    }
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.date_naive());
    }
    Err(EnfError::invalid_request(format!("Invalid date: '{raw}'")))
}

/// A calendar month, the unit in which grid operators publish data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> EnfResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(EnfError::invalid_request(format!("Invalid month: {month}")));
        }
        Ok(Self { year, month })
    }

    pub fn of(day: NaiveDate) -> Self {
        Self {
            year: day.year(),
            month: day.month(),
        }
    }

    pub fn first_day(&self) -> EnfResult<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .ok_or_else(|| EnfError::invalid_request(format!("Invalid month: {self}")))
    }

    pub fn last_day(&self) -> EnfResult<NaiveDate> {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| EnfError::invalid_request(format!("Invalid month: {self}")))
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Payload of a match job. References the upload, never carries audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchJobRequest {
    pub blob_id: String,
    pub dataset: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl MatchJobRequest {
    pub fn new(blob_id: impl Into<String>, dataset: impl Into<String>, range: DateRange) -> Self {
        Self {
            blob_id: blob_id.into(),
            dataset: dataset.into(),
            from: range.from(),
            to: range.to(),
        }
    }

    pub fn range(&self) -> EnfResult<DateRange> {
        DateRange::new(self.from, self.to)
    }
}

/// Outcome of a successful match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(with = "match_time_format")]
    pub match_time: NaiveDateTime,
    pub query_series: Vec<f64>,
}

mod match_time_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
