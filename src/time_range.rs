//! src/time_range.rs
//! Turn a (day, optional hour) pair into a concrete UTC query window.
//!
//! No I/O and no dependence on "now": the same inputs always produce the
//! same window. A missing hour selects the whole day, a present hour selects
//! a one-hour slot starting at that time.

use crate::{AgendaError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

pub const DAY_FORMAT: &str = "%Y-%m-%d";
pub const HOUR_FORMAT: &str = "%H:%M";

/// Half-open interval `[start, end)` in UTC. `start < end` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(AgendaError::InvalidTimeFormat {
                input: format!("{start} .. {end}"),
                expected: "a window whose start is before its end",
            });
        }
        Ok(Self { start, end })
    }

    /// Window of `length` beginning at `start`. Non-positive lengths are
    /// rejected like any other empty window, and so are ends past the
    /// representable range.
    pub fn starting_at(start: DateTime<Utc>, length: Duration) -> Result<Self> {
        let end = start
            .checked_add_signed(length)
            .ok_or_else(|| AgendaError::InvalidTimeFormat {
                input: format!("{start} + {length}"),
                expected: "a window ending within the supported date range",
            })?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Resolve `day` (and optionally `hour`) into a UTC window.
///
/// * no hour: `[day 00:00Z, day+1 00:00Z)`
/// * hour: `[day hour Z, day hour+1h Z)`, rolling into the next day past 23:00
///
/// Blank hour strings count as absent.
pub fn resolve(day: &str, hour: Option<&str>) -> Result<TimeWindow> {
    let date = parse_day(day)?;
    match hour.map(str::trim).filter(|h| !h.is_empty()) {
        | None => TimeWindow::starting_at(utc_midnight(date), Duration::days(1)),
        | Some(hour) => {
            let time = parse_hour(hour)?;
            let start = Utc.from_utc_datetime(&date.and_time(time));
            TimeWindow::starting_at(start, Duration::hours(1))
        },
    }
}

/// Parse an ISO calendar date (`YYYY-MM-DD`).
pub fn parse_day(day: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(day.trim(), DAY_FORMAT).map_err(|_| AgendaError::invalid_day(day))
}

/// Parse a 24-hour `HH:MM` time.
pub fn parse_hour(hour: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(hour.trim(), HOUR_FORMAT).map_err(|_| AgendaError::invalid_hour(hour))
}

/// Parse `YYYY-MM-DDTHH:MM[:SS]` without an offset, as the models send it.
pub fn parse_local_datetime(input: &str) -> Result<NaiveDateTime> {
    let trimmed = input.trim();
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .map_err(|_| AgendaError::InvalidTimeFormat {
            input: input.to_string(),
            expected: "an ISO 8601 YYYY-MM-DDTHH:MM:SS timestamp",
        })
}

/// `start` plus one hour, failing instead of overflowing at the end of the
/// supported date range.
pub fn one_hour_after(start: NaiveDateTime) -> Result<NaiveDateTime> {
    start
        .checked_add_signed(Duration::hours(1))
        .ok_or_else(|| AgendaError::InvalidTimeFormat {
            input: start.to_string(),
            expected: "a start time at least one hour before the end of the supported date range",
        })
}

fn utc_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
