//! src/availability.rs
//! Slot availability, holiday lookup, and the create/remove rules built on
//! top of them.
//!
//! Queries are issued in UTC windows from [`crate::time_range::resolve`].
//! Events are authored in the configured local timezone, so creation and
//! id lookup interpret day + hour as local wall-clock time.

use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::calendar::{CalendarApi, EventDraft, EventRecord, PRIMARY_CALENDAR_ID};
use crate::time_range::{self, TimeWindow, HOUR_FORMAT};
use crate::{AgendaError, Result};

/// Default cap on upcoming-event searches.
pub const DEFAULT_MAX_RESULTS: u32 = 10;

/// Longest look-ahead accepted by [`AvailabilityService::search_upcoming`].
pub const MAX_SEARCH_DAYS: u32 = 366;

/// Outcome of a successful removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Removal {
    pub event_id: String,
}

pub struct AvailabilityService<C: ?Sized> {
    calendar: Arc<C>,
    holiday_calendar_id: String,
    local_tz: Tz,
    max_results: u32,
}

impl<C: CalendarApi + ?Sized> AvailabilityService<C> {
    pub fn new(calendar: Arc<C>, holiday_calendar_id: impl Into<String>, local_tz: Tz) -> Self {
        Self {
            calendar,
            holiday_calendar_id: holiday_calendar_id.into(),
            local_tz,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn calendar(&self) -> &Arc<C> {
        &self.calendar
    }

    pub fn local_tz(&self) -> Tz {
        self.local_tz
    }

    /// Primary-calendar events in the whole day, or in the one-hour slot at `hour`.
    pub async fn check(&self, day: &str, hour: Option<&str>) -> Result<Vec<EventRecord>> {
        let window = time_range::resolve(day, hour)?;
        debug!(day, ?hour, "checking calendar window");
        self.calendar
            .list_events(PRIMARY_CALENDAR_ID, window, None, true)
            .await
    }

    pub async fn is_slot_free(&self, day: &str, start_hour: &str) -> Result<bool> {
        Ok(self.check(day, Some(start_hour)).await?.is_empty())
    }

    /// Name of the holiday falling on `day`, if any.
    pub async fn is_holiday(&self, day: &str) -> Result<Option<String>> {
        let window = time_range::resolve(day, None)?;
        let holidays = self
            .calendar
            .list_events(&self.holiday_calendar_id, window, None, true)
            .await?;
        Ok(holidays.into_iter().next().map(|h| h.summary))
    }

    /// Create a one-off event; `end_hour` defaults to one hour after `start_hour`.
    ///
    /// Rejected with [`AgendaError::SlotUnavailable`] when the one-hour slot
    /// at the local start time is taken or the day is a holiday, whatever
    /// the hour.
    pub async fn create_event(
        &self,
        summary: &str,
        day: &str,
        start_hour: &str,
        end_hour: Option<&str>,
    ) -> Result<EventRecord> {
        let date = time_range::parse_day(day)?;
        let start = date.and_time(time_range::parse_hour(start_hour)?);
        let end = match end_hour.map(str::trim).filter(|h| !h.is_empty()) {
            | Some(end_hour) => date.and_time(time_range::parse_hour(end_hour)?),
            | None => time_range::one_hour_after(start)?,
        };
        self.create_event_between(summary, start, end).await
    }

    /// Create an event from explicit local start/end timestamps.
    pub async fn create_event_between(
        &self,
        summary: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<EventRecord> {
        if end <= start {
            return Err(AgendaError::InvalidTimeFormat {
                input: format!("{start} .. {end}"),
                expected: "an end time after the start time",
            });
        }

        let day = start.date().format(time_range::DAY_FORMAT).to_string();
        let hour = start.time().format(HOUR_FORMAT).to_string();

        if let Some(holiday) = self.is_holiday(&day).await? {
            return Err(AgendaError::SlotUnavailable {
                reason: format!("{day} is a holiday ({holiday})"),
            });
        }
        if !self.is_local_slot_free(start).await? {
            return Err(AgendaError::SlotUnavailable {
                reason: format!("there is already an event at {day} {hour}"),
            });
        }

        let draft = EventDraft {
            summary: summary.to_string(),
            start,
            end,
            time_zone: self.local_tz.name().to_string(),
        };
        let record = self
            .calendar
            .insert_event(PRIMARY_CALENDAR_ID, &draft)
            .await?;
        info!(event_id = %record.id, %day, %hour, "created event");
        Ok(record)
    }

    /// Id of the first event starting exactly at `day` `start_hour` local time.
    pub async fn find_event_id(&self, day: &str, start_hour: &str) -> Result<Option<String>> {
        let date = time_range::parse_day(day)?;
        let time = time_range::parse_hour(start_hour)?;
        let Some(target) = self.local_instant(date, time) else {
            return Ok(None);
        };

        let window = TimeWindow::starting_at(target, Duration::hours(1))?;
        let events = self
            .calendar
            .list_events(PRIMARY_CALENDAR_ID, window, None, true)
            .await?;
        Ok(events
            .into_iter()
            .find(|event| event.start.instant() == target)
            .map(|event| event.id))
    }

    /// Delete the event starting at `day` `start_hour`.
    pub async fn remove_event(&self, day: &str, start_hour: &str) -> Result<Removal> {
        let Some(event_id) = self.find_event_id(day, start_hour).await? else {
            return Err(AgendaError::EventNotFound {
                target: format!("{day} {start_hour}"),
            });
        };
        self.calendar
            .delete_event(PRIMARY_CALENDAR_ID, &event_id)
            .await?;
        info!(%event_id, day, start_hour, "removed event");
        Ok(Removal { event_id })
    }

    /// Primary-calendar events in the next `within_days` days, clamped to
    /// `1..=MAX_SEARCH_DAYS`.
    pub async fn search_upcoming(&self, within_days: u32) -> Result<Vec<EventRecord>> {
        self.search_upcoming_from(Utc::now(), within_days).await
    }

    pub async fn search_upcoming_from(
        &self,
        now: DateTime<Utc>,
        within_days: u32,
    ) -> Result<Vec<EventRecord>> {
        let days = within_days.clamp(1, MAX_SEARCH_DAYS);
        let window = TimeWindow::starting_at(now, Duration::days(i64::from(days)))?;
        info!(days, "searching upcoming events");
        self.calendar
            .list_events(PRIMARY_CALENDAR_ID, window, Some(self.max_results), true)
            .await
    }

    /// Today's date in the local timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.local_tz).date_naive()
    }

    /// Whether the one-hour slot starting at local wall-clock `start` is empty.
    async fn is_local_slot_free(&self, start: NaiveDateTime) -> Result<bool> {
        let Some(at) = self.local_instant(start.date(), start.time()) else {
            return Err(AgendaError::InvalidTimeFormat {
                input: start.to_string(),
                expected: "a local time that exists in the configured timezone",
            });
        };
        let window = TimeWindow::starting_at(at, Duration::hours(1))?;
        let events = self
            .calendar
            .list_events(PRIMARY_CALENDAR_ID, window, None, true)
            .await?;
        Ok(events.is_empty())
    }

    fn local_instant(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        match self.local_tz.from_local_datetime(&date.and_time(time)) {
            | LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => Some(at.with_timezone(&Utc)),
            | LocalResult::None => None,
        }
    }
}
