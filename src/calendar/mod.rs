//! Remote calendar access.
//!
//! [`CalendarApi`] is the seam the availability layer talks to;
//! [`GoogleCalendar`] implements it over the Google Calendar v3 REST API.
//! Sessions are acquired per conversation with [`SessionGuard`].

pub mod credentials;
pub mod google;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use tracing::debug;

use crate::time_range::TimeWindow;
use crate::{AgendaError, Result};

pub use credentials::{CredentialStore, Credentials};
pub use google::GoogleCalendar;

/// Well-known id of the authenticated user's own calendar.
pub const PRIMARY_CALENDAR_ID: &str = "primary";

/// Start or end of an event as reported by the calendar service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventTime {
    At(DateTime<FixedOffset>),
    AllDay(NaiveDate),
}

impl EventTime {
    /// Absolute instant; all-day entries start at UTC midnight.
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            | Self::At(at) => at.with_timezone(&Utc),
            | Self::AllDay(date) => Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
        }
    }

    /// Wall-clock time in the event's own offset.
    pub fn naive_local(&self) -> NaiveDateTime {
        match self {
            | Self::At(at) => at.naive_local(),
            | Self::AllDay(date) => date.and_time(NaiveTime::MIN),
        }
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            | Self::At(at) => write!(f, "{}", at.to_rfc3339()),
            | Self::AllDay(date) => write!(f, "{}", date.format(crate::time_range::DAY_FORMAT)),
        }
    }
}

/// An event owned by the remote calendar. Never persisted locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub id: String,
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    /// Named timezone the event was authored in, when the service reports one.
    pub time_zone: Option<String>,
    pub link: Option<String>,
}

/// Payload for creating an event: wall-clock times in a named timezone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventDraft {
    pub summary: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub time_zone: String,
}

/// Whether the gateway keeps its session between calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionPolicy {
    /// Stay connected until the owner disconnects (one session per conversation).
    #[default]
    KeepOpen,
    /// Disconnect after every operation.
    PerCall,
}

impl FromStr for SessionPolicy {
    type Err = AgendaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            | "keep-open" | "keep_open" | "session" => Ok(Self::KeepOpen),
            | "per-call" | "per_call" => Ok(Self::PerCall),
            | other => Err(AgendaError::Config {
                msg: format!("unknown calendar session policy {other:?} (keep-open | per-call)"),
            }),
        }
    }
}

/// Primitive operations against the remote calendar service.
///
/// Every data operation connects on demand; implementations must make
/// `connect` a no-op while a live session exists.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn connect(&self) -> Result<()>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Events starting inside `window`, ascending by start time.
    async fn list_events(
        &self,
        calendar_id: &str,
        window: TimeWindow,
        max_results: Option<u32>,
        expand_recurring: bool,
    ) -> Result<Vec<EventRecord>>;

    async fn insert_event(&self, calendar_id: &str, draft: &EventDraft) -> Result<EventRecord>;

    /// Fails with [`AgendaError::EventNotFound`] when the id is gone.
    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<()>;
}

/// Scoped calendar session: connected on open, disconnected on drop.
///
/// Dropping happens on every exit path, including early returns through `?`
/// and panics unwinding out of a tool loop.
pub struct SessionGuard<'a, C: CalendarApi + ?Sized> {
    calendar: &'a C,
}

impl<'a, C: CalendarApi + ?Sized> SessionGuard<'a, C> {
    pub async fn open(calendar: &'a C) -> Result<Self> {
        calendar.connect().await?;
        debug!("calendar session opened");
        Ok(Self { calendar })
    }

    pub fn calendar(&self) -> &C {
        self.calendar
    }
}

impl<C: CalendarApi + ?Sized> Drop for SessionGuard<'_, C> {
    fn drop(&mut self) {
        self.calendar.disconnect();
        debug!("calendar session closed");
    }
}
