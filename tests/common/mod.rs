//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agenda::availability::AvailabilityService;
use agenda::calendar::{CalendarApi, EventDraft, EventRecord, EventTime, PRIMARY_CALENDAR_ID};
use agenda::llm::{Message, ModelBackend, ModelReply, ToolCallRequest};
use agenda::time_range::TimeWindow;
use agenda::tools::ToolSpec;
use agenda::{AgendaError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone};
use chrono_tz::Tz;
use serde_json::Value;

pub const HOLIDAY_CALENDAR: &str = "holidays@test";
pub const LOCAL_TZ: Tz = chrono_tz::America::Sao_Paulo;

/// In-memory calendar keyed by calendar id.
#[derive(Default)]
pub struct FakeCalendar {
    events: Mutex<HashMap<String, Vec<EventRecord>>>,
    next_id: AtomicUsize,
    connected: AtomicBool,
    pub connects: AtomicUsize,
    pub list_calls: AtomicUsize,
    /// When set, every data operation fails like an unreachable service.
    pub failing: AtomicBool,
}

impl FakeCalendar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_event(&self, calendar_id: &str, id: &str, summary: &str, start_rfc3339: &str) {
        let start = DateTime::parse_from_rfc3339(start_rfc3339).unwrap();
        self.push(
            calendar_id,
            EventRecord {
                id: id.to_string(),
                summary: summary.to_string(),
                start: EventTime::At(start),
                end: EventTime::At(start + chrono::Duration::hours(1)),
                time_zone: None,
                link: None,
            },
        );
    }

    pub fn add_holiday(&self, date: &str, name: &str) {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        self.push(
            HOLIDAY_CALENDAR,
            EventRecord {
                id: format!("holiday-{date}"),
                summary: name.to_string(),
                start: EventTime::AllDay(day),
                end: EventTime::AllDay(day.succ_opt().unwrap()),
                time_zone: None,
                link: None,
            },
        );
    }

    pub fn events(&self, calendar_id: &str) -> Vec<EventRecord> {
        self.events.lock().unwrap().get(calendar_id).cloned().unwrap_or_default()
    }

    fn push(&self, calendar_id: &str, record: EventRecord) {
        self.events
            .lock()
            .unwrap()
            .entry(calendar_id.to_string())
            .or_default()
            .push(record);
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AgendaError::RemoteService {
                detail: "quota exceeded".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarApi for FakeCalendar {
    async fn connect(&self) -> Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        window: TimeWindow,
        max_results: Option<u32>,
        _expand_recurring: bool,
    ) -> Result<Vec<EventRecord>> {
        self.connect().await?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        let mut found: Vec<_> = self
            .events(calendar_id)
            .into_iter()
            .filter(|e| window.contains(e.start.instant()))
            .collect();
        found.sort_by_key(|e| e.start.instant());
        if let Some(max) = max_results {
            found.truncate(max as usize);
        }
        Ok(found)
    }

    async fn insert_event(&self, calendar_id: &str, draft: &EventDraft) -> Result<EventRecord> {
        self.connect().await?;
        self.check_failing()?;
        let tz: Tz = draft.time_zone.parse().unwrap();
        let at = |t: chrono::NaiveDateTime| EventTime::At(tz.from_local_datetime(&t).single().unwrap().fixed_offset());
        let id = format!("evt-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = EventRecord {
            id: id.clone(),
            summary: draft.summary.clone(),
            start: at(draft.start),
            end: at(draft.end),
            time_zone: Some(draft.time_zone.clone()),
            link: Some(format!("https://calendar.test/event/{id}")),
        };
        self.push(calendar_id, record.clone());
        Ok(record)
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<()> {
        self.connect().await?;
        self.check_failing()?;
        let mut events = self.events.lock().unwrap();
        let list = events.entry(calendar_id.to_string()).or_default();
        let before = list.len();
        list.retain(|e| e.id != event_id);
        if list.len() == before {
            return Err(AgendaError::EventNotFound {
                target: format!("id {event_id}"),
            });
        }
        Ok(())
    }
}

pub fn service(calendar: &Arc<FakeCalendar>) -> Arc<AvailabilityService<FakeCalendar>> {
    Arc::new(AvailabilityService::new(Arc::clone(calendar), HOLIDAY_CALENDAR, LOCAL_TZ))
}

pub fn primary() -> &'static str {
    PRIMARY_CALENDAR_ID
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Replays canned replies in order and records what it was sent.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<ModelReply>>,
    pub seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::default(),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn complete(&self, conversation: &[Message], _tools: &[ToolSpec]) -> Result<ModelReply> {
        self.seen.lock().unwrap().push(conversation.to_vec());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ModelReply::text("(script exhausted)")))
    }
}

/// Never stops asking for tools.
#[derive(Default)]
pub struct InsistentBackend {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ModelBackend for InsistentBackend {
    async fn complete(&self, _conversation: &[Message], _tools: &[ToolSpec]) -> Result<ModelReply> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ModelReply::calls(vec![call(
            &format!("call_{n}"),
            "search_next_event",
            serde_json::json!({ "days": 7 }),
        )]))
    }
}

/// Takes longer than any sensible timeout.
pub struct SlowBackend;

#[async_trait]
impl ModelBackend for SlowBackend {
    async fn complete(&self, _conversation: &[Message], _tools: &[ToolSpec]) -> Result<ModelReply> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ModelReply::text("too late"))
    }
}
