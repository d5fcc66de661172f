//! src/tools.rs
//! The fixed set of calendar tools offered to the model.
//!
//! Handlers always answer with text. Failures are described, never raised,
//! because the model expects a tool result string for every call.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::availability::AvailabilityService;
use crate::calendar::{CalendarApi, EventRecord};
use crate::time_range;
use crate::{AgendaError, Result};

/// Rendered in place of an empty event list.
pub const NO_EVENTS: &str = "No events found.";

const DEFAULT_SEARCH_DAYS: u32 = 30;

/// Name, description and JSON-schema parameters of one tool.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    SearchNextEvent,
    CheckDayHour,
    CreateEvent,
    IsHoliday,
    RemoveEvent,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::SearchNextEvent,
        Tool::CheckDayHour,
        Tool::CreateEvent,
        Tool::IsHoliday,
        Tool::RemoveEvent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            | Tool::SearchNextEvent => "search_next_event",
            | Tool::CheckDayHour => "check_day_hour",
            | Tool::CreateEvent => "create_event",
            | Tool::IsHoliday => "is_holiday",
            | Tool::RemoveEvent => "remove_event",
        }
    }

    pub fn spec(self) -> ToolSpec {
        let (description, parameters) = match self {
            | Tool::SearchNextEvent => (
                "Search for the next events in the calendar within a number of days.",
                json!({
                    "type": "object",
                    "properties": {
                        "days": { "type": "integer", "minimum": 1, "description": "Number of days to look ahead (default 30)." }
                    }
                }),
            ),
            | Tool::CheckDayHour => (
                "List scheduled events on a day, or in the one-hour slot starting at the given hour.",
                json!({
                    "type": "object",
                    "properties": {
                        "day": { "type": "string", "description": "Date in YYYY-MM-DD format." },
                        "hour": { "type": "string", "description": "Time in 24-hour HH:MM format. Omit to check the entire day." }
                    },
                    "required": ["day"]
                }),
            ),
            | Tool::CreateEvent => (
                "Create an event. Give day and hour (and optionally end_hour), or start_time and end_time. \
                 Fails if the slot is taken or the day is a holiday.",
                json!({
                    "type": "object",
                    "properties": {
                        "summary": { "type": "string", "description": "Event description." },
                        "day": { "type": "string", "description": "Date in YYYY-MM-DD format." },
                        "hour": { "type": "string", "description": "Start time in 24-hour HH:MM format." },
                        "end_hour": { "type": "string", "description": "End time in HH:MM; defaults to one hour after the start." },
                        "start_time": { "type": "string", "description": "Start in ISO 8601 (YYYY-MM-DDTHH:MM:SS)." },
                        "end_time": { "type": "string", "description": "End in ISO 8601 (YYYY-MM-DDTHH:MM:SS)." }
                    },
                    "required": ["summary"]
                }),
            ),
            | Tool::IsHoliday => (
                "Check whether a date is a holiday and return its name.",
                json!({
                    "type": "object",
                    "properties": {
                        "date": { "type": "string", "description": "Date in YYYY-MM-DD format." }
                    },
                    "required": ["date"]
                }),
            ),
            | Tool::RemoveEvent => (
                "Remove the event that starts at the given day and hour.",
                json!({
                    "type": "object",
                    "properties": {
                        "day": { "type": "string", "description": "Date in YYYY-MM-DD format." },
                        "hour": { "type": "string", "description": "Start time in 24-hour HH:MM format." }
                    },
                    "required": ["day", "hour"]
                }),
            ),
        };
        ToolSpec {
            name: self.name(),
            description,
            parameters,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tool {
    type Err = AgendaError;

    fn from_str(name: &str) -> Result<Self> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.name() == name)
            .ok_or_else(|| AgendaError::UnknownTool {
                name: name.to_string(),
            })
    }
}

// ---------- arguments ----------

#[derive(Debug, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CheckArgs {
    day: String,
    #[serde(default)]
    hour: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    summary: String,
    #[serde(default)]
    day: Option<String>,
    #[serde(default)]
    hour: Option<String>,
    #[serde(default)]
    end_hour: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HolidayArgs {
    date: String,
}

#[derive(Debug, Deserialize)]
struct RemoveArgs {
    day: String,
    hour: String,
}

fn parse_args<T: DeserializeOwned>(tool: Tool, arguments: &Value) -> Result<T> {
    // Models sometimes send `null` for tools whose parameters are all optional.
    let arguments = if arguments.is_null() { json!({}) } else { arguments.clone() };
    serde_json::from_value(arguments).map_err(|e| AgendaError::InvalidToolArguments {
        tool: tool.name(),
        reason: e.to_string(),
    })
}

/// `"<start> - <summary>"` per event, one per line; [`NO_EVENTS`] when empty.
pub fn format_events(events: &[EventRecord]) -> String {
    if events.is_empty() {
        return NO_EVENTS.to_string();
    }
    events
        .iter()
        .map(|event| format!("{} - {}", event.start, event.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Dispatches tool calls onto an [`AvailabilityService`].
pub struct ToolCatalog<C: ?Sized> {
    service: Arc<AvailabilityService<C>>,
}

impl<C: CalendarApi + ?Sized> ToolCatalog<C> {
    pub fn new(service: Arc<AvailabilityService<C>>) -> Self {
        Self { service }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        Tool::ALL.into_iter().map(Tool::spec).collect()
    }

    /// Run `name` with `arguments`. Always produces text.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> String {
        let outcome = match name.parse::<Tool>() {
            | Ok(tool) => self.dispatch(tool, arguments).await,
            | Err(e) => Err(e),
        };
        match outcome {
            | Ok(text) => {
                info!(tool = name, "tool call succeeded");
                text
            },
            | Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                describe_failure(&e)
            },
        }
    }

    async fn dispatch(&self, tool: Tool, arguments: &Value) -> Result<String> {
        match tool {
            | Tool::SearchNextEvent => {
                let args: SearchArgs = parse_args(tool, arguments)?;
                let days = args.days.unwrap_or(DEFAULT_SEARCH_DAYS);
                Ok(format_events(&self.service.search_upcoming(days).await?))
            },
            | Tool::CheckDayHour => {
                let args: CheckArgs = parse_args(tool, arguments)?;
                let events = self.service.check(&args.day, args.hour.as_deref()).await?;
                Ok(format_events(&events))
            },
            | Tool::CreateEvent => {
                let args: CreateArgs = parse_args(tool, arguments)?;
                let record = self.create(tool, args).await?;
                Ok(match record.link {
                    | Some(link) => format!("Event created: {} at {} ({link})", record.summary, record.start),
                    | None => format!("Event created: {} at {}", record.summary, record.start),
                })
            },
            | Tool::IsHoliday => {
                let args: HolidayArgs = parse_args(tool, arguments)?;
                Ok(match self.service.is_holiday(&args.date).await? {
                    | Some(name) => format!("{} is a holiday: {name}", args.date),
                    | None => format!("{} is not a holiday.", args.date),
                })
            },
            | Tool::RemoveEvent => {
                let args: RemoveArgs = parse_args(tool, arguments)?;
                let removal = self.service.remove_event(&args.day, &args.hour).await?;
                Ok(format!("Event removed (id {}).", removal.event_id))
            },
        }
    }

    async fn create(&self, tool: Tool, args: CreateArgs) -> Result<EventRecord> {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        match (
            non_blank(args.start_time),
            non_blank(args.end_time),
            non_blank(args.day),
            non_blank(args.hour),
        ) {
            | (Some(start), end, _, _) => {
                let start = time_range::parse_local_datetime(&start)?;
                let end = match end {
                    | Some(end) => time_range::parse_local_datetime(&end)?,
                    | None => time_range::one_hour_after(start)?,
                };
                self.service.create_event_between(&args.summary, start, end).await
            },
            | (None, _, Some(day), Some(hour)) => {
                self.service
                    .create_event(&args.summary, &day, &hour, args.end_hour.as_deref())
                    .await
            },
            | _ => Err(AgendaError::InvalidToolArguments {
                tool: tool.name(),
                reason: "give either start_time (and end_time) or day and hour".into(),
            }),
        }
    }
}

/// User-facing description of a tool failure.
fn describe_failure(err: &AgendaError) -> String {
    match err {
        | AgendaError::InvalidTimeFormat { .. }
        | AgendaError::InvalidToolArguments { .. }
        | AgendaError::UnknownTool { .. } => format!("Error: {err}"),
        | AgendaError::SlotUnavailable { reason } => format!("Could not create the event: {reason}."),
        | AgendaError::EventNotFound { target } => format!("No event found at {target}."),
        | AgendaError::Timeout { .. } => format!("The calendar did not answer in time: {err}"),
        | e if e.is_remote_failure() => format!("The calendar service returned an error: {err}"),
        | _ => format!("An error occurred: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::EventTime;
    use chrono::DateTime;

    fn event(start: &str, summary: &str) -> EventRecord {
        let at = DateTime::parse_from_rfc3339(start).unwrap();
        EventRecord {
            id: summary.to_lowercase(),
            summary: summary.to_string(),
            start: EventTime::At(at),
            end: EventTime::At(at + chrono::Duration::hours(1)),
            time_zone: None,
            link: None,
        }
    }

    #[test]
    fn empty_list_renders_sentinel() {
        assert_eq!(format_events(&[]), NO_EVENTS);
    }

    #[test]
    fn events_render_one_per_line() {
        let text = format_events(&[
            event("2025-12-08T09:00:00-03:00", "Standup"),
            event("2025-12-08T15:00:00-03:00", "Dentist"),
        ]);
        insta::assert_snapshot!(text, @r"
        2025-12-08T09:00:00-03:00 - Standup
        2025-12-08T15:00:00-03:00 - Dentist
        ");
    }

    #[test]
    fn tool_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(tool.name().parse::<Tool>().unwrap(), tool);
        }
        assert!(matches!(
            "dia_atual".parse::<Tool>(),
            Err(AgendaError::UnknownTool { .. })
        ));
    }

    #[test]
    fn every_schema_is_an_object_with_known_required_fields() {
        for tool in Tool::ALL {
            let spec = tool.spec();
            assert_eq!(spec.parameters["type"], "object", "{tool}");
            let properties = spec.parameters["properties"].as_object().unwrap();
            if let Some(required) = spec.parameters.get("required") {
                for field in required.as_array().unwrap() {
                    assert!(properties.contains_key(field.as_str().unwrap()), "{tool}: {field}");
                }
            }
        }
    }

    #[test]
    fn null_arguments_count_as_empty_object() {
        let args: SearchArgs = parse_args(Tool::SearchNextEvent, &Value::Null).unwrap();
        assert!(args.days.is_none());
        let err = parse_args::<RemoveArgs>(Tool::RemoveEvent, &json!({ "day": "2025-12-08" })).unwrap_err();
        assert!(matches!(err, AgendaError::InvalidToolArguments { tool: "remove_event", .. }));
    }

    #[test]
    fn failures_are_described_not_raised() {
        let text = describe_failure(&AgendaError::EventNotFound {
            target: "2025-12-08 15:00".into(),
        });
        assert_eq!(text, "No event found at 2025-12-08 15:00.");
        let text = describe_failure(&AgendaError::RemoteService {
            detail: "quota exceeded".into(),
        });
        assert_eq!(text, "The calendar service returned an error: calendar service error: quota exceeded");
    }
}
