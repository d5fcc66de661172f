//! Google Calendar v3 gateway.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::credentials::{snippet, CredentialStore, Credentials};
use super::{CalendarApi, EventDraft, EventRecord, EventTime, SessionPolicy};
use crate::time_range::TimeWindow;
use crate::{AgendaError, Result};

pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Tunables for [`GoogleCalendar`].
#[derive(Clone, Debug)]
pub struct GatewayOptions {
    pub api_base: Url,
    pub policy: SessionPolicy,
    /// Per-request deadline; expiry surfaces as [`AgendaError::Timeout`].
    pub request_timeout: Duration,
    /// Extra attempts after the first for transient failures.
    pub retries: u32,
    pub initial_backoff: Duration,
}

impl GatewayOptions {
    pub fn new(api_base: Url) -> Self {
        Self {
            api_base,
            policy: SessionPolicy::KeepOpen,
            request_timeout: Duration::from_secs(20),
            retries: 2,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

/// Single point of contact with Google Calendar.
///
/// Holds at most one session (the current bearer token). Operations run
/// strictly one after another; the session mutex is never held across an
/// await point.
pub struct GoogleCalendar {
    http: Client,
    credentials: CredentialStore,
    options: GatewayOptions,
    session: Mutex<Option<Credentials>>,
}

impl GoogleCalendar {
    pub fn new(http: Client, credentials: CredentialStore, options: GatewayOptions) -> Self {
        Self {
            http,
            credentials,
            options,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Credentials>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bearer token of the live session, reconnecting if it has expired.
    async fn access_token(&self) -> Result<String> {
        let expired = self
            .session()
            .as_ref()
            .is_some_and(|creds| creds.is_expired(Utc::now()));
        if expired {
            info!("calendar session token expired, reconnecting");
            self.disconnect();
        }
        self.connect().await?;
        self.session()
            .as_ref()
            .map(|creds| creds.access_token.clone())
            .ok_or_else(|| AgendaError::Authentication {
                reason: "calendar session closed while in use".into(),
            })
    }

    fn finish_call(&self) {
        if self.options.policy == SessionPolicy::PerCall {
            self.disconnect();
        }
    }

    fn events_url(&self, calendar_id: &str, event_id: Option<&str>) -> Result<Url> {
        let mut url = self.options.api_base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| AgendaError::Config {
                msg: format!("calendar API base {} cannot carry a path", self.options.api_base),
            })?;
            segments.pop_if_empty().extend(["calendars", calendar_id, "events"]);
            if let Some(event_id) = event_id {
                segments.push(event_id);
            }
        }
        Ok(url)
    }

    /// Send `request`, retrying transient failures with exponential backoff.
    ///
    /// Non-success statuses that are not retryable come back as `Ok` so the
    /// caller can interpret them (404 on delete, for example).
    async fn execute(
        &self,
        operation: &'static str,
        url: &Url,
        request: RequestBuilder,
    ) -> Result<Response> {
        let max_attempts = self.options.retries + 1;
        let timeout = self.options.request_timeout;
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.options.initial_backoff)
            .with_max_elapsed_time(None)
            .build();
        let request = request.timeout(timeout);

        let mut attempt = 0u32;
        retry(policy, || {
            attempt += 1;
            let this_attempt = attempt;
            let request = request.try_clone();
            async move {
                let Some(request) = request else {
                    return Err(backoff::Error::permanent(AgendaError::Config {
                        msg: format!("{operation}: request body cannot be replayed"),
                    }));
                };
                debug!(operation, attempt = this_attempt, %url, "calendar request");

                let err = match request.send().await {
                    | Ok(response) if is_retryable_status(response.status()) => {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        status_error(url, status, &body)
                    },
                    | Ok(response) => return Ok(response),
                    | Err(source) if source.is_timeout() => AgendaError::Timeout {
                        operation,
                        after: timeout,
                    },
                    | Err(source) => AgendaError::Http {
                        url: url.clone(),
                        source,
                    },
                };

                if err.is_transient() && this_attempt < max_attempts {
                    warn!(operation, attempt = this_attempt, error = %err, "transient calendar failure, retrying");
                    Err(backoff::Error::transient(err))
                } else {
                    Err(backoff::Error::permanent(err))
                }
            }
        })
        .await
    }

    async fn fetch_events(
        &self,
        token: &str,
        calendar_id: &str,
        window: TimeWindow,
        max_results: Option<u32>,
        expand_recurring: bool,
    ) -> Result<Vec<EventRecord>> {
        let url = self.events_url(calendar_id, None)?;
        let mut query = vec![
            ("timeMin", rfc3339_utc(window.start())),
            ("timeMax", rfc3339_utc(window.end())),
            ("singleEvents", expand_recurring.to_string()),
        ];
        if expand_recurring {
            // Google only accepts startTime ordering over expanded instances.
            query.push(("orderBy", "startTime".to_string()));
        }
        if let Some(max) = max_results {
            query.push(("maxResults", max.to_string()));
        }

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(url.clone()).bearer_auth(token).query(&query);
            if let Some(page_token) = &page_token {
                request = request.query(&[("pageToken", page_token)]);
            }
            let response = self.execute("list events", &url, request).await?;
            let response = ensure_success(&url, response).await?;
            let page: GoogleEventsResponse =
                response.json().await.map_err(|e| AgendaError::RemoteService {
                    detail: format!("unreadable events listing: {e}"),
                })?;

            // Google returns everything overlapping the window; keep what starts in it.
            events.extend(
                page.items
                    .into_iter()
                    .filter_map(GoogleEvent::into_record)
                    .filter(|event| window.contains(event.start.instant())),
            );

            let filled = max_results.is_some_and(|max| events.len() >= max as usize);
            match page.next_page_token {
                | Some(next) if !filled => {
                    debug!(calendar_id, fetched = events.len(), "fetching next events page");
                    page_token = Some(next);
                },
                | _ => break,
            }
        }

        events.sort_by_key(|event| event.start.instant());
        if let Some(max) = max_results {
            events.truncate(max as usize);
        }
        Ok(events)
    }

    async fn post_event(&self, token: &str, calendar_id: &str, draft: &EventDraft) -> Result<EventRecord> {
        let url = self.events_url(calendar_id, None)?;
        let request = self
            .http
            .post(url.clone())
            .bearer_auth(token)
            .json(&GoogleEventInsert::from(draft));
        let response = self.execute("insert event", &url, request).await?;
        let response = ensure_success(&url, response).await?;
        let created: GoogleEvent = response.json().await.map_err(|e| AgendaError::RemoteService {
            detail: format!("unreadable created event: {e}"),
        })?;
        created.into_record().ok_or_else(|| AgendaError::RemoteService {
            detail: "created event is missing its start or end time".into(),
        })
    }

    async fn remove(&self, token: &str, calendar_id: &str, event_id: &str) -> Result<()> {
        let url = self.events_url(calendar_id, Some(event_id))?;
        let request = self.http.delete(url.clone()).bearer_auth(token);
        let response = self.execute("delete event", &url, request).await?;
        match response.status() {
            | StatusCode::NOT_FOUND | StatusCode::GONE => Err(AgendaError::EventNotFound {
                target: format!("id {event_id}"),
            }),
            | _ => ensure_success(&url, response).await.map(drop),
        }
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendar {
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        info!("connecting to the Google Calendar API");
        let creds = self.credentials.obtain_or_refresh().await?;
        let mut session = self.session();
        if session.is_none() {
            *session = Some(creds);
        }
        Ok(())
    }

    fn disconnect(&self) {
        if self.session().take().is_some() {
            info!("disconnecting from the Google Calendar API");
        }
    }

    fn is_connected(&self) -> bool {
        self.session().is_some()
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        window: TimeWindow,
        max_results: Option<u32>,
        expand_recurring: bool,
    ) -> Result<Vec<EventRecord>> {
        let token = self.access_token().await?;
        let result = self
            .fetch_events(&token, calendar_id, window, max_results, expand_recurring)
            .await;
        self.finish_call();

        if let Ok(events) = &result {
            debug!(calendar_id, count = events.len(), "listed events");
        }
        result
    }

    async fn insert_event(&self, calendar_id: &str, draft: &EventDraft) -> Result<EventRecord> {
        let token = self.access_token().await?;
        let result = self.post_event(&token, calendar_id, draft).await;
        self.finish_call();

        if let Ok(record) = &result {
            info!(calendar_id, event_id = %record.id, summary = %record.summary, "event created");
        }
        result
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<()> {
        let token = self.access_token().await?;
        let result = self.remove(&token, calendar_id, event_id).await;
        self.finish_call();

        if result.is_ok() {
            info!(calendar_id, event_id, "event deleted");
        }
        result
    }
}

fn rfc3339_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn status_error(url: &Url, status: StatusCode, body: &str) -> AgendaError {
    let body = snippet(body);
    AgendaError::HttpStatus {
        url: url.clone(),
        status,
        body_snip: if body.is_empty() {
            String::new()
        } else {
            format!(": {body}")
        },
    }
}

async fn ensure_success(url: &Url, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(url, status, &body))
}

// ---------- wire types ----------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventsResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<GoogleEventDateTime>,
    end: Option<GoogleEventDateTime>,
    #[serde(default)]
    html_link: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventDateTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl GoogleEventDateTime {
    fn parse(&self) -> Option<EventTime> {
        if let Some(date_time) = &self.date_time {
            return DateTime::parse_from_rfc3339(date_time).ok().map(EventTime::At);
        }
        self.date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, crate::time_range::DAY_FORMAT).ok())
            .map(EventTime::AllDay)
    }
}

impl GoogleEvent {
    /// Events without a parseable start/end (cancelled instances) are skipped.
    fn into_record(self) -> Option<EventRecord> {
        let start_raw = self.start?;
        let end_raw = self.end?;
        let (Some(start), Some(end)) = (start_raw.parse(), end_raw.parse()) else {
            warn!(event_id = %self.id, "skipping event with unparseable times");
            return None;
        };
        Some(EventRecord {
            id: self.id,
            summary: self
                .summary
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "No title".to_string()),
            start,
            end,
            time_zone: start_raw.time_zone,
            link: self.html_link,
        })
    }
}

#[derive(Debug, Serialize)]
struct GoogleEventInsert {
    summary: String,
    start: GoogleEventDateTime,
    end: GoogleEventDateTime,
}

impl From<&EventDraft> for GoogleEventInsert {
    fn from(draft: &EventDraft) -> Self {
        let at = |t: chrono::NaiveDateTime| GoogleEventDateTime {
            date_time: Some(t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            date: None,
            time_zone: Some(draft.time_zone.clone()),
        };
        Self {
            summary: draft.summary.clone(),
            start: at(draft.start),
            end: at(draft.end),
        }
    }
}
