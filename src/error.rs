use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub type Result<T, E = AgendaError> = std::result::Result<T, E>;

/// All fallible operations in agenda should return `Result<T, AgendaError>`.
#[derive(Debug, Error)]
pub enum AgendaError {
    // ------------------- Config / CLI -------------------
    #[error("missing required environment variable: {key}")]
    MissingEnv { key: &'static str },

    #[error("invalid configuration: {msg}")]
    Config { msg: String },

    // ------------------- I/O / filesystem -------------------
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ------------------- HTTP / network -------------------
    #[error("HTTP request failed for {url}: {source}")]
    Http {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} from {url}{body_snip}")]
    HttpStatus {
        url: Url,
        status: StatusCode,
        /// Short snippet of the body for diagnostics, prefixed with ": ".
        body_snip: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    // ------------------- Parsing / formats -------------------
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // ------------------- Calendar domain -------------------
    #[error("invalid time format {input:?}: expected {expected}")]
    InvalidTimeFormat {
        input: String,
        expected: &'static str,
    },

    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("calendar service error: {detail}")]
    RemoteService { detail: String },

    #[error("event not found: {target}")]
    EventNotFound { target: String },

    #[error("slot unavailable: {reason}")]
    SlotUnavailable { reason: String },

    // ------------------- Tool loop -------------------
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidToolArguments { tool: &'static str, reason: String },

    #[error("gave up after {rounds} tool rounds without a final answer")]
    ToolLoopExceeded { rounds: u32 },

    #[error("model backend returned no choices")]
    EmptyModelResponse,

    // ------------------- LLM backends -------------------
    #[cfg(feature = "openai")]
    #[error("OpenAI API error: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),
}

impl AgendaError {
    /// Whether retrying the same request may succeed.
    ///
    /// Only transport hiccups qualify: connection failures, timeouts,
    /// throttling and server-side errors. Authentication and business-rule
    /// failures are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            | Self::Http { source, .. } => source.is_connect() || source.is_timeout(),
            | Self::HttpStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            },
            | Self::Timeout { .. } => true,
            | _ => false,
        }
    }

    /// Failures coming from the remote calendar side of the wire.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::HttpStatus { .. } | Self::RemoteService { .. }
        )
    }

    pub(crate) fn invalid_day(input: &str) -> Self {
        Self::InvalidTimeFormat {
            input: input.to_string(),
            expected: "a YYYY-MM-DD date",
        }
    }

    pub(crate) fn invalid_hour(input: &str) -> Self {
        Self::InvalidTimeFormat {
            input: input.to_string(),
            expected: "a 24-hour HH:MM time",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_transient() {
        let url = Url::parse("https://example.test/calendar").unwrap();
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::BAD_GATEWAY] {
            let err = AgendaError::HttpStatus {
                url: url.clone(),
                status,
                body_snip: String::new(),
            };
            assert!(err.is_transient(), "{status} should be retried");
        }
        let forbidden = AgendaError::HttpStatus {
            url,
            status: StatusCode::FORBIDDEN,
            body_snip: String::new(),
        };
        assert!(!forbidden.is_transient());
        assert!(forbidden.is_remote_failure());
    }

    #[test]
    fn business_rule_failures_are_not_retried() {
        let err = AgendaError::SlotUnavailable {
            reason: "busy".into(),
        };
        assert!(!err.is_transient());
        assert!(!AgendaError::Authentication {
            reason: "expired".into()
        }
        .is_transient());
    }

    #[test]
    fn not_found_message_names_the_slot() {
        let err = AgendaError::EventNotFound {
            target: "2025-12-08 15:00".into(),
        };
        assert_eq!(err.to_string(), "event not found: 2025-12-08 15:00");
    }
}
