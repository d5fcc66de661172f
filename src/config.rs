//! src/config.rs
//! Load and validate runtime configuration for agenda.
//!
//! Priority: CLI flags > .env > defaults.

use crate::calendar::google::GOOGLE_CALENDAR_API_BASE;
use crate::calendar::SessionPolicy;
use crate::{AgendaError, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration as StdDuration,
};
use url::Url;

pub const HOLIDAY_CALENDAR_FILE: &str = "holiday_calendar.json";
pub const TOKEN_FILE: &str = "token.json";
pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";

/// Chat backend settings.
#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String, // e.g., "gpt-4o-mini"
    pub base_url: Option<Url>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct CalendarSettings {
    pub config_dir: PathBuf,
    /// Read once at startup; constant for the life of the process.
    pub holiday_calendar_id: String,
    pub local_timezone: Tz,
    pub api_base: Url,
    pub session_policy: SessionPolicy,
}

impl CalendarSettings {
    pub fn token_path(&self) -> PathBuf {
        self.config_dir.join(TOKEN_FILE)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    // LLM
    pub llm: LlmSettings,

    // Calendar
    pub calendar: CalendarSettings,

    // HTTP/runtime
    pub http_timeout: StdDuration,
    pub http_retries: u32,
    pub model_timeout: StdDuration,
    pub rate_limit_per_min: u32,

    // Conversation
    pub max_tool_rounds: u32,
}

impl Config {
    /// Build from CLI flags + env; load the holiday calendar file.
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // Load .env first (no error if absent).
        let _ = dotenvy::dotenv();

        // ---- LLM backend ----
        let api_key = cli
            .api_key
            .clone()
            .or_else(|| env::var("OPENAI_API_KEY").ok())
            .or_else(|| env::var("COHERE_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(AgendaError::MissingEnv { key: "OPENAI_API_KEY" })?;
        let model = cli
            .model
            .clone()
            .or_else(|| env::var("MODEL_NAME").ok())
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let base_url = cli
            .base_url
            .clone()
            .or_else(|| env::var("LLM_BASE_URL").ok())
            .map(|s| Url::parse(&s))
            .transpose()?;
        let llm = LlmSettings {
            api_key,
            model,
            base_url,
            max_tokens: env_u32("MAX_TOKENS", 1000),
            temperature: env_f32("TEMPERATURE", 0.5),
        };

        // ---- Calendar ----
        let config_dir = cli
            .config_dir
            .clone()
            .or_else(|| env::var("AGENDA_CONFIG_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config"));
        let holiday_calendar_id = load_holiday_calendar_id(&config_dir.join(HOLIDAY_CALENDAR_FILE))?;

        let timezone = cli
            .timezone
            .clone()
            .or_else(|| env::var("AGENDA_TIMEZONE").ok())
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let local_timezone = parse_timezone(&timezone)?;

        let api_base = Url::parse(
            &env::var("CALENDAR_API_BASE").unwrap_or_else(|_| GOOGLE_CALENDAR_API_BASE.to_string()),
        )?;
        let session_policy = env::var("CALENDAR_SESSION_POLICY")
            .ok()
            .map(|p| p.parse::<SessionPolicy>())
            .transpose()?
            .unwrap_or_default();

        let calendar = CalendarSettings {
            config_dir,
            holiday_calendar_id,
            local_timezone,
            api_base,
            session_policy,
        };

        // ---- HTTP/runtime ----
        let http_timeout = StdDuration::from_secs(env_u64("AGENDA_HTTP_TIMEOUT_SECS", 20));
        let http_retries = env_u32("AGENDA_HTTP_RETRIES", 2);
        let model_timeout = StdDuration::from_secs(env_u64("AGENDA_MODEL_TIMEOUT_SECS", 60));
        let rate_limit_per_min = env_u32("AGENDA_RATE_PER_MIN", 30);

        let max_tool_rounds = cli
            .max_tool_rounds
            .unwrap_or_else(|| env_u32("AGENDA_MAX_TOOL_ROUNDS", 8));
        if max_tool_rounds == 0 {
            return Err(AgendaError::Config {
                msg: "max tool rounds must be at least 1".into(),
            });
        }

        Ok(Self {
            llm,
            calendar,
            http_timeout,
            http_retries,
            model_timeout,
            rate_limit_per_min,
            max_tool_rounds,
        })
    }
}

#[derive(Deserialize)]
struct HolidayCalendarFile {
    id: String,
}

/// Read the holiday calendar id from its JSON file (`{"id": "..."}`).
pub fn load_holiday_calendar_id(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| AgendaError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let file: HolidayCalendarFile = serde_json::from_str(&raw)?;
    if file.id.trim().is_empty() {
        return Err(AgendaError::Config {
            msg: format!("{} has an empty calendar id", path.display()),
        });
    }
    Ok(file.id)
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim().parse::<Tz>().map_err(|e| AgendaError::Config {
        msg: format!("unknown timezone {name:?}: {e}"),
    })
}

// ---------- helpers ----------

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_f32(key: &str, default: f32) -> f32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holiday_id_is_read_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HOLIDAY_CALENDAR_FILE);
        std::fs::write(
            &path,
            r#"{"id": "pt-br.brazilian#holiday@group.v.calendar.google.com"}"#,
        )
        .unwrap();
        assert_eq!(
            load_holiday_calendar_id(&path).unwrap(),
            "pt-br.brazilian#holiday@group.v.calendar.google.com"
        );
    }

    #[test]
    fn missing_or_blank_holiday_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HOLIDAY_CALENDAR_FILE);
        assert!(matches!(load_holiday_calendar_id(&path), Err(AgendaError::Io { .. })));

        std::fs::write(&path, r#"{"id": " "}"#).unwrap();
        assert!(matches!(load_holiday_calendar_id(&path), Err(AgendaError::Config { .. })));

        std::fs::write(&path, r#"{"name": "x"}"#).unwrap();
        assert!(matches!(load_holiday_calendar_id(&path), Err(AgendaError::Json(_))));
    }

    #[test]
    fn timezone_names_are_validated() {
        assert_eq!(parse_timezone("America/Sao_Paulo").unwrap().name(), "America/Sao_Paulo");
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn token_lives_next_to_holiday_file() {
        let settings = CalendarSettings {
            config_dir: PathBuf::from("config"),
            holiday_calendar_id: "h".into(),
            local_timezone: chrono_tz::America::Sao_Paulo,
            api_base: Url::parse(GOOGLE_CALENDAR_API_BASE).unwrap(),
            session_policy: SessionPolicy::default(),
        };
        assert_eq!(settings.token_path(), PathBuf::from("config/token.json"));
    }
}
