use std::path::PathBuf;

use clap::Parser;

/// Manage your calendar by talking to it.
#[derive(Debug, Default, Parser)]
#[command(name = "agenda", version, about)]
pub struct Cli {
    /// Chat model name (overrides MODEL_NAME).
    #[arg(long)]
    pub model: Option<String>,

    /// API key for the chat backend (overrides OPENAI_API_KEY).
    #[arg(long)]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL (overrides LLM_BASE_URL).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Directory holding token.json and holiday_calendar.json.
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Named timezone new events are created in (overrides AGENDA_TIMEZONE).
    #[arg(long)]
    pub timezone: Option<String>,

    /// Maximum tool rounds per user message.
    #[arg(long)]
    pub max_tool_rounds: Option<u32>,

    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,

    /// Answer a single message and exit instead of starting a chat.
    pub message: Option<String>,
}
