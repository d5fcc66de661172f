use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use agenda::availability::AvailabilityService;
use agenda::calendar::google::GatewayOptions;
use agenda::calendar::{CalendarApi, CredentialStore, GoogleCalendar, SessionGuard};
use agenda::cli::Cli;
use agenda::config::Config;
use agenda::conversation::{Orchestrator, OrchestratorOptions};
use agenda::llm::ModelBackend;
use agenda::tools::ToolCatalog;
use agenda::AgendaError;
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli).context("loading configuration")?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("building HTTP client")?;
    let credentials = CredentialStore::new(config.calendar.token_path(), http.clone());
    let calendar = Arc::new(GoogleCalendar::new(
        http,
        credentials,
        GatewayOptions {
            policy: config.calendar.session_policy,
            request_timeout: config.http_timeout,
            retries: config.http_retries,
            ..GatewayOptions::new(config.calendar.api_base.clone())
        },
    ));

    // Released on every exit path below, including errors.
    let _session = SessionGuard::open(calendar.as_ref())
        .await
        .context("connecting to Google Calendar")?;

    let service = Arc::new(AvailabilityService::new(
        Arc::clone(&calendar),
        config.calendar.holiday_calendar_id.clone(),
        config.calendar.local_timezone,
    ));
    let mut orchestrator = Orchestrator::new(
        build_backend(&config)?,
        ToolCatalog::new(service),
        config.calendar.local_timezone,
        OrchestratorOptions {
            max_tool_rounds: config.max_tool_rounds,
            model_timeout: config.model_timeout,
        },
    );
    info!(model = %config.llm.model, "session ready");

    if let Some(message) = cli.message.as_deref() {
        answer(&mut orchestrator, message).await;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!(">> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            break;
        }
        answer(&mut orchestrator, message).await;
    }

    info!(messages = orchestrator.state().len(), "session finished");
    Ok(())
}

async fn answer<C>(orchestrator: &mut Orchestrator<dyn ModelBackend, C>, message: &str)
where
    C: CalendarApi + ?Sized,
{
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let outcome = orchestrator.respond(message).await;
    spinner.finish_and_clear();

    match outcome {
        | Ok(text) => println!("{text}"),
        | Err(e @ AgendaError::ToolLoopExceeded { .. }) => {
            println!("Sorry, I could not finish that request ({e}). Please try rephrasing it.");
        },
        | Err(e) => {
            error!(error = %e, "turn failed");
            println!("Sorry, something went wrong: {e}");
        },
    }
}

#[cfg(feature = "openai")]
fn build_backend(config: &Config) -> Result<Arc<dyn ModelBackend>> {
    Ok(Arc::new(agenda::llm::openai::OpenAiBackend::new(
        &config.llm,
        config.rate_limit_per_min,
    )))
}

#[cfg(not(feature = "openai"))]
fn build_backend(_config: &Config) -> Result<Arc<dyn ModelBackend>> {
    anyhow::bail!("agenda was built without a model backend; enable the `openai` feature")
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "agenda=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
