//! src/conversation.rs
//! Drive one chat session: model call, tool execution, repeat until the
//! model answers in plain text.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::calendar::CalendarApi;
use crate::llm::{Message, ModelBackend, ToolCallRequest};
use crate::tools::{ToolCatalog, ToolSpec};
use crate::{AgendaError, Result};

/// Append-only message history for one session.
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, message: Message) {
        debug!(role = message.role(), position = self.messages.len(), "conversation message");
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OrchestratorOptions {
    /// Tool rounds allowed per user message before giving up.
    pub max_tool_rounds: u32,
    pub model_timeout: StdDuration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            model_timeout: StdDuration::from_secs(60),
        }
    }
}

#[derive(Debug)]
enum TurnState {
    AwaitingModelResponse,
    ExecutingTools(Vec<ToolCallRequest>),
    Done(String),
}

/// Build the instruction that opens every session.
pub fn system_prompt(today: NaiveDate, tools: &[ToolSpec]) -> String {
    let mut prompt = format!(
        "You are an assistant that helps the user manage events in their Google Calendar.\n\
         Today's date is {today}. When a date does not specify the year, use the current year.\n\
         When a time does not say morning or afternoon (and is not in 24-hour format), assume the afternoon.\n\
         Use the available tools to search events, check free slots, check holidays, and create or remove events.\n\
         Available tools:",
        today = today.format(crate::time_range::DAY_FORMAT),
    );
    for tool in tools {
        prompt.push_str(&format!("\n- {}: {}", tool.name, tool.description));
    }
    prompt
}

pub struct Orchestrator<B: ?Sized, C: ?Sized> {
    backend: Arc<B>,
    catalog: ToolCatalog<C>,
    local_tz: Tz,
    options: OrchestratorOptions,
    state: ConversationState,
}

impl<B, C> Orchestrator<B, C>
where
    B: ModelBackend + ?Sized,
    C: CalendarApi + ?Sized,
{
    pub fn new(backend: Arc<B>, catalog: ToolCatalog<C>, local_tz: Tz, options: OrchestratorOptions) -> Self {
        Self {
            backend,
            catalog,
            local_tz,
            options,
            state: ConversationState::new(),
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Answer one user message, keeping earlier turns as context.
    ///
    /// Fails with [`AgendaError::ToolLoopExceeded`] when the model keeps
    /// asking for tools past `max_tool_rounds`.
    pub async fn respond(&mut self, user_text: &str) -> Result<String> {
        let specs = self.catalog.specs();
        if self.state.is_empty() {
            let today = Utc::now().with_timezone(&self.local_tz).date_naive();
            self.state.push(Message::system(system_prompt(today, &specs)));
        }
        self.state.push(Message::user(user_text));

        let mut rounds = 0u32;
        let mut turn = TurnState::AwaitingModelResponse;
        loop {
            turn = match turn {
                | TurnState::AwaitingModelResponse => {
                    let reply = self.call_model(&specs).await?;
                    if reply.tool_calls.is_empty() {
                        let text = reply.content.clone().unwrap_or_default();
                        self.state.push(reply.into_message());
                        TurnState::Done(text)
                    } else if rounds >= self.options.max_tool_rounds {
                        warn!(rounds, "model keeps requesting tools, stopping the turn");
                        return Err(AgendaError::ToolLoopExceeded { rounds });
                    } else {
                        let calls = reply.tool_calls.clone();
                        self.state.push(reply.into_message());
                        TurnState::ExecutingTools(calls)
                    }
                },
                | TurnState::ExecutingTools(calls) => {
                    rounds += 1;
                    for call in calls {
                        info!(tool = %call.name, call_id = %call.id, round = rounds, "executing tool");
                        let output = self.catalog.invoke(&call.name, &call.arguments).await;
                        self.state.push(Message::tool_result(call.id, output));
                    }
                    TurnState::AwaitingModelResponse
                },
                | TurnState::Done(text) => return Ok(text),
            };
        }
    }

    async fn call_model(&self, specs: &[ToolSpec]) -> Result<crate::llm::ModelReply> {
        let after = self.options.model_timeout;
        tokio::time::timeout(after, self.backend.complete(self.state.messages(), specs))
            .await
            .map_err(|_| AgendaError::Timeout {
                operation: "model call",
                after,
            })?
    }
}
