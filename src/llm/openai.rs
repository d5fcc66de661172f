//! OpenAI-compatible chat-completions backend.
//!
//! Any endpoint speaking the OpenAI tool-calling protocol works, including
//! Cohere's compatibility API via `LLM_BASE_URL`.

use std::num::NonZeroU32;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionTool,
    ChatCompletionToolArgs, ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
    FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Message, ModelBackend, ModelReply, ToolCallRequest};
use crate::config::LlmSettings;
use crate::tools::ToolSpec;
use crate::{AgendaError, Result};

pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl OpenAiBackend {
    pub fn new(settings: &LlmSettings, rate_limit_per_min: u32) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(settings.api_key.clone());
        if let Some(base) = &settings.base_url {
            config = config.with_api_base(base.as_str().trim_end_matches('/'));
        }
        let limiter = NonZeroU32::new(rate_limit_per_min).map(|n| RateLimiter::direct(Quota::per_minute(n)));
        Self {
            client: Client::with_config(config),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            limiter,
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn complete(&self, conversation: &[Message], tools: &[ToolSpec]) -> Result<ModelReply> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let messages = conversation
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens);
        if !tools.is_empty() {
            request.tools(tools.iter().map(to_tool).collect::<Result<Vec<_>>>()?);
        }
        let request = request.build()?;

        debug!(model = %self.model, messages = conversation.len(), "requesting chat completion");
        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(AgendaError::EmptyModelResponse)?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(from_tool_call)
            .collect();
        Ok(ModelReply {
            content: choice.message.content,
            tool_calls,
        })
    }
}

fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage> {
    let message = match message {
        | Message::System { content } => ChatCompletionRequestSystemMessageArgs::default()
            .content(content.as_str())
            .build()?
            .into(),
        | Message::User { content } => ChatCompletionRequestUserMessageArgs::default()
            .content(content.as_str())
            .build()?
            .into(),
        | Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            if let Some(content) = content {
                builder.content(content.as_str());
            }
            if !tool_calls.is_empty() {
                builder.tool_calls(tool_calls.iter().map(to_tool_call).collect::<Vec<_>>());
            }
            builder.build()?.into()
        },
        | Message::Tool {
            tool_call_id,
            content,
        } => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(tool_call_id.as_str())
            .content(content.as_str())
            .build()?
            .into(),
    };
    Ok(message)
}

fn to_tool(spec: &ToolSpec) -> Result<ChatCompletionTool> {
    let function = FunctionObjectArgs::default()
        .name(spec.name)
        .description(spec.description)
        .parameters(spec.parameters.clone())
        .build()?;
    Ok(ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(function)
        .build()?)
}

fn to_tool_call(call: &ToolCallRequest) -> ChatCompletionMessageToolCall {
    ChatCompletionMessageToolCall {
        id: call.id.clone(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        },
    }
}

fn from_tool_call(call: ChatCompletionMessageToolCall) -> ToolCallRequest {
    let raw = call.function.arguments;
    let arguments = if raw.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(tool = %call.function.name, error = %e, "tool arguments are not valid JSON");
            Value::String(raw.clone())
        })
    };
    ToolCallRequest {
        id: call.id,
        name: call.function.name,
        arguments,
    }
}
