//! OpenAI-compatible chat-completion client

use std::time::Duration;

use async_trait::async_trait;
use chatrelay_traits::{Message, ModelClient, ToolCall, ToolSchema};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;

/// Truncate error bodies so large or sensitive responses stay out of logs.
const MAX_ERROR_BODY: usize = 512;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub timeout: Duration,
    /// Retries after a retryable failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later one.
    pub retry_base_delay: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            top_p: None,
            timeout: Duration::from_secs(120),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// OpenAI client
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Send one completion request, retrying transient failures.
    pub async fn chat(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Message> {
        let body = build_request(&self.config, messages, tools);
        let mut attempt = 0;

        loop {
            let error = match self.send(&body).await {
                Ok(message) => return Ok(message),
                Err(error) => error,
            };

            attempt += 1;
            if !error.is_retryable() || attempt > self.config.max_retries {
                return Err(error);
            }

            let delay = self.delay_for(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying chat completion"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<Message> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response).await);
        }

        let data: ChatResponse = response.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::Llm("No choices in response".to_string()))?;
        Ok(parse_choice(choice))
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(
        &self,
        identity_key: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<Message> {
        debug!(
            identity_key = %identity_key,
            model = %self.config.model,
            count = messages.len(),
            "Requesting chat completion"
        );
        Ok(self.chat(messages, tools).await?)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments.
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

fn function_type() -> String {
    "function".to_string()
}

fn build_request(config: &OpenAiConfig, messages: &[Message], tools: &[ToolSchema]) -> ChatRequest {
    let messages = messages
        .iter()
        .map(|m| {
            let tool_calls: Vec<WireToolCall> = m
                .tool_calls()
                .iter()
                .map(|tc| WireToolCall {
                    id: tc.id.clone(),
                    kind: function_type(),
                    function: WireFunctionCall {
                        name: tc.name.clone(),
                        arguments: tc.arguments.to_string(),
                    },
                })
                .collect();

            // For assistant messages with tool_calls, content can be null
            let content = if !tool_calls.is_empty() && m.content().is_empty() {
                None
            } else {
                Some(m.content().to_string())
            };

            WireMessage {
                role: m.role().as_str(),
                content,
                tool_call_id: m.tool_call_id().map(str::to_string),
                tool_calls,
            }
        })
        .collect();

    let tools = tools
        .iter()
        .map(|t| WireTool {
            r#type: "function",
            function: WireFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect();

    ChatRequest {
        model: config.model.clone(),
        messages,
        tools,
        temperature: config.temperature,
        top_p: config.top_p,
    }
}

fn parse_choice(choice: ChatChoice) -> Message {
    let content = choice.message.content.unwrap_or_default();
    if choice.message.tool_calls.is_empty() {
        return Message::assistant(content);
    }

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| {
            let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null);
            ToolCall::new(tc.id, tc.function.name, arguments)
        })
        .collect();
    Message::assistant_with_tool_calls(content, tool_calls)
}

async fn response_to_error(response: Response) -> AiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated]", &body[..cut])
    } else {
        body
    };

    AiError::LlmHttp {
        provider: "openai".to_string(),
        status,
        message,
    }
}
