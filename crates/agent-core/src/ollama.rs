//! Ollama API client

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::LlmError;
use crate::message::{ChatChunk, ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
use crate::provider::{build_http_client, lines, send, ChatProvider, ChatStream};
use crate::retry::RetryConfig;
use crate::settings::ProviderSettings;

/// Model information from `/api/tags`
#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

impl Model {
    /// Get human-readable size
    pub fn size_human(&self) -> String {
        let gb = self.size as f64 / (1024.0 * 1024.0 * 1024.0);
        format!("{:.1} GB", gb)
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<Model>,
}

/// One line of `/api/chat` output, streamed or not
#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<LineMessage>,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<LineToolCall>,
}

#[derive(Debug, Deserialize)]
struct LineToolCall {
    id: Option<String>,
    function: LineFunction,
}

#[derive(Debug, Deserialize)]
struct LineFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl ChatLine {
    fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(Usage {
            prompt_tokens: self.prompt_eval_count.unwrap_or(0),
            completion_tokens: self.eval_count.unwrap_or(0),
        })
    }

    fn into_parts(self) -> (String, Vec<ToolCall>) {
        match self.message {
            Some(msg) => {
                let calls = msg
                    .tool_calls
                    .into_iter()
                    .map(|tc| {
                        let id = tc.id.unwrap_or_else(ToolCall::generate_id);
                        ToolCall::new(id, tc.function.name, tc.function.arguments)
                    })
                    .collect();
                (msg.content, calls)
            }
            None => (String::new(), Vec::new()),
        }
    }
}

/// Ollama API client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    /// Wait for response headers, a full non-streamed body, or the next stream chunk
    timeout: Duration,
    retry: RetryConfig,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_http_client()?,
            timeout,
            retry: RetryConfig::default(),
        })
    }

    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, LlmError> {
        Self::new(&settings.ollama_url, settings.request_timeout())
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check if Ollama is running
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);

        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Installed models with their sizes
    pub async fn tags(&self) -> Result<Vec<Model>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let url = url.as_str();

        let resp = self
            .retry
            .run(move || send(self.client.get(url).timeout(self.timeout), self.timeout))
            .await?;

        let tags: TagsResponse = resp.json().await.map_err(|e| LlmError::Decode(e.to_string()))?;
        Ok(tags.models)
    }

    async fn post_chat(&self, body: &Value, stream: bool) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let url = url.as_str();
        self.retry
            .run(move || {
                let mut request = self.client.post(url).json(body);
                if !stream {
                    request = request.timeout(self.timeout);
                }
                send(request, self.timeout)
            })
            .await
    }
}

fn build_body(model: &str, messages: &[ChatMessage], tools: &[ToolDefinition], stream: bool) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages.iter().map(message_to_ollama).collect::<Vec<_>>(),
        "stream": stream,
    });
    if !tools.is_empty() {
        body["tools"] = json!(tools);
    }
    body
}

fn message_to_ollama(msg: &ChatMessage) -> Value {
    let mut wire = json!({ "role": msg.role.to_string(), "content": msg.content });
    if msg.role == Role::Assistant && msg.has_tool_calls() {
        wire["tool_calls"] = msg
            .tool_calls
            .iter()
            .map(|tc| {
                // Ollama expects an object, never a JSON string
                let arguments = match &tc.function.arguments {
                    Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| json!({})),
                    other => other.clone(),
                };
                json!({ "function": { "name": tc.function.name, "arguments": arguments } })
            })
            .collect();
    }
    if let Some(id) = &msg.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }
    wire
}

fn parse_line(line: &str) -> Result<ChatLine, LlmError> {
    let parsed: ChatLine = serde_json::from_str(line).map_err(|e| LlmError::Decode(e.to_string()))?;
    if let Some(err) = &parsed.error {
        return Err(LlmError::Decode(format!("Ollama error: {}", err)));
    }
    Ok(parsed)
}

#[async_trait]
impl ChatProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip(self, messages, tools), fields(messages = messages.len(), tools = tools.len()))]
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let body = build_body(model, messages, tools, false);
        let resp = self.post_chat(&body, false).await?;
        let text = resp.text().await?;
        let line = parse_line(&text)?;

        let usage = line.usage();
        let (content, tool_calls) = line.into_parts();
        debug!(?usage, tool_calls = tool_calls.len(), "Ollama chat complete");

        Ok(ChatResponse {
            message: ChatMessage::assistant_with_tools(content, tool_calls),
            usage,
        })
    }

    #[instrument(skip(self, messages, tools), fields(messages = messages.len(), tools = tools.len()))]
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatStream, LlmError> {
        let body = build_body(model, messages, tools, true);
        let resp = self.post_chat(&body, true).await?;
        let mut ndjson = Box::pin(lines(resp.bytes_stream(), self.timeout));

        let stream = async_stream::stream! {
            let mut pending_calls = Vec::new();
            while let Some(line) = ndjson.next().await {
                let parsed = match line.and_then(|l| parse_line(&l)) {
                    Ok(p) => p,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let done = parsed.done;
                let usage = parsed.usage();
                let (content, calls) = parsed.into_parts();
                pending_calls.extend(calls);

                if done {
                    yield Ok(ChatChunk {
                        content,
                        tool_calls: std::mem::take(&mut pending_calls),
                        done: true,
                        usage,
                    });
                    return;
                }
                if !content.is_empty() {
                    yield Ok(ChatChunk { content, ..Default::default() });
                }
            }

            yield Ok(ChatChunk {
                tool_calls: pending_calls,
                done: true,
                ..Default::default()
            });
        };

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.tags().await?.into_iter().map(|m| m.name).collect())
    }
}
