//! OpenAI chat completions client

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::LlmError;
use crate::message::{ChatChunk, ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
use crate::provider::{build_http_client, lines, send, ChatProvider, ChatStream};
use crate::retry::RetryConfig;
use crate::settings::{ProviderSettings, OPENAI_API_KEY_VAR};

/// Client for `/chat/completions` compatible endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    /// Wait for response headers, a full non-streamed body, or the next stream chunk
    timeout: std::time::Duration,
    retry: RetryConfig,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: build_http_client()?,
            timeout,
            retry: RetryConfig::default(),
        })
    }

    /// Build from settings; fails when `OPENAI_API_KEY` is missing
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, LlmError> {
        let key = settings
            .openai_api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey(OPENAI_API_KEY_VAR))?;
        Self::new(&settings.openai_base_url, key, settings.request_timeout())
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn build_body(&self, model: &str, messages: &[ChatMessage], tools: &[ToolDefinition], stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages.iter().map(message_to_openai).collect::<Vec<_>>(),
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn post(&self, url: &str, body: &Value, stream: bool) -> Result<reqwest::Response, LlmError> {
        let mut request = self.client.post(url).bearer_auth(&self.api_key).json(body);
        if !stream {
            request = request.timeout(self.timeout);
        }
        send(request, self.timeout).await
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, messages, tools), fields(messages = messages.len(), tools = tools.len()))]
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let body = self.build_body(model, messages, tools, false);
        let body = &body;
        let url = format!("{}/chat/completions", self.base_url);
        let url = url.as_str();

        let resp = self.retry.run(move || self.post(url, body, false)).await?;
        let data: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        let choice = data.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, decode_arguments(&tc.function.arguments)))
            .collect();

        debug!(usage = ?data.usage, "OpenAI chat complete");
        Ok(ChatResponse {
            message: ChatMessage::assistant_with_tools(choice.message.content.unwrap_or_default(), tool_calls),
            usage: data.usage.map(Into::into),
        })
    }

    #[instrument(skip(self, messages, tools), fields(messages = messages.len(), tools = tools.len()))]
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatStream, LlmError> {
        let body = self.build_body(model, messages, tools, true);
        let body = &body;
        let url = format!("{}/chat/completions", self.base_url);
        let url = url.as_str();

        let resp = self.retry.run(move || self.post(url, body, true)).await?;
        let mut sse = Box::pin(lines(resp.bytes_stream(), self.timeout));

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            while let Some(line) = sse.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for chunk in decoder.push_line(&line) {
                    let done = chunk.done;
                    yield Ok(chunk);
                    if done {
                        return;
                    }
                }
            }
            yield Ok(decoder.finish());
        };

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/models", self.base_url);
        let url = url.as_str();

        let resp = self
            .retry
            .run(move || {
                let request = self.client.get(url).bearer_auth(&self.api_key).timeout(self.timeout);
                send(request, self.timeout)
            })
            .await?;

        let data: ModelsResponse = resp.json().await.map_err(|e| LlmError::Decode(e.to_string()))?;
        Ok(data.data.into_iter().map(|m| m.id).collect())
    }
}

fn message_to_openai(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant if msg.has_tool_calls() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.function.name,
                            "arguments": encode_arguments(&tc.function.arguments),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        role => json!({ "role": role.to_string(), "content": msg.content }),
    }
}

/// Arguments travel as a JSON string on the wire
fn encode_arguments(args: &Value) -> String {
    match args {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn decode_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Turns SSE `data:` lines into chunks, assembling tool calls from deltas
#[derive(Debug, Default)]
struct SseDecoder {
    calls: BTreeMap<usize, PartialCall>,
    usage: Option<Usage>,
    finished: bool,
}

impl SseDecoder {
    fn push_line(&mut self, line: &str) -> Vec<ChatChunk> {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return Vec::new();
        };

        if data == "[DONE]" {
            return vec![self.finish()];
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Skipping unparseable SSE payload");
                return Vec::new();
            }
        };

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        let mut out = Vec::new();
        for choice in chunk.choices {
            if let Some(deltas) = choice.delta.tool_calls {
                for delta in deltas {
                    let partial = self.calls.entry(delta.index).or_default();
                    if let Some(id) = delta.id {
                        partial.id = id;
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            partial.name.push_str(&name);
                        }
                        if let Some(args) = function.arguments {
                            partial.arguments.push_str(&args);
                        }
                    }
                }
            }
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                out.push(ChatChunk {
                    content,
                    ..Default::default()
                });
            }
        }
        out
    }

    fn finish(&mut self) -> ChatChunk {
        self.finished = true;
        let tool_calls = std::mem::take(&mut self.calls)
            .into_values()
            .filter(|p| !p.name.is_empty())
            .map(|p| {
                let id = if p.id.is_empty() { ToolCall::generate_id() } else { p.id };
                ToolCall::new(id, p.name, decode_arguments(&p.arguments))
            })
            .collect();

        ChatChunk {
            content: String::new(),
            tool_calls,
            done: true,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(server.uri(), "sk-test", std::time::Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryConfig::none())
    }

    #[test]
    fn test_assistant_tool_call_wire_format() {
        let msg = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall::new("call_1", "read_file", json!({"path": "./a.txt"}))],
        );
        let wire = message_to_openai(&msg);
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], r#"{"path":"./a.txt"}"#);
    }

    #[test]
    fn test_tool_message_wire_format() {
        let wire = message_to_openai(&ChatMessage::tool_result("call_1", "done"));
        assert_eq!(wire, json!({"role": "tool", "tool_call_id": "call_1", "content": "done"}));
    }

    #[test]
    fn test_decode_arguments_fallbacks() {
        assert_eq!(decode_arguments(""), json!({}));
        assert_eq!(decode_arguments(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_arguments("not json"), Value::String("not json".into()));
    }

    #[test]
    fn test_sse_decoder_accumulates_tool_calls() {
        let mut decoder = SseDecoder::default();
        let lines = [
            r#"data: {"choices":[{"delta":{"content":"Let me check"}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"run_shell_command","arguments":"{\"cmd\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"ls\"}"}}]}}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        ];

        let mut chunks = Vec::new();
        for line in lines {
            chunks.extend(decoder.push_line(line));
        }
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Let me check");

        let done = decoder.push_line("data: [DONE]");
        assert_eq!(done.len(), 1);
        assert!(done[0].done);
        assert_eq!(done[0].tool_calls.len(), 1);
        assert_eq!(done[0].tool_calls[0].id, "call_a");
        assert_eq!(done[0].tool_calls[0].function.arguments, json!({"cmd": "ls"}));
        assert_eq!(done[0].usage.map(|u| u.total()), Some(15));
    }

    #[test]
    fn test_sse_decoder_ignores_comments() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push_line(": keep-alive").is_empty());
        assert!(decoder.push_line("event: ping").is_empty());
    }

    #[tokio::test]
    async fn test_chat_decodes_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4.1", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "read_file", "arguments": "{\"path\":\"./x\"}"}
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
            })))
            .mount(&server)
            .await;

        let response = client(&server)
            .chat("gpt-4.1", &[ChatMessage::user("read x")], &[])
            .await
            .unwrap();

        assert_eq!(response.message.tool_calls.len(), 1);
        assert_eq!(response.message.tool_calls[0].function.name, "read_file");
        assert_eq!(response.message.tool_calls[0].function.arguments, json!({"path": "./x"}));
        assert_eq!(response.usage.map(|u| u.total()), Some(7));
    }

    #[tokio::test]
    async fn test_chat_stream_yields_text_and_done() {
        let server = MockServer::start().await;
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                   data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                   data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let mut stream = client(&server)
            .chat_stream("gpt-4.1", &[ChatMessage::user("hi")], &[])
            .await
            .unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            text.push_str(&chunk.content);
            saw_done |= chunk.done;
        }
        assert_eq!(text, "Hello");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client(&server)
            .chat("gpt-4.1", &[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "gpt-4.1"}, {"id": "whisper-1"}]
            })))
            .mount(&server)
            .await;

        let models = client(&server).list_models().await.unwrap();
        assert_eq!(models, vec!["gpt-4.1", "whisper-1"]);
    }
}
