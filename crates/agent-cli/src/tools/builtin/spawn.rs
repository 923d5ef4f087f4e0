//! Sub-agent tool: hand a small task to a one-shot completion

use std::time::Duration;

use agent_core::ChatMessage;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::fetch::shared_client;
use crate::tools::{required_str, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext, ToolResult};

const SUB_AGENT_PROMPT: &str = "You are a focused sub-agent. Complete the task you are given \
    and reply with only the result, concisely.";

/// Local OpenAI-compatible endpoint used instead of the session model
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEndpoint {
    pub url: String,
    pub model: String,
}

pub struct SpawnTool {
    local: Option<LocalEndpoint>,
}

impl SpawnTool {
    /// Use `OLLAMA_URL` + `OLLAMA_MODEL` when both are set
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let local = match (var("OLLAMA_URL"), var("OLLAMA_MODEL")) {
            (Some(url), Some(model)) => Some(LocalEndpoint {
                url: url.trim_end_matches('/').to_string(),
                model,
            }),
            _ => None,
        };
        Self { local }
    }

    pub fn with_local(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            local: Some(LocalEndpoint {
                url: url.into(),
                model: model.into(),
            }),
        }
    }

    pub fn session_model_only() -> Self {
        Self { local: None }
    }

    async fn run_local(&self, endpoint: &LocalEndpoint, task: &str, ctx: &ToolContext) -> ToolResult {
        let url = format!("{}/v1/chat/completions", endpoint.url);
        let body = json!({
            "model": endpoint.model,
            "messages": [
                { "role": "system", "content": SUB_AGENT_PROMPT },
                { "role": "user", "content": task },
            ],
            "stream": false,
        });

        let response = match shared_client()
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(ctx.http_timeout_secs.max(120)))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("spawn request failed: {}", e)),
        };

        if !response.status().is_success() {
            return ToolResult::error(format!("spawn request failed: HTTP {}", response.status()));
        }

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return ToolResult::error(format!("Failed to read response: {}", e)),
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => ToolResult::success(extract_reply(&value).unwrap_or(text)),
            Err(_) => ToolResult::success(text),
        }
    }

    async fn run_session_model(&self, task: &str, ctx: &ToolContext) -> ToolResult {
        let Some(provider) = &ctx.provider else {
            return ToolResult::error("spawn failed: no model provider is configured");
        };

        let messages = [ChatMessage::system(SUB_AGENT_PROMPT), ChatMessage::user(task)];
        match provider.chat(&ctx.model.model, &messages, &[]).await {
            Ok(response) => ToolResult::success(response.message.content),
            Err(e) => {
                warn!(error = %e, "Sub-agent completion failed");
                ToolResult::error(format!("spawn failed: {}", e))
            }
        }
    }
}

/// Reply text from `choices[0].message.content`, `choices[0].content` or `text`
///
/// A `null` or non-string field counts as missing.
fn extract_reply(value: &Value) -> Option<String> {
    let choice = value.get("choices").and_then(|c| c.get(0));
    [
        choice.and_then(|c| c.pointer("/message/content")),
        choice.and_then(|c| c.get("content")),
        value.get("text"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .map(str::to_string)
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a small, self-contained task and return its answer. \
         The sub-agent has no tools and no memory of this conversation."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Moderate
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("task", ParameterProperty::string("The task for the sub-agent"))
    }

    #[instrument(skip(self, args, ctx))]
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let task = required_str(args, "task")?;

        Ok(match &self.local {
            Some(endpoint) => {
                debug!(url = %endpoint.url, model = %endpoint.model, "Spawning local sub-agent");
                self.run_local(endpoint, task, ctx).await
            }
            None => {
                debug!(model = %ctx.model, "Spawning sub-agent on session model");
                self.run_session_model(task, ctx).await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{provider_for, Provider, ProviderModel, ProviderSettings, RetryConfig};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_reply_shapes() {
        assert_eq!(
            extract_reply(&json!({"choices": [{"message": {"content": "hello from ollama"}}]})).as_deref(),
            Some("hello from ollama")
        );
        assert_eq!(
            extract_reply(&json!({"choices": [{"content": "choice-content"}]})).as_deref(),
            Some("choice-content")
        );
        assert_eq!(
            extract_reply(&json!({"text": "top-level text"})).as_deref(),
            Some("top-level text")
        );
        assert_eq!(extract_reply(&json!({"other": 1})), None);
    }

    #[test]
    fn test_extract_reply_skips_null_content() {
        let value = json!({
            "choices": [{"message": {"content": null}, "content": "from choice"}],
            "text": "top-level"
        });
        assert_eq!(extract_reply(&value).as_deref(), Some("from choice"));

        let value = json!({"choices": [{"message": {"content": null}}], "text": "top-level"});
        assert_eq!(extract_reply(&value).as_deref(), Some("top-level"));
    }

    #[tokio::test]
    async fn test_spawn_local_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "hello from ollama"}}]
            })))
            .mount(&server)
            .await;

        let tool = SpawnTool::with_local(server.uri(), "test-model");
        let result = tool
            .execute(&json!({"task": "Do something small"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.output, "hello from ollama");
    }

    #[tokio::test]
    async fn test_spawn_falls_back_to_session_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "session result"},
                "done": true
            })))
            .mount(&server)
            .await;

        let settings = ProviderSettings {
            ollama_url: server.uri(),
            ..ProviderSettings::default()
        };
        let model = ProviderModel::new(Provider::Ollama, "llama3");
        let provider = provider_for(&model, &settings, RetryConfig::none()).unwrap();
        let ctx = ToolContext::default().with_provider(provider, model);

        let result = SpawnTool::session_model_only()
            .execute(&json!({"task": "Fallback task"}), &ctx)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "session result");
    }

    #[tokio::test]
    async fn test_spawn_without_provider_fails() {
        let result = SpawnTool::session_model_only()
            .execute(&json!({"task": "anything"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no model provider"));
    }
}
