//! Provider abstraction and shared HTTP plumbing

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::LlmError;
use crate::message::{ChatChunk, ChatMessage, ChatResponse, ToolDefinition};
use crate::model_id::{Provider, ProviderModel};
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use crate::retry::RetryConfig;
use crate::settings::ProviderSettings;

/// Stream of response chunks
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>>;

/// A chat-completion backend with tool calling
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name, e.g. `openai`
    fn name(&self) -> &str;

    /// Single request, full response
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError>;

    /// Streamed response
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatStream, LlmError>;

    /// Model names offered by this provider (without the provider prefix)
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

/// Build the provider that serves `model`
pub fn provider_for(
    model: &ProviderModel,
    settings: &ProviderSettings,
    retry: RetryConfig,
) -> Result<Arc<dyn ChatProvider>, LlmError> {
    match model.provider {
        Provider::OpenAi => Ok(Arc::new(OpenAiClient::from_settings(settings)?.with_retry(retry))),
        Provider::Ollama => Ok(Arc::new(OllamaClient::from_settings(settings)?.with_retry(retry))),
    }
}

/// Client without a whole-request timeout; streamed bodies may run long
pub(crate) fn build_http_client() -> Result<reqwest::Client, LlmError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?)
}

/// Send `request`, waiting at most `timeout` for the response headers
pub(crate) async fn send(request: reqwest::RequestBuilder, timeout: Duration) -> Result<reqwest::Response, LlmError> {
    let resp = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| LlmError::Timeout(timeout.as_secs()))??;
    check_status(resp).await
}

/// Turn a non-success response into [`LlmError::Http`]
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::http(status.as_u16(), body))
}

/// Split a byte stream into trimmed, non-empty lines
///
/// Fails with [`LlmError::Timeout`] when no bytes arrive for `idle_timeout`.
pub(crate) fn lines<S>(bytes: S, idle_timeout: Duration) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        futures::pin_mut!(bytes);

        loop {
            let chunk = match tokio::time::timeout(idle_timeout, bytes.next()).await {
                Ok(Some(Ok(c))) => c,
                Ok(Some(Err(e))) => {
                    yield Err(LlmError::Network(e));
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Err(LlmError::Timeout(idle_timeout.as_secs()));
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if !line.is_empty() {
                    yield Ok(line);
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
        if !rest.is_empty() {
            yield Ok(rest);
        }
    }
}
