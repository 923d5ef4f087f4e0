//! Agent loop implementation

use std::collections::HashSet;
use std::sync::Arc;

use agent_core::{
    ChatMessage, ChatProvider, LlmError, ProviderModel, Role, ToolCall, ToolDefinition, Usage,
};
use anyhow::Result;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::context::{trim_to_budget, Tokenizer};
use crate::tools::builtin::COMMUNICATE_TOOL;
use crate::tools::router::{RouteResult, ToolRouter};
use crate::tools::ToolContext;

use super::state::{AgentConfig, AgentState, FailureTracker};

const FALLBACK_SYSTEM_PROMPT: &str = "You are a highly autonomous AI command line agent.";

const NOT_EXECUTED: &str = "Error: Tool call was not executed because the turn was aborted";

/// Receives progress events while a turn runs
///
/// Every method has an empty default so observers only implement what they show.
#[allow(unused_variables)]
pub trait TurnObserver: Send {
    fn model_request_started(&mut self, iteration: usize) {}

    fn content_delta(&mut self, delta: &str) {}

    fn model_response_finished(&mut self) {}

    /// Calls about to run, `communicate` excluded
    fn tool_calls_started(&mut self, calls: &[ToolCall]) {}

    fn tool_finished(&mut self, call: &ToolCall, result: &RouteResult) {}

    /// A `communicate` note from the model
    fn communication(&mut self, message: &str) {}
}

/// Observer that ignores everything
pub struct SilentObserver;

impl TurnObserver for SilentObserver {}

#[derive(Debug, Default)]
struct ModelResponse {
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

/// The agent loop orchestrator
pub struct AgentLoop {
    provider: Arc<dyn ChatProvider>,
    router: ToolRouter,
    config: AgentConfig,
    tool_ctx: ToolContext,
    tokenizer: Tokenizer,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn ChatProvider>, router: ToolRouter, config: AgentConfig) -> Self {
        let tool_ctx = ToolContext::new(config.working_dir.clone())
            .with_auto_mode(config.auto_mode)
            .with_provider(provider.clone(), config.model.clone());
        let tokenizer = Tokenizer::new(&config.model.model);

        Self {
            provider,
            router,
            config,
            tool_ctx,
            tokenizer,
        }
    }

    /// Replace the tool context; working dir, auto mode, provider and model follow the agent
    pub fn with_tool_context(mut self, ctx: ToolContext) -> Self {
        self.tool_ctx = ctx
            .with_auto_mode(self.config.auto_mode)
            .with_provider(self.provider.clone(), self.config.model.clone());
        self.tool_ctx.working_dir = self.config.working_dir.clone();
        self
    }

    /// Switch the model used for the following turns
    pub fn set_model(&mut self, provider: Arc<dyn ChatProvider>, model: ProviderModel) {
        info!(model = %model, "Switching model");
        self.tool_ctx.provider = Some(provider.clone());
        self.provider = provider;
        self.tokenizer = Tokenizer::new(&model.model);
        self.tool_ctx.model = model.clone();
        self.config.model = model;
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model(&self) -> &ProviderModel {
        &self.config.model
    }

    /// Run one user turn to completion
    ///
    /// The caller pushes the user message first. On return, every assistant
    /// tool call in `conversation` has a matching tool result.
    #[instrument(skip_all, fields(model = %self.config.model))]
    pub async fn run_turn(
        &self,
        conversation: &mut Vec<ChatMessage>,
        observer: &mut dyn TurnObserver,
    ) -> Result<AgentState> {
        info!(
            messages = conversation.len(),
            max_iterations = self.config.max_iterations,
            "Starting agent turn"
        );
        let mut state = AgentState::new();

        let system = ChatMessage::system(
            self.config
                .system_prompt
                .clone()
                .unwrap_or_else(|| FALLBACK_SYSTEM_PROMPT.to_string()),
        );
        let tool_defs = self.router.tool_definitions();

        while !state.finished && state.iteration < self.config.max_iterations {
            state.increment_iteration();

            let request = trim_to_budget(
                &self.tokenizer,
                Some(&system),
                conversation,
                self.config.context_budget_tokens,
            );
            debug!(
                iteration = state.iteration,
                request_messages = request.len(),
                "Calling model"
            );

            observer.model_request_started(state.iteration);
            let response = self.stream_response(&request, &tool_defs, observer).await;
            observer.model_response_finished();

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Model request failed");
                    state.mark_error(format!("LLM error: {}", e));
                    break;
                }
            };

            if let Some(usage) = &response.usage {
                state.token_usage.record(usage);
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Recorded token usage"
                );
            }

            let ModelResponse {
                content,
                mut tool_calls,
                ..
            } = response;

            // Some models write tool calls into the content instead
            if tool_calls.is_empty() {
                if let Some(parsed) = parse_json_tool_calls(&content) {
                    let parsed: Vec<ToolCall> = parsed
                        .into_iter()
                        .filter(|c| self.router.registry().get(&c.function.name).is_some())
                        .collect();
                    if !parsed.is_empty() {
                        debug!(count = parsed.len(), "Parsed tool calls from content JSON");
                        tool_calls = parsed;
                    }
                }
            }

            if tool_calls.is_empty() {
                info!(iterations = state.iteration, "Agent completed turn");
                conversation.push(ChatMessage::assistant(content.clone()));
                state.mark_finished(content);
                break;
            }

            conversation.push(ChatMessage::assistant_with_tools(content, tool_calls.clone()));
            self.execute_tool_calls(&tool_calls, conversation, &mut state, observer)
                .await;
        }

        if !state.finished && state.iteration >= self.config.max_iterations {
            warn!(max_iterations = self.config.max_iterations, "Agent reached maximum iterations");
            state.mark_error(format!(
                "Agent reached maximum iterations ({})",
                self.config.max_iterations
            ));
        }

        info!(
            finished = state.finished,
            iterations = state.iteration,
            prompt_tokens = state.token_usage.prompt_tokens,
            completion_tokens = state.token_usage.completion_tokens,
            error = ?state.error,
            "Agent turn completed"
        );

        Ok(state)
    }

    async fn stream_response(
        &self,
        request: &[ChatMessage],
        tool_defs: &[ToolDefinition],
        observer: &mut dyn TurnObserver,
    ) -> Result<ModelResponse, LlmError> {
        let mut stream = self
            .provider
            .chat_stream(&self.config.model.model, request, tool_defs)
            .await?;

        let mut response = ModelResponse::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if !chunk.content.is_empty() {
                observer.content_delta(&chunk.content);
                response.content.push_str(&chunk.content);
            }
            response.tool_calls.extend(chunk.tool_calls);
            if chunk.usage.is_some() {
                response.usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        Ok(response)
    }

    /// Run the calls in order, pushing one tool message per call
    async fn execute_tool_calls(
        &self,
        tool_calls: &[ToolCall],
        conversation: &mut Vec<ChatMessage>,
        state: &mut AgentState,
        observer: &mut dyn TurnObserver,
    ) {
        let visible: Vec<ToolCall> = tool_calls
            .iter()
            .filter(|c| c.function.name != COMMUNICATE_TOOL)
            .cloned()
            .collect();
        if !visible.is_empty() {
            observer.tool_calls_started(&visible);
        }

        for (index, call) in tool_calls.iter().enumerate() {
            let name = &call.function.name;
            let signature = FailureTracker::tool_signature(name, &call.function.arguments);

            if state.failure_tracker.is_repeated_call(&signature) {
                warn!(
                    tool = %name,
                    failures = state.failure_tracker.failure_count(&signature),
                    "Model is repeating a failing tool call"
                );
            }

            let result = self.router.route(call, &self.tool_ctx).await;
            let content = result.to_message_content();

            if name == COMMUNICATE_TOOL && result.is_success() {
                observer.communication(&content);
            } else {
                observer.tool_finished(call, &result);
            }
            conversation.push(ChatMessage::tool_result(call.id.clone(), content.clone()));

            let abort_reason = match &result {
                RouteResult::Aborted => Some("Operation aborted by user".to_string()),
                r if r.is_success() => {
                    state.failure_tracker.record_success(&signature);
                    None
                }
                _ => state.failure_tracker.record_failure(&signature, &content),
            };

            if let Some(reason) = abort_reason {
                warn!(tool = %name, reason = %reason, "Aborting turn");
                for skipped in &tool_calls[index + 1..] {
                    conversation.push(ChatMessage::tool_result(skipped.id.clone(), NOT_EXECUTED));
                }
                state.mark_error(reason);
                return;
            }
        }
    }
}

/// Drop a trailing assistant tool-call message whose results are incomplete,
/// along with the partial results after it. Returns whether anything was removed.
pub fn repair_dangling_tool_calls(conversation: &mut Vec<ChatMessage>) -> bool {
    let Some(index) = conversation
        .iter()
        .rposition(|m| m.role == Role::Assistant && m.has_tool_calls())
    else {
        return false;
    };

    let trailing = &conversation[index + 1..];
    if trailing.iter().any(|m| m.role != Role::Tool) {
        return false;
    }

    let answered: HashSet<&str> = trailing
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    let complete = conversation[index]
        .tool_calls
        .iter()
        .all(|c| answered.contains(c.id.as_str()));
    if complete {
        return false;
    }

    debug!(removed = conversation.len() - index, "Removing dangling tool calls");
    conversation.truncate(index);
    true
}

/// Tool call written as JSON text: `{"name": ..., "arguments": {...}}`
#[derive(Deserialize)]
struct JsonToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl JsonToolCall {
    fn into_call(self) -> Option<ToolCall> {
        if self.name.is_empty() {
            return None;
        }
        let arguments = if self.arguments.is_null() {
            Value::Object(Default::default())
        } else {
            self.arguments
        };
        Some(ToolCall::new(ToolCall::generate_id(), self.name, arguments))
    }
}

/// Parse tool calls from model output content
///
/// Supports:
/// - Raw JSON: `{"name": "tool_name", "arguments": {...}}`
/// - Markdown code blocks: ```json\n{"name": ...}\n```
/// - Multiple tool calls (array or sequential)
fn parse_json_tool_calls(content: &str) -> Option<Vec<ToolCall>> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    let json_content = extract_json_from_markdown(content).unwrap_or(content);

    if let Some(call) = try_parse_single_tool_call(json_content) {
        return Some(vec![call]);
    }

    if let Some(calls) = try_parse_tool_call_array(json_content) {
        return Some(calls);
    }

    extract_json_objects(content)
}

/// Extract JSON content from markdown code blocks
fn extract_json_from_markdown(content: &str) -> Option<&str> {
    let patterns = ["```json\n", "```JSON\n", "```\n"];

    for pattern in patterns {
        if let Some(start) = content.find(pattern) {
            let json_start = start + pattern.len();
            if let Some(end) = content[json_start..].find("```") {
                return Some(content[json_start..json_start + end].trim());
            }
        }
    }

    None
}

fn try_parse_single_tool_call(content: &str) -> Option<ToolCall> {
    serde_json::from_str::<JsonToolCall>(content).ok()?.into_call()
}

fn try_parse_tool_call_array(content: &str) -> Option<Vec<ToolCall>> {
    let parsed: Vec<JsonToolCall> = serde_json::from_str(content).ok()?;
    let calls: Vec<ToolCall> = parsed.into_iter().filter_map(JsonToolCall::into_call).collect();

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Extract top-level JSON objects from prose that look like tool calls
fn extract_json_objects(content: &str) -> Option<Vec<ToolCall>> {
    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(call) = start.and_then(|s| try_parse_single_tool_call(&content[s..=i])) {
                        calls.push(call);
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}
