//! Agent state management

use agent_core::{ProviderModel, Usage};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::tools::ToolContext;

pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_CONTEXT_BUDGET_TOKENS: usize = 100_000;

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use
    pub model: ProviderModel,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Maximum model calls per turn
    pub max_iterations: usize,
    /// Working directory
    pub working_dir: PathBuf,
    /// Auto mode (skip confirmations)
    pub auto_mode: bool,
    pub verbose: bool,
    /// Token budget for the request sent to the model
    pub context_budget_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: ToolContext::default().model,
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            auto_mode: true,
            verbose: false,
            context_budget_tokens: DEFAULT_CONTEXT_BUDGET_TOKENS,
        }
    }
}

impl AgentConfig {
    pub fn new(model: ProviderModel) -> Self {
        Self {
            model,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_auto_mode(mut self, auto: bool) -> Self {
        self.auto_mode = auto;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_context_budget(mut self, tokens: usize) -> Self {
        self.context_budget_tokens = tokens;
        self
    }
}

/// Token usage accumulated across model calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub calls: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn record(&mut self, usage: &Usage) {
        self.calls += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.calls += other.calls;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} tokens ({} prompt + {} completion) over {} call(s)",
            self.total(),
            self.prompt_tokens,
            self.completion_tokens,
            self.calls
        )
    }
}

/// State of one agent turn
#[derive(Debug)]
pub struct AgentState {
    /// Current iteration
    pub iteration: usize,
    /// Whether the agent has finished
    pub finished: bool,
    /// Final response (if finished)
    pub final_response: Option<String>,
    /// Error message (if failed)
    pub error: Option<String>,
    pub token_usage: TokenUsage,
    /// Failure tracker for detecting infinite loops
    pub failure_tracker: FailureTracker,
}

/// Default max consecutive failures before aborting
const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;

impl AgentState {
    pub fn new() -> Self {
        Self {
            iteration: 0,
            finished: false,
            final_response: None,
            error: None,
            token_usage: TokenUsage::default(),
            failure_tracker: FailureTracker::new(DEFAULT_MAX_CONSECUTIVE_FAILURES),
        }
    }

    pub fn mark_finished(&mut self, response: String) {
        self.finished = true;
        self.final_response = Some(response);
    }

    pub fn mark_error(&mut self, error: String) {
        self.finished = true;
        self.error = Some(error);
    }

    pub fn increment_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn is_success(&self) -> bool {
        self.finished && self.error.is_none()
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks consecutive failures for tool calls to detect infinite loops
#[derive(Debug, Default)]
pub struct FailureTracker {
    /// Map from tool call signature to consecutive failure count
    failures: HashMap<String, ConsecutiveFailure>,
    last_signature: Option<String>,
    max_consecutive: usize,
}

#[derive(Debug, Clone)]
pub struct ConsecutiveFailure {
    pub count: usize,
    pub last_error: String,
}

impl FailureTracker {
    pub fn new(max_consecutive: usize) -> Self {
        Self {
            failures: HashMap::new(),
            last_signature: None,
            max_consecutive,
        }
    }

    /// Create a signature for a tool call (name + arguments hash)
    pub fn tool_signature(name: &str, args: &serde_json::Value) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        args.to_string().hash(&mut hasher);
        format!("{}:{:x}", name, hasher.finish())
    }

    /// Record a successful tool execution, resetting failure count
    pub fn record_success(&mut self, signature: &str) {
        self.failures.remove(signature);
        self.last_signature = Some(signature.to_string());
    }

    /// Record a failed tool execution
    /// Returns Some(error_message) if we should abort due to repeated failures
    pub fn record_failure(&mut self, signature: &str, error: &str) -> Option<String> {
        let entry = self.failures.entry(signature.to_string()).or_insert(ConsecutiveFailure {
            count: 0,
            last_error: String::new(),
        });

        entry.count += 1;
        entry.last_error = error.to_string();
        self.last_signature = Some(signature.to_string());

        if entry.count >= self.max_consecutive {
            Some(format!(
                "Tool call failed {} consecutive times with error: {}",
                entry.count, entry.last_error
            ))
        } else {
            None
        }
    }

    /// Same signature as the last call, and it has failed before
    pub fn is_repeated_call(&self, signature: &str) -> bool {
        self.last_signature.as_deref() == Some(signature) && self.failures.contains_key(signature)
    }

    pub fn failure_count(&self, signature: &str) -> usize {
        self.failures.get(signature).map_or(0, |f| f.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::Provider;
    use serde_json::json;

    #[test]
    fn test_agent_config_builder() {
        let config = AgentConfig::new(ProviderModel::new(Provider::Ollama, "llama3"))
            .with_system_prompt("You are helpful")
            .with_max_iterations(10)
            .with_auto_mode(false)
            .with_context_budget(2_000);

        assert_eq!(config.model.id(), "ollama:llama3");
        assert_eq!(config.system_prompt.as_deref(), Some("You are helpful"));
        assert_eq!(config.max_iterations, 10);
        assert!(!config.auto_mode);
        assert_eq!(config.context_budget_tokens, 2_000);
    }

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.model.id(), "openai:gpt-4.1");
        assert_eq!(config.max_iterations, 100);
        assert!(config.auto_mode);
    }

    #[test]
    fn test_agent_state() {
        let mut state = AgentState::new();
        assert_eq!(state.iteration, 0);
        assert!(!state.finished);

        state.increment_iteration();
        assert_eq!(state.iteration, 1);

        state.mark_finished("Done".to_string());
        assert!(state.is_success());
        assert_eq!(state.final_response.as_deref(), Some("Done"));
    }

    #[test]
    fn test_token_usage() {
        let mut usage = TokenUsage::default();
        usage.record(&Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
        });
        usage.record(&Usage {
            prompt_tokens: 150,
            completion_tokens: 30,
        });
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.total(), 300);
        assert_eq!(usage.summary(), "300 tokens (250 prompt + 50 completion) over 2 call(s)");

        let mut session = TokenUsage::default();
        session.add(&usage);
        session.add(&usage);
        assert_eq!(session.calls, 4);
        assert_eq!(session.total(), 600);
    }

    #[test]
    fn test_failure_tracker_success_resets() {
        let mut tracker = FailureTracker::new(3);
        let sig = FailureTracker::tool_signature("test", &json!({"x": 1}));

        assert!(tracker.record_failure(&sig, "error").is_none());
        assert!(tracker.record_failure(&sig, "error").is_none());
        assert_eq!(tracker.failure_count(&sig), 2);

        tracker.record_success(&sig);
        assert_eq!(tracker.failure_count(&sig), 0);
    }

    #[test]
    fn test_failure_tracker_aborts_after_max() {
        let mut tracker = FailureTracker::new(3);
        let sig = FailureTracker::tool_signature("test", &json!({}));

        assert!(tracker.record_failure(&sig, "error 1").is_none());
        assert!(tracker.record_failure(&sig, "error 2").is_none());

        let abort = tracker.record_failure(&sig, "error 3");
        assert!(abort.unwrap().contains("3 consecutive times"));
    }

    #[test]
    fn test_failure_tracker_different_signatures() {
        let mut tracker = FailureTracker::new(3);
        let sig1 = FailureTracker::tool_signature("test", &json!({"x": 1}));
        let sig2 = FailureTracker::tool_signature("test", &json!({"x": 2}));
        assert_ne!(sig1, sig2);

        assert!(tracker.record_failure(&sig1, "error").is_none());
        assert!(tracker.record_failure(&sig2, "error").is_none());
        assert_eq!(tracker.failure_count(&sig1), 1);
        assert_eq!(tracker.failure_count(&sig2), 1);
    }

    #[test]
    fn test_failure_tracker_is_repeated_call() {
        let mut tracker = FailureTracker::new(3);
        let sig = FailureTracker::tool_signature("test", &json!({}));
        assert!(!tracker.is_repeated_call(&sig));

        tracker.record_failure(&sig, "error");
        assert!(tracker.is_repeated_call(&sig));

        let other_sig = FailureTracker::tool_signature("other", &json!({}));
        assert!(!tracker.is_repeated_call(&other_sig));
    }
}
