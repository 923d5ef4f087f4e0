//! agent-core: provider layer for the `agent` CLI
//!
//! Provides:
//! - Chat message and tool-call types
//! - `provider:model` ids and model discovery
//! - OpenAI and Ollama clients (with streaming support)
//! - Retry policy for transient failures

pub mod error;
pub mod message;
pub mod model_id;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod settings;

pub use error::LlmError;
pub use message::{
    ChatChunk, ChatMessage, ChatResponse, FunctionCall, FunctionDefinition, Role, ToolCall,
    ToolDefinition, Usage,
};
pub use model_id::{format_model_id, parse_model_id, Provider, ProviderModel};
pub use models::{
    available_model_entries, available_models, filter_openai_chat_models, filter_prefix, ModelEntry,
};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use provider::{provider_for, ChatProvider, ChatStream};
pub use retry::RetryConfig;
pub use settings::ProviderSettings;
