//! `provider:model` identifiers

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "ollama" => Ok(Provider::Ollama),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

/// A model on a specific provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderModel {
    pub provider: Provider,
    pub model: String,
}

impl ProviderModel {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Full `provider:model` id
    pub fn id(&self) -> String {
        format_model_id(self.provider, &self.model)
    }
}

impl std::fmt::Display for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl std::str::FromStr for ProviderModel {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_model_id(s)
    }
}

/// Parse a model id. A bare id (no `:`) is an OpenAI model.
///
/// Only the first `:` separates the provider, so Ollama tags survive:
/// `ollama:qwen2.5:7b` is model `qwen2.5:7b`.
pub fn parse_model_id(raw: &str) -> Result<ProviderModel, LlmError> {
    let raw = raw.trim();
    let (provider, model) = match raw.split_once(':') {
        Some((provider, model)) => (provider.parse::<Provider>()?, model),
        None => (Provider::OpenAi, raw),
    };

    if model.is_empty() {
        return Err(LlmError::EmptyModel(raw.to_string()));
    }

    Ok(ProviderModel::new(provider, model))
}

pub fn format_model_id(provider: Provider, model: &str) -> String {
    format!("{}:{}", provider, model)
}
