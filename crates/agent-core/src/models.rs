//! Model discovery across providers

use tracing::{debug, warn};

use crate::model_id::{format_model_id, Provider};
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use crate::provider::ChatProvider;
use crate::retry::RetryConfig;
use crate::settings::ProviderSettings;

const EXCLUDED_PREFIXES: &[&str] = &[
    "whisper-",
    "tts-",
    "gpt-image-",
    "omni-moderation-",
    "text-embedding-",
    "text-search-",
    "dall-e-",
];

const EXCLUDED_FRAGMENTS: &[&str] = &["embedding", "moderation", "realtime", "audio", "vision-preview"];

/// Keep only OpenAI models that serve chat completions, sorted
pub fn filter_openai_chat_models<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut kept: Vec<String> = ids
        .into_iter()
        .map(Into::into)
        .filter(|id| !EXCLUDED_PREFIXES.iter().any(|p| id.starts_with(p)))
        .filter(|id| !EXCLUDED_FRAGMENTS.iter().any(|f| id.contains(f)))
        .filter(|id| id.starts_with("gpt-") || id.starts_with('o'))
        .collect();
    kept.sort();
    kept
}

/// A listed model; Ollama models carry their download size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    /// `provider:model` id
    pub id: String,
    pub size: Option<String>,
}

/// Every reachable `provider:model` id, sorted and deduplicated
pub async fn available_models(settings: &ProviderSettings) -> Vec<String> {
    available_model_entries(settings)
        .await
        .into_iter()
        .map(|entry| entry.id)
        .collect()
}

/// Like [`available_models`], with sizes for local models
///
/// A provider that fails to answer is skipped with a warning.
pub async fn available_model_entries(settings: &ProviderSettings) -> Vec<ModelEntry> {
    let retry = RetryConfig::none();
    let mut entries = Vec::new();

    if settings.openai_api_key.is_some() {
        match OpenAiClient::from_settings(settings) {
            Ok(client) => match client.with_retry(retry.clone()).list_models().await {
                Ok(models) => entries.extend(filter_openai_chat_models(models).iter().map(|m| ModelEntry {
                    id: format_model_id(Provider::OpenAi, m),
                    size: None,
                })),
                Err(e) => warn!(error = %e, "Could not list OpenAI models"),
            },
            Err(e) => warn!(error = %e, "Could not build OpenAI client"),
        }
    } else {
        debug!("OPENAI_API_KEY not set, skipping OpenAI models");
    }

    match OllamaClient::from_settings(settings) {
        Ok(client) => {
            let client = client.with_retry(retry);
            if !client.health_check().await {
                warn!(url = %settings.ollama_url, "Ollama is not reachable, skipping local models");
            } else {
                match client.tags().await {
                    Ok(models) => entries.extend(models.iter().map(|m| ModelEntry {
                        id: format_model_id(Provider::Ollama, &m.name),
                        size: Some(m.size_human()),
                    })),
                    Err(e) => warn!(error = %e, url = %settings.ollama_url, "Could not list Ollama models"),
                }
            }
        }
        Err(e) => warn!(error = %e, "Could not build Ollama client"),
    }

    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries.dedup_by(|a, b| a.id == b.id);
    entries
}

/// Candidates starting with `prefix`; an empty prefix matches everything
pub fn filter_prefix<'a>(candidates: &'a [String], prefix: &str) -> Vec<&'a str> {
    candidates
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with(prefix))
        .collect()
}
