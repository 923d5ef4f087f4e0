//! Provider endpoints and credentials

use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Where and how to reach each provider
#[derive(Clone)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub ollama_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl ProviderSettings {
    /// Read `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OLLAMA_URL`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            openai_api_key: non_empty(OPENAI_API_KEY_VAR),
            openai_base_url: non_empty("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            ollama_url: non_empty("OLLAMA_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.ollama_url),
            request_timeout_secs: defaults.request_timeout_secs,
        }
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Keep the key out of debug logs
impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<set>"))
            .field("openai_base_url", &self.openai_base_url)
            .field("ollama_url", &self.ollama_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let settings = ProviderSettings::from_lookup(lookup(&[]));
        assert!(settings.openai_api_key.is_none());
        assert_eq!(settings.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(settings.ollama_url, DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn test_env_overrides() {
        let settings = ProviderSettings::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OLLAMA_URL", "http://gpu-box:11434/"),
            ("OPENAI_BASE_URL", ""),
        ]));
        assert_eq!(settings.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.ollama_url, "http://gpu-box:11434");
        assert_eq!(settings.openai_base_url, DEFAULT_OPENAI_BASE_URL);
    }

    #[test]
    fn test_debug_hides_key() {
        let settings = ProviderSettings::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-secret")]));
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("sk-secret"));
    }
}
