//! Provider error type

use thiserror::Error;

/// Errors returned by chat providers
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never got a response
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response body could not be understood
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A required API key is not set
    #[error("{0} is not set; export it to use this provider")]
    MissingApiKey(&'static str),

    /// The model id names a provider we don't know
    #[error("unknown provider '{0}' (expected 'openai' or 'ollama')")]
    UnknownProvider(String),

    /// The model id has nothing after the provider prefix
    #[error("model id '{0}' has no model name")]
    EmptyModel(String),

    /// The provider went quiet: no response headers, or no stream data, in time
    #[error("no response from provider within {0}s")]
    Timeout(u64),

    /// The provider returned no choices / no message
    #[error("provider returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Whether the request is worth sending again
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http { status, .. } => matches!(status, 408 | 429 | 500..=599),
            LlmError::Network(e) => e.is_timeout() || e.is_connect(),
            LlmError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Build an HTTP error, keeping the body short enough to print
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > 2000 {
            let cut = (0..=2000).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
            body.truncate(cut);
            body.push_str("...");
        }
        LlmError::Http { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(LlmError::http(429, "slow down").is_retryable());
        assert!(LlmError::http(503, "unavailable").is_retryable());
        assert!(LlmError::http(408, "timeout").is_retryable());
        assert!(!LlmError::http(400, "bad request").is_retryable());
        assert!(!LlmError::http(401, "unauthorized").is_retryable());
        assert!(LlmError::Timeout(300).is_retryable());
    }

    #[test]
    fn test_non_http_errors_not_retryable() {
        assert!(!LlmError::MissingApiKey("OPENAI_API_KEY").is_retryable());
        assert!(!LlmError::Decode("bad json".into()).is_retryable());
        assert!(!LlmError::EmptyResponse.is_retryable());
    }

    #[test]
    fn test_http_body_truncated() {
        let err = LlmError::http(500, "x".repeat(5000));
        match err {
            LlmError::Http { body, .. } => assert!(body.len() <= 2003),
            _ => panic!("expected Http"),
        }
    }
}
