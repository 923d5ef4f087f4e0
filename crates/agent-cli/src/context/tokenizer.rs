//! Token counting using tiktoken

use agent_core::ChatMessage;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Estimate when the tokenizer is unavailable
const FALLBACK_CHARS_PER_TOKEN: usize = 4;

/// Per-message framing overhead (role, separators)
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Global tokenizer (lazy initialized)
static CL100K_TOKENIZER: Lazy<Mutex<Option<CoreBPE>>> = Lazy::new(|| Mutex::new(cl100k_base().ok()));

/// Tokenizer family for a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenizerType {
    /// OpenAI models, and an approximation for local ones
    Cl100kBase,
    /// chars / 4
    Fallback,
}

impl TokenizerType {
    pub fn from_model_name(model: &str) -> Self {
        let model = model.to_lowercase();
        let known = [
            "gpt-", "o1", "o3", "o4", "llama", "mistral", "qwen", "codellama", "deepseek", "phi", "gemma",
        ];
        if known.iter().any(|k| model.contains(k)) {
            Self::Cl100kBase
        } else {
            Self::Fallback
        }
    }
}

/// Counts tokens in text and messages
#[derive(Debug, Clone, Copy)]
pub struct Tokenizer {
    tokenizer_type: TokenizerType,
}

impl Tokenizer {
    pub fn new(model: &str) -> Self {
        Self::with_type(TokenizerType::from_model_name(model))
    }

    pub fn with_type(tokenizer_type: TokenizerType) -> Self {
        Self { tokenizer_type }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        match self.tokenizer_type {
            TokenizerType::Cl100kBase => {
                let guard = CL100K_TOKENIZER.lock();
                match guard.as_ref() {
                    Some(bpe) => bpe.encode_with_special_tokens(text).len(),
                    None => text.len() / FALLBACK_CHARS_PER_TOKEN,
                }
            }
            TokenizerType::Fallback => text.len() / FALLBACK_CHARS_PER_TOKEN,
        }
    }

    /// Tokens a message costs in a request, tool calls included
    pub fn message_tokens(&self, message: &ChatMessage) -> usize {
        let calls: usize = message
            .tool_calls
            .iter()
            .map(|tc| self.count_tokens(&tc.function.name) + self.count_tokens(&tc.function.arguments.to_string()))
            .sum();
        MESSAGE_OVERHEAD_TOKENS + self.count_tokens(&message.content) + calls
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::with_type(TokenizerType::Cl100kBase)
    }
}

/// Count tokens in text using the default tokenizer
pub fn count_tokens(text: &str) -> usize {
    Tokenizer::default().count_tokens(text)
}
