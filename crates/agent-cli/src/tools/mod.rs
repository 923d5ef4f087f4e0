//! Tool framework for agent-based execution
//!
//! Tools are exposed to the model as function definitions and dispatched
//! through the [`router::ToolRouter`].

pub mod builtin;
pub mod registry;
pub mod router;
pub mod security;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::{ChatProvider, Provider, ProviderModel, ToolDefinition};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Security classification for tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Read-only operations, no confirmation needed
    Safe,
    /// Network operations
    Moderate,
    /// Write/execute operations
    Dangerous,
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityLevel::Safe => write!(f, "safe"),
            SecurityLevel::Moderate => write!(f, "moderate"),
            SecurityLevel::Dangerous => write!(f, "dangerous"),
        }
    }
}

/// Result of tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Error message if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed result
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Create a failed result with output
    pub fn failure(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Text sent back to the model as the tool message
    pub fn to_message_content(&self) -> String {
        if self.success {
            return self.output.clone();
        }
        let error = self.error.as_deref().unwrap_or("unknown error");
        if self.output.is_empty() {
            format!("Error: {}", error)
        } else {
            format!("Error: {}\n{}", error, self.output)
        }
    }
}

/// Context provided to tools during execution
#[derive(Clone)]
pub struct ToolContext {
    /// Current working directory
    pub working_dir: PathBuf,
    /// Whether running in auto mode (skip confirmations)
    pub auto_mode: bool,
    /// Maximum output length (truncate if exceeded)
    pub max_output_len: usize,
    /// Default timeout for shell commands in seconds
    pub command_timeout_secs: u64,
    /// Default timeout for HTTP requests in seconds
    pub http_timeout_secs: u64,
    /// Model the session runs on, used by `spawn`
    pub model: ProviderModel,
    /// The agent's own client, shared with `spawn`
    pub provider: Option<Arc<dyn ChatProvider>>,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("working_dir", &self.working_dir)
            .field("auto_mode", &self.auto_mode)
            .field("max_output_len", &self.max_output_len)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            auto_mode: true,
            max_output_len: 50_000,
            command_timeout_secs: 30,
            http_timeout_secs: 30,
            model: ProviderModel::new(Provider::OpenAi, "gpt-4.1"),
            provider: None,
        }
    }
}

impl ToolContext {
    /// Create a new context with the given working directory
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    pub fn with_auto_mode(mut self, auto: bool) -> Self {
        self.auto_mode = auto;
        self
    }

    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    pub fn with_http_timeout(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    pub fn with_max_output_len(mut self, len: usize) -> Self {
        self.max_output_len = len;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>, model: ProviderModel) -> Self {
        self.provider = Some(provider);
        self.model = model;
        self
    }

    /// Resolve a model-supplied path against the working directory
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = PathBuf::from(sanitize_path(raw));
        if path.is_absolute() {
            path
        } else {
            self.working_dir.join(path)
        }
    }
}

/// Normalize a model-supplied path: expand `~` and turn `file.ext` into `./file.ext`
pub fn sanitize_path(raw: &str) -> String {
    let raw = raw.trim();
    let home = || dirs::home_dir().map(|h| h.to_string_lossy().into_owned());

    if raw == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home() {
            return format!("{}/{}", home.trim_end_matches('/'), rest);
        }
    }

    if Path::new(raw).is_absolute() || raw.starts_with('.') || raw.contains('/') {
        raw.to_string()
    } else {
        format!("./{}", raw)
    }
}

/// Cut `text` to at most `max_len` bytes on a char boundary
pub fn truncate_output(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n\n[Output truncated at {} characters]", &text[..end], end)
}

/// Fetch a required string argument
pub fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {}", name))
}

/// Schema for a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// Parameter type (string, number, boolean, array, object)
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterProperty {
    fn typed(param_type: &str, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::typed("number", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Schema describing tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Type is always "object"
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// The Tool trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> &str;

    fn security_level(&self) -> SecurityLevel;

    fn parameters_schema(&self) -> ParameterSchema;

    /// Execute the tool. Failures are `Ok(ToolResult::error(..))`; `Err` means malformed arguments.
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult>;

    /// Convert to a tool definition for the LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters_schema().to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_content() {
        assert_eq!(ToolResult::success("ok").to_message_content(), "ok");
        assert_eq!(ToolResult::error("boom").to_message_content(), "Error: boom");
        assert_eq!(
            ToolResult::failure("partial", "exit 1").to_message_content(),
            "Error: exit 1\npartial"
        );
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("notes.txt"), "./notes.txt");
        assert_eq!(sanitize_path("./notes.txt"), "./notes.txt");
        assert_eq!(sanitize_path("src/main.rs"), "src/main.rs");
        assert_eq!(sanitize_path("/etc/hosts"), "/etc/hosts");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(PathBuf::from(sanitize_path("~/x.md")), home.join("x.md"));
        }
    }

    #[test]
    fn test_resolve_path_relative_to_working_dir() {
        let ctx = ToolContext::new(PathBuf::from("/work"));
        assert_eq!(ctx.resolve_path("a.txt"), PathBuf::from("/work/./a.txt"));
        assert_eq!(ctx.resolve_path("/tmp/a.txt"), PathBuf::from("/tmp/a.txt"));
    }

    #[test]
    fn test_truncate_output_char_boundary() {
        let text = "héllo world";
        let cut = truncate_output(text, 2);
        assert!(cut.starts_with('h'));
        assert!(cut.contains("[Output truncated at 1 characters]"));
        assert_eq!(truncate_output("short", 100), "short");
    }

    #[test]
    fn test_schema_serializes_enum_keyword() {
        let schema = ParameterSchema::new().with_required(
            "mode",
            ParameterProperty::string("Mode").with_enum(vec!["a".into(), "b".into()]),
        );
        let value = schema.to_value();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["mode"]["enum"], json!(["a", "b"]));
        assert_eq!(value["required"], json!(["mode"]));
    }
}
