//! User configuration for the agent CLI
//!
//! Configuration file: ~/.config/agent/config.toml (or platform equivalent)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::{DEFAULT_CONTEXT_BUDGET_TOKENS, DEFAULT_MAX_ITERATIONS};

/// User configuration for the agent CLI
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UserConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub tools: ToolsSection,
}

/// Agent loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// `provider:model` used when `--model` is not given
    #[serde(default)]
    pub default_model: Option<String>,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Ask before running moderate/dangerous tools
    #[serde(default)]
    pub confirm: bool,

    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,

    /// Appended to the system prompt
    #[serde(default)]
    pub extra_prompt: Option<String>,
}

/// Tool execution limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsSection {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_max_output_len")]
    pub max_output_len: usize,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_context_budget() -> usize {
    DEFAULT_CONTEXT_BUDGET_TOKENS
}

fn default_command_timeout() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    30
}

fn default_max_output_len() -> usize {
    50_000
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            default_model: None,
            max_iterations: default_max_iterations(),
            confirm: false,
            context_budget_tokens: default_context_budget(),
            extra_prompt: None,
        }
    }
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            http_timeout_secs: default_http_timeout(),
            max_output_len: default_max_output_len(),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# agent CLI configuration
# Location: ~/.config/agent/config.toml

[agent]
# Model used when --model / AGENT_MODEL is not set
# default_model = "openai:gpt-4.1"

# Maximum model calls per turn
max_iterations = 100

# Ask before running network, write and shell tools
confirm = false

# Token budget for each request; older messages are dropped first
context_budget_tokens = 100000

# Extra instructions appended to the system prompt
# extra_prompt = "Prefer small, focused commits."

[tools]
command_timeout_secs = 30
http_timeout_secs = 30
max_output_len = 50000
"#;

impl UserConfig {
    /// Load user configuration from default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("agent").join("config.toml"))
    }

    /// Write a commented default configuration file
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::create_default_at(&path)?;
        Ok(path)
    }

    pub fn create_default_at(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        fs::write(path, DEFAULT_CONFIG).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
