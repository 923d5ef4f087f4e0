//! Top-level CLI actions: single-shot runs and listings

use std::path::PathBuf;

use agent_core::{
    available_model_entries, parse_model_id, provider_for, ChatMessage, ModelEntry, ProviderModel,
    ProviderSettings, RetryConfig,
};
use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::agent::{AgentConfig, AgentLoop};
use crate::config::UserConfig;
use crate::display::{
    print_error, print_iterations, print_usage, ToolStatusDisplay, BOLD, DIM, RESET, YELLOW,
};
use crate::memory::MemorySet;
use crate::prompt::{build_system_prompt, PromptContext};
use crate::session::SessionStore;
use crate::tools::builtin::create_default_registry;
use crate::tools::router::ToolRouter;
use crate::tools::security::{AutoApprove, TerminalConfirmation};
use crate::tools::ToolContext;

pub const DEFAULT_MODEL: &str = "openai:gpt-4.1";

/// Options shared by the REPL and single-shot runs
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `--model` or `AGENT_MODEL`
    pub model: Option<String>,
    /// `--confirm`
    pub confirm: bool,
    /// `--max-iterations`
    pub max_iterations: Option<usize>,
    /// `--verbose`
    pub verbose: bool,
}

/// Pick the model: command line, then config, then the resumed session, then the default
pub fn resolve_model(
    cli_model: Option<&str>,
    config: &UserConfig,
    session_model: Option<&str>,
) -> Result<ProviderModel> {
    let raw = [cli_model, config.agent.default_model.as_deref(), session_model]
        .into_iter()
        .flatten()
        .find(|m| !m.trim().is_empty())
        .unwrap_or(DEFAULT_MODEL);

    parse_model_id(raw).with_context(|| format!("Invalid model id '{}'", raw))
}

/// Build an agent for `model` from the user config and instruction memory
pub fn build_agent(model: ProviderModel, options: &RunOptions, config: &UserConfig) -> Result<AgentLoop> {
    let settings = ProviderSettings::from_env();
    let provider = provider_for(&model, &settings, RetryConfig::default())?;

    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let memory = MemorySet::load(&working_dir);
    debug!(sources = memory.sources().len(), "Loaded instruction memory");

    let system_prompt = build_system_prompt(
        &PromptContext::new(&working_dir, &memory).with_extra_prompt(config.agent.extra_prompt.as_deref()),
    );

    let confirm = options.confirm || config.agent.confirm;
    let registry = create_default_registry();
    let router = if confirm {
        ToolRouter::new(registry, TerminalConfirmation)
    } else {
        ToolRouter::new(registry, AutoApprove)
    };

    let agent_config = AgentConfig::new(model.clone())
        .with_system_prompt(system_prompt)
        .with_max_iterations(options.max_iterations.unwrap_or(config.agent.max_iterations))
        .with_working_dir(working_dir.clone())
        .with_auto_mode(!confirm)
        .with_verbose(options.verbose)
        .with_context_budget(config.agent.context_budget_tokens);

    let tool_ctx = ToolContext::new(working_dir)
        .with_command_timeout(config.tools.command_timeout_secs)
        .with_http_timeout(config.tools.http_timeout_secs)
        .with_max_output_len(config.tools.max_output_len);

    Ok(AgentLoop::new(provider, router, agent_config).with_tool_context(tool_ctx))
}

/// Run one message to completion without saving a session
///
/// Returns `false` when the run ended in error.
pub async fn run_single(message: &str, options: &RunOptions) -> Result<bool> {
    let config = UserConfig::load()?;
    let model = resolve_model(options.model.as_deref(), &config, None)?;
    let agent = build_agent(model, options, &config)?;
    info!(model = %agent.model(), "Running single message");

    let mut conversation = vec![ChatMessage::user(message)];
    let mut display = ToolStatusDisplay::new().with_tool_spinner(agent.config().auto_mode);
    let state = agent.run_turn(&mut conversation, &mut display).await?;
    drop(display);

    if agent.config().verbose {
        print_iterations(state.iteration);
    }
    print_usage(&state.token_usage);
    if let Some(error) = &state.error {
        print_error(error);
    }

    Ok(state.is_success())
}

/// `id` with the model size appended when known
pub fn format_model_entry(entry: &ModelEntry) -> String {
    match &entry.size {
        Some(size) => format!("{}  {}{}{}", entry.id, DIM, size, RESET),
        None => entry.id.clone(),
    }
}

/// Print the model ids available with the current credentials
pub async fn list_models() -> Result<()> {
    let models = available_model_entries(&ProviderSettings::from_env()).await;

    if models.is_empty() {
        println!("{}No models available.{}", YELLOW, RESET);
        println!(
            "{}Set OPENAI_API_KEY or start Ollama to list models.{}",
            DIM, RESET
        );
        return Ok(());
    }

    for entry in &models {
        println!("{}", format_model_entry(entry));
    }
    Ok(())
}

/// Print saved sessions, newest first
pub fn list_sessions() -> Result<()> {
    print_sessions(&SessionStore::new()?)
}

pub fn print_sessions(store: &SessionStore) -> Result<()> {
    let sessions = store.list()?;

    if sessions.is_empty() {
        println!("No saved sessions found.");
        return Ok(());
    }

    println!("{}Sessions ({}){}", BOLD, sessions.len(), RESET);
    for summary in &sessions {
        println!("  {}", summary.short_description());
    }
    println!();
    println!("{}Resume with: agent --resume=<id>{}", DIM, RESET);
    Ok(())
}

/// Write the default config file
pub fn init_config() -> Result<()> {
    let path = UserConfig::create_default()?;
    println!("Created {}", path.display());
    Ok(())
}
