//! agent: autonomous command-line AI agent
//!
//! Runs an interactive session by default; `-s` runs one message and exits.

mod agent;
mod commands;
mod config;
mod context;
mod display;
mod markdown;
mod memory;
mod prompt;
mod repl;
mod session;
mod slash;
mod tools;

use std::io;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use crate::commands::RunOptions;
use crate::repl::ReplOptions;

const LATEST_SESSION: &str = "latest";

#[derive(Debug, Parser)]
#[command(name = "agent")]
#[command(about = "Autonomous command-line AI agent", version)]
struct Cli {
    /// Run MESSAGE once and exit without saving a session
    #[arg(short, long)]
    single: bool,

    /// Model as provider:model, e.g. openai:gpt-4.1 or ollama:llama3
    #[arg(short, long, env = "AGENT_MODEL", value_name = "ID")]
    model: Option<String>,

    /// Resume a saved session: `--resume` for the latest, `--resume=ID` for one
    #[arg(
        long,
        value_name = "ID",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = LATEST_SESSION
    )]
    resume: Option<String>,

    /// Ask before running network, write and shell tools
    #[arg(long)]
    confirm: bool,

    /// Maximum model calls per turn
    #[arg(long, value_name = "N")]
    max_iterations: Option<usize>,

    /// Print available models and exit
    #[arg(long)]
    list_models: bool,

    /// Print saved sessions and exit
    #[arg(long)]
    list_sessions: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Print shell completions and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Message to send
    message: Vec<String>,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            model: self.model.clone(),
            confirm: self.confirm,
            max_iterations: self.max_iterations,
            verbose: self.verbose,
        }
    }

    fn message(&self) -> Option<String> {
        let message = self.message.join(" ");
        let message = message.trim();
        (!message.is_empty()).then(|| message.to_string())
    }

    /// `Some(None)` means the latest session
    fn resume_target(&self) -> Option<Option<String>> {
        self.resume
            .as_deref()
            .map(|id| (id != LATEST_SESSION).then(|| id.to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "agent", &mut io::stdout());
        return Ok(());
    }
    if cli.init_config {
        return commands::init_config();
    }
    if cli.list_models {
        return commands::list_models().await;
    }
    if cli.list_sessions {
        return commands::list_sessions();
    }

    let options = cli.run_options();

    if cli.single {
        let Some(message) = cli.message() else {
            bail!("--single needs a MESSAGE");
        };
        if !commands::run_single(&message, &options).await? {
            std::process::exit(1);
        }
        return Ok(());
    }

    repl::run(ReplOptions {
        run: options,
        resume: cli.resume_target(),
        initial_message: cli.message(),
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_single_with_message() {
        let cli = Cli::try_parse_from(["agent", "-s", "fix", "the", "build"]).unwrap();
        assert!(cli.single);
        assert_eq!(cli.message().as_deref(), Some("fix the build"));
        assert_eq!(cli.resume_target(), None);
    }

    #[test]
    fn test_resume_defaults_to_latest() {
        let cli = Cli::try_parse_from(["agent", "--resume"]).unwrap();
        assert_eq!(cli.resume_target(), Some(None));
        assert_eq!(cli.message(), None);
    }

    #[test]
    fn test_resume_with_id() {
        let cli = Cli::try_parse_from(["agent", "--resume=20260101-120000-ab12"]).unwrap();
        assert_eq!(cli.resume_target(), Some(Some("20260101-120000-ab12".to_string())));
    }

    #[test]
    fn test_resume_does_not_swallow_message() {
        let cli = Cli::try_parse_from(["agent", "--resume", "fix the bug"]).unwrap();
        assert_eq!(cli.resume_target(), Some(None));
        assert_eq!(cli.message().as_deref(), Some("fix the bug"));
    }

    #[test]
    fn test_run_options() {
        let cli = Cli::try_parse_from([
            "agent",
            "--model",
            "ollama:llama3",
            "--confirm",
            "--max-iterations",
            "12",
        ])
        .unwrap();
        let options = cli.run_options();
        assert_eq!(options.model.as_deref(), Some("ollama:llama3"));
        assert!(options.confirm);
        assert_eq!(options.max_iterations, Some(12));
    }
}
