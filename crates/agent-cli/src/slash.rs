//! REPL slash commands and tab completion

use std::sync::Arc;

use agent_core::filter_prefix;
use parking_lot::Mutex;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

/// A slash command as listed by `/help`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "/help",
        usage: "/help",
        help: "Show this help",
    },
    CommandSpec {
        name: "/models",
        usage: "/models [provider:model]",
        help: "List available models, or switch to the given one",
    },
    CommandSpec {
        name: "/clear",
        usage: "/clear",
        help: "Start a new session with an empty conversation",
    },
    CommandSpec {
        name: "/sessions",
        usage: "/sessions [rm <id>]",
        help: "List saved sessions, or delete one",
    },
    CommandSpec {
        name: "/exit",
        usage: "/exit",
        help: "Exit the agent",
    },
];

const MODELS_PREFIX: &str = "/models ";

/// A parsed REPL command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Models(Option<String>),
    Clear,
    Sessions,
    DeleteSession(String),
    Exit,
    Unknown(String),
}

impl SlashCommand {
    /// `None` when the input is not a slash command
    pub fn parse(input: &str) -> Option<Self> {
        let (cmd, rest) = split_command(input)?;
        let rest = rest.trim();

        Some(match cmd {
            "/help" => SlashCommand::Help,
            "/models" if rest.is_empty() => SlashCommand::Models(None),
            "/models" => SlashCommand::Models(Some(rest.to_string())),
            "/clear" => SlashCommand::Clear,
            "/sessions" if rest.is_empty() => SlashCommand::Sessions,
            "/sessions" => match split_words(rest) {
                ("rm", id) if !id.is_empty() => SlashCommand::DeleteSession(id.to_string()),
                _ => SlashCommand::Unknown(format!("/sessions {}", rest)),
            },
            "/exit" => SlashCommand::Exit,
            other => SlashCommand::Unknown(other.to_string()),
        })
    }
}

/// `Available commands:` followed by each command, sorted by name
pub fn format_help(specs: &[CommandSpec]) -> String {
    let mut sorted: Vec<&CommandSpec> = specs.iter().collect();
    sorted.sort_by_key(|c| c.name);

    let mut lines = vec!["Available commands:".to_string()];
    for spec in sorted {
        lines.push(format!("  {}", spec.usage));
        lines.push(format!("      {}", spec.help));
    }
    lines.join("\n") + "\n"
}

fn split_words(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (text, ""),
    }
}

/// Split `/cmd rest...` into `(cmd, rest)`
pub fn split_command(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    match text.split_once(char::is_whitespace) {
        Some((cmd, rest)) => Some((cmd, rest.trim_start())),
        None => Some((text, "")),
    }
}

/// Completion candidates for the text before the cursor
///
/// Returns the byte offset the candidates replace from.
pub fn complete_input(line: &str, model_ids: &[String]) -> (usize, Vec<String>) {
    if let Some(prefix) = line.strip_prefix(MODELS_PREFIX) {
        let prefix = prefix.trim_start();
        let start = line.len() - prefix.len();
        let matches = filter_prefix(model_ids, prefix).into_iter().map(str::to_string).collect();
        return (start, matches);
    }

    if line.starts_with('/') && !line.contains(char::is_whitespace) {
        let matches = COMMANDS
            .iter()
            .map(|c| c.name)
            .filter(|name| name.starts_with(line))
            .map(str::to_string)
            .collect();
        return (0, matches);
    }

    (line.len(), Vec::new())
}

/// rustyline helper completing command names and model ids
#[derive(Clone, Default)]
pub struct CommandCompleter {
    model_ids: Arc<Mutex<Vec<String>>>,
}

impl CommandCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared list the REPL fills once models are known
    pub fn model_ids(&self) -> Arc<Mutex<Vec<String>>> {
        self.model_ids.clone()
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let before = line.get(..pos).unwrap_or(line);
        let models = self.model_ids.lock().clone();
        let (start, matches) = complete_input(before, &models);

        let pairs = matches
            .into_iter()
            .map(|m| Pair {
                display: m.clone(),
                replacement: m,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}

impl Validator for CommandCompleter {}

impl Helper for CommandCompleter {}
