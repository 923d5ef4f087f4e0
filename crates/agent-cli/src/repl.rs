//! Interactive REPL
//!
//! Provides:
//! - Line editing with persistent history and tab completion
//! - Session resume with a transcript replay
//! - Ctrl-C cancellation of a running turn
//! - Background autosave after every turn

use std::fs;

use agent_core::{
    available_model_entries, available_models, parse_model_id, provider_for, ChatMessage,
    ProviderSettings, RetryConfig, Role,
};
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tracing::{debug, warn};

use crate::agent::{repair_dangling_tool_calls, AgentLoop, TokenUsage};
use crate::commands::{build_agent, format_model_entry, print_sessions, resolve_model, RunOptions};
use crate::config::UserConfig;
use crate::display::{
    print_error, print_iterations, print_usage, ToolStatusDisplay, BOLD, CYAN, DIM, GREEN, RESET,
    YELLOW,
};
use crate::session::{Session, SessionAutosaver, SessionStore};
use crate::slash::{format_help, CommandCompleter, SlashCommand, COMMANDS};

/// How the REPL starts
#[derive(Debug, Clone, Default)]
pub struct ReplOptions {
    pub run: RunOptions,
    /// `Some(None)` resumes the latest session
    pub resume: Option<Option<String>>,
    /// Sent as the first turn
    pub initial_message: Option<String>,
}

struct ReplState {
    agent: AgentLoop,
    session: Session,
    store: SessionStore,
    autosaver: SessionAutosaver,
    completer: CommandCompleter,
    totals: TokenUsage,
}

/// User and assistant text of a saved conversation, in order
pub fn transcript_lines(messages: &[ChatMessage]) -> Vec<(Role, &str)> {
    messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| (m.role, m.content.trim()))
        .filter(|(_, text)| !text.is_empty())
        .collect()
}

/// Prior user inputs, oldest first
pub fn user_inputs(messages: &[ChatMessage]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.trim())
        .filter(|text| !text.is_empty())
        .collect()
}

fn print_transcript(messages: &[ChatMessage]) {
    for (role, text) in transcript_lines(messages) {
        match role {
            Role::User => println!("{}> {}{}", BOLD, text, RESET),
            _ => println!("{}\n", text),
        }
    }
}

/// Run the interactive REPL
pub async fn run(options: ReplOptions) -> Result<()> {
    let config = UserConfig::load()?;
    let store = SessionStore::new()?;

    let resumed = match &options.resume {
        Some(id) => Some(store.load(id.as_deref())?),
        None => None,
    };

    let model = resolve_model(
        options.run.model.as_deref(),
        &config,
        resumed.as_ref().map(|s| s.model.as_str()),
    )?;
    let agent = build_agent(model.clone(), &options.run, &config)?;

    let mut session = resumed.unwrap_or_else(|| Session::new(model.id()));
    session.model = model.id();
    repair_dangling_tool_calls(&mut session.messages);

    let completer = CommandCompleter::new();
    let mut rl: Editor<CommandCompleter, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(completer.clone()));

    let history_path = store.history_path();
    if let Err(e) = rl.load_history(&history_path) {
        debug!(error = %e, "No input history loaded");
    }

    spawn_model_listing(&completer);

    let mut state = ReplState {
        agent,
        autosaver: SessionAutosaver::spawn(store.clone()),
        session,
        store,
        completer,
        totals: TokenUsage::default(),
    };

    print_welcome(&state, options.resume.is_some());

    if options.resume.is_some() {
        print_transcript(&state.session.messages);
        for input in user_inputs(&state.session.messages) {
            let _ = rl.add_history_entry(input);
        }
    }

    let initial = options
        .initial_message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    if let Some(message) = initial {
        let _ = rl.add_history_entry(message);
        println!("{}> {}{}", BOLD, message, RESET);
        run_turn(&mut state, message).await;
    }

    loop {
        let prompt = format!("{}>{} ", CYAN, RESET);

        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(command) = SlashCommand::parse(line) {
                    match handle_slash_command(&mut state, command).await {
                        Ok(true) => break,
                        Ok(false) => continue,
                        Err(e) => {
                            print_error(&format!("{:#}", e));
                            continue;
                        }
                    }
                }

                run_turn(&mut state, line).await;
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                print_error(&e.to_string());
                break;
            }
        }
    }

    if let Err(e) = save_history(&mut rl, &state.store) {
        warn!(error = %e, "Failed to save input history");
    }

    let ReplState {
        autosaver,
        session,
        totals,
        ..
    } = state;
    autosaver.close().await;

    if session.message_count() > 0 {
        println!("{}Session saved:{} {}", DIM, RESET, session.session_id);
    }
    if totals.calls > 0 {
        println!("{}Total:{} {}", DIM, RESET, totals.summary());
    }
    println!("{}Goodbye!{}", DIM, RESET);
    Ok(())
}

fn print_welcome(state: &ReplState, resumed: bool) {
    println!("{}agent{} {}{}{}", BOLD, RESET, DIM, env!("CARGO_PKG_VERSION"), RESET);
    println!("  Model: {}{}{}", GREEN, state.agent.model(), RESET);
    if resumed {
        println!("  Resumed session: {}", state.session.session_id);
    } else {
        println!("  Session: {}", state.session.session_id);
    }
    println!("  {}Type /help for commands, Ctrl-D to exit{}", DIM, RESET);
    println!();
}

fn save_history(rl: &mut Editor<CommandCompleter, DefaultHistory>, store: &SessionStore) -> Result<()> {
    fs::create_dir_all(store.base_dir())?;
    rl.save_history(&store.history_path())?;
    Ok(())
}

/// Fill completion candidates without delaying the prompt
fn spawn_model_listing(completer: &CommandCompleter) {
    let model_ids = completer.model_ids();
    tokio::spawn(async move {
        let ids = available_models(&ProviderSettings::from_env()).await;
        debug!(count = ids.len(), "Loaded model ids for completion");
        *model_ids.lock() = ids;
    });
}

/// One user turn, cancelled by Ctrl-C
async fn run_turn(state: &mut ReplState, input: &str) {
    state.session.messages.push(ChatMessage::user(input));

    let mut display = ToolStatusDisplay::new().with_tool_spinner(state.agent.config().auto_mode);
    let outcome = tokio::select! {
        result = state.agent.run_turn(&mut state.session.messages, &mut display) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    drop(display);

    match outcome {
        Some(Ok(turn)) => {
            if let Some(error) = &turn.error {
                print_error(error);
            }
            if state.agent.config().verbose {
                print_iterations(turn.iteration);
            }
            print_usage(&turn.token_usage);
            state.totals.add(&turn.token_usage);
        }
        Some(Err(e)) => print_error(&format!("{:#}", e)),
        None => {
            repair_dangling_tool_calls(&mut state.session.messages);
            println!();
            println!("{}Cancelled{}", YELLOW, RESET);
        }
    }

    state.session.touch();
    state.autosaver.request_save(&state.session);
}

/// Returns `true` when the REPL should exit
async fn handle_slash_command(state: &mut ReplState, command: SlashCommand) -> Result<bool> {
    match command {
        SlashCommand::Help => print!("{}", format_help(COMMANDS)),
        SlashCommand::Models(None) => list_models(state).await,
        SlashCommand::Models(Some(id)) => switch_model(state, &id)?,
        SlashCommand::Clear => {
            state.session = Session::new(state.agent.model().id());
            println!("{}Started new session:{} {}", DIM, RESET, state.session.session_id);
        }
        SlashCommand::Sessions => print_sessions(&state.store)?,
        SlashCommand::DeleteSession(id) => delete_session(state, &id)?,
        SlashCommand::Exit => return Ok(true),
        SlashCommand::Unknown(name) => {
            println!("{}Unknown command:{} {}", YELLOW, RESET, name);
            println!("{}Type /help for available commands{}", DIM, RESET);
        }
    }
    Ok(false)
}

async fn list_models(state: &ReplState) {
    let entries = available_model_entries(&ProviderSettings::from_env()).await;
    *state.completer.model_ids().lock() = entries.iter().map(|e| e.id.clone()).collect();

    if entries.is_empty() {
        println!("{}No models available.{}", YELLOW, RESET);
        return;
    }

    let current = state.agent.model().id();
    for entry in &entries {
        if entry.id == current {
            println!("  {}* {}{}", GREEN, format_model_entry(entry), RESET);
        } else {
            println!("    {}", format_model_entry(entry));
        }
    }
}

fn delete_session(state: &ReplState, id: &str) -> Result<()> {
    if id == state.session.session_id {
        println!("{}Cannot delete the active session; /clear first{}", YELLOW, RESET);
        return Ok(());
    }
    state.store.delete(id)?;
    println!("{}Deleted session{} {}", DIM, RESET, id);
    Ok(())
}

fn switch_model(state: &mut ReplState, id: &str) -> Result<()> {
    let model = parse_model_id(id)?;
    let provider = provider_for(&model, &ProviderSettings::from_env(), RetryConfig::default())?;

    state.session.model = model.id();
    state.agent.set_model(provider, model);
    println!("{}Switched to{} {}", DIM, RESET, state.agent.model());
    Ok(())
}
