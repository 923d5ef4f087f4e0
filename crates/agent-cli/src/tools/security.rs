//! Confirmation handling for tools

use std::io::{self, IsTerminal, Write};

use agent_core::ToolCall;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use super::SecurityLevel;

/// Check if stdin is connected to a terminal
pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// Result of a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResult {
    Approved,
    Denied,
    /// Skip this call, keep going
    Skip,
    /// Stop the whole turn
    Abort,
}

/// Trait for handling tool execution confirmations
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, tool_call: &ToolCall, security_level: SecurityLevel) -> ConfirmationResult;
}

/// Prompts on the terminal before running a tool
pub struct TerminalConfirmation;

#[async_trait]
impl ConfirmationHandler for TerminalConfirmation {
    async fn confirm(&self, tool_call: &ToolCall, security_level: SecurityLevel) -> ConfirmationResult {
        let name = &tool_call.function.name;

        if security_level == SecurityLevel::Safe {
            return ConfirmationResult::Approved;
        }

        if !is_interactive() {
            warn!(
                tool = %name,
                security_level = %security_level,
                "Non-interactive mode: denying tool that requires confirmation"
            );
            eprintln!(
                "\x1b[93m[Warning]\x1b[0m Non-interactive mode: tool '{}' ({}) requires confirmation but stdin is not a TTY.",
                name, security_level
            );
            eprintln!("Run without --confirm to execute tools autonomously.");
            return ConfirmationResult::Denied;
        }

        let level_color = match security_level {
            SecurityLevel::Safe => "\x1b[92m",
            SecurityLevel::Moderate => "\x1b[93m",
            SecurityLevel::Dangerous => "\x1b[91m",
        };

        println!();
        println!("{}[{}]\x1b[0m Tool: \x1b[1m{}\x1b[0m", level_color, security_level, name);

        if let Ok(pretty) = serde_json::to_string_pretty(&tool_call.function.arguments) {
            for line in pretty.lines() {
                println!("  {}", line);
            }
        }

        println!();
        print!("Allow this action? [y/n/s(kip)/a(bort)] ");
        let _ = io::stdout().flush();

        // Async stdin keeps the runtime free while waiting
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut input = String::new();

        if reader.read_line(&mut input).await.is_err() {
            debug!("Failed to read stdin, aborting");
            return ConfirmationResult::Abort;
        }

        let result = parse_answer(&input);
        debug!(tool = %name, result = ?result, "User confirmation response");
        result
    }
}

fn parse_answer(input: &str) -> ConfirmationResult {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" | "" => ConfirmationResult::Approved,
        "s" | "skip" => ConfirmationResult::Skip,
        "a" | "abort" | "q" | "quit" => ConfirmationResult::Abort,
        _ => ConfirmationResult::Denied,
    }
}

/// Always approves
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn confirm(&self, _tool_call: &ToolCall, _security_level: SecurityLevel) -> ConfirmationResult {
        ConfirmationResult::Approved
    }
}

/// Always denies
pub struct AutoDeny;

#[async_trait]
impl ConfirmationHandler for AutoDeny {
    async fn confirm(&self, _tool_call: &ToolCall, _security_level: SecurityLevel) -> ConfirmationResult {
        ConfirmationResult::Denied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call() -> ToolCall {
        ToolCall::new("call_1", "run_shell_command", json!({"cmd": "ls"}))
    }

    #[tokio::test]
    async fn test_auto_approve() {
        let result = AutoApprove.confirm(&call(), SecurityLevel::Dangerous).await;
        assert_eq!(result, ConfirmationResult::Approved);
    }

    #[tokio::test]
    async fn test_auto_deny() {
        let result = AutoDeny.confirm(&call(), SecurityLevel::Dangerous).await;
        assert_eq!(result, ConfirmationResult::Denied);
    }

    #[tokio::test]
    async fn test_terminal_approves_safe_tools() {
        let result = TerminalConfirmation.confirm(&call(), SecurityLevel::Safe).await;
        assert_eq!(result, ConfirmationResult::Approved);
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("\n"), ConfirmationResult::Approved);
        assert_eq!(parse_answer("Y\n"), ConfirmationResult::Approved);
        assert_eq!(parse_answer("skip"), ConfirmationResult::Skip);
        assert_eq!(parse_answer("q"), ConfirmationResult::Abort);
        assert_eq!(parse_answer("nope"), ConfirmationResult::Denied);
    }
}
