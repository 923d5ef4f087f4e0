//! Terminal rendering of agent progress
//!
//! Shows a spinner while waiting on the model and prints one status line per
//! tool call with a short result preview. Assistant text is rendered as
//! Markdown once complete on a terminal and streamed raw otherwise.

use std::io::{stdout, IsTerminal, Write};
use std::time::Duration;

use agent_core::ToolCall;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::agent::{TokenUsage, TurnObserver};
use crate::markdown::render_markdown;
use crate::tools::router::RouteResult;

// ANSI colors
pub const GREEN: &str = "\x1b[92m";
pub const RED: &str = "\x1b[91m";
pub const BLUE: &str = "\x1b[94m";
pub const YELLOW: &str = "\x1b[93m";
pub const CYAN: &str = "\x1b[96m";
pub const DIM: &str = "\x1b[2m";
pub const ITALIC: &str = "\x1b[3m";
pub const BOLD: &str = "\x1b[1m";
pub const RESET: &str = "\x1b[0m";

const DIFF_MARKER: &str = "\nDiff:\n";

/// Status of a tool call as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl ToolStatus {
    pub fn tag(&self) -> &'static str {
        match self {
            ToolStatus::Pending => "...",
            ToolStatus::Running => ">",
            ToolStatus::Done => "OK",
            ToolStatus::Error => "ERR",
        }
    }

    fn color(&self) -> &'static str {
        match self {
            ToolStatus::Pending => DIM,
            ToolStatus::Running => CYAN,
            ToolStatus::Done => GREEN,
            ToolStatus::Error => RED,
        }
    }
}

/// Tool arguments as `k=v, k=v` on one line
pub fn format_args_one_line(args: &Value, max_len: usize) -> String {
    let line = match args {
        Value::Object(map) if map.is_empty() => return String::new(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => return String::new(),
        other => other.to_string(),
    };

    let line = line.replace('\n', "\\n");
    if line.chars().count() > max_len {
        let cut: String = line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        line
    }
}

/// The unified diff embedded in a tool result, if any
pub fn extract_unified_diff(text: &str) -> Option<&str> {
    if let Some((_, diff)) = text.split_once(DIFF_MARKER) {
        let diff = diff.trim_matches('\n');
        return if diff.is_empty() { None } else { Some(diff) };
    }

    let stripped = text.trim_start();
    if stripped.starts_with("--- ") && stripped.contains("\n+++ ") {
        return Some(stripped.trim_matches('\n'));
    }
    None
}

/// A tool result without its embedded diff
pub fn remove_diff_from_result(text: &str) -> &str {
    match text.split_once(DIFF_MARKER) {
        Some((head, _)) => head.trim_end_matches('\n'),
        None => text,
    }
}

/// First non-empty lines of a tool result, each cut to `max_line_length`
pub fn extract_result_preview(content: &str, max_lines: usize, max_line_length: usize) -> String {
    let mut preview = Vec::new();

    for line in content.split('\n').take(max_lines * 3) {
        let stripped = line.trim();
        if !stripped.is_empty() {
            let cleaned: String = stripped.chars().filter(|c| !c.is_control()).collect();
            let cleaned = if cleaned.chars().count() > max_line_length {
                let cut: String = cleaned.chars().take(max_line_length.saturating_sub(3)).collect();
                format!("{}...", cut)
            } else {
                cleaned
            };
            preview.push(cleaned);
        }
        if preview.len() >= max_lines {
            break;
        }
    }

    preview.join("\n")
}

/// Color diff lines: additions green, removals red, hunk headers cyan
pub fn colorize_diff(diff: &str) -> String {
    diff.lines()
        .map(|line| {
            let color = if line.starts_with("+++") || line.starts_with("---") {
                BOLD
            } else if line.starts_with('+') {
                GREEN
            } else if line.starts_with('-') {
                RED
            } else if line.starts_with("@@") {
                CYAN
            } else {
                DIM
            };
            format!("{}{}{}", color, line, RESET)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn print_usage(usage: &TokenUsage) {
    if usage.calls > 0 {
        println!("{}[Usage]{} {}", DIM, RESET, usage.summary());
    }
}

pub fn print_iterations(iterations: usize) {
    println!("{}[Completed in {} iteration(s)]{}", DIM, iterations, RESET);
}

pub fn print_error(message: &str) {
    println!("{}Error:{} {}", RED, RESET, message);
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Renders a turn on the terminal
pub struct ToolStatusDisplay {
    spinner: Option<ProgressBar>,
    show_spinner: bool,
    /// Off while confirmation prompts may be shown
    tool_spinner: bool,
    /// Whether streamed text is waiting for a closing newline
    open_line: bool,
    /// Buffer responses and print them as rendered Markdown
    markdown: bool,
    pending_text: String,
}

impl ToolStatusDisplay {
    pub fn new() -> Self {
        let terminal = stdout().is_terminal();
        Self {
            spinner: None,
            show_spinner: terminal,
            tool_spinner: true,
            open_line: false,
            markdown: terminal,
            pending_text: String::new(),
        }
    }

    pub fn with_markdown(mut self, enabled: bool) -> Self {
        self.markdown = enabled;
        self
    }

    pub fn with_tool_spinner(mut self, enabled: bool) -> Self {
        self.tool_spinner = enabled;
        self
    }

    fn start_spinner(&mut self, message: &str) {
        self.stop_spinner();
        if self.show_spinner {
            self.spinner = Some(spinner(message));
        }
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn flush_markdown(&mut self) {
        let text = std::mem::take(&mut self.pending_text);
        let rendered = render_markdown(&text);
        if !rendered.is_empty() {
            println!("{}", rendered);
        }
    }

    fn close_line(&mut self) {
        if self.open_line {
            println!();
            self.open_line = false;
        }
    }

    fn print_call(status: ToolStatus, call: &ToolCall) {
        let args = format_args_one_line(&call.function.arguments, 120);
        println!(
            "{}[{}]{} {}{}{} {}{}{}",
            status.color(),
            status.tag(),
            RESET,
            CYAN,
            call.function.name,
            RESET,
            DIM,
            args,
            RESET
        );
    }
}

impl Default for ToolStatusDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ToolStatusDisplay {
    fn drop(&mut self) {
        self.stop_spinner();
        // A cancelled response is shown as received
        if !self.pending_text.is_empty() {
            println!("{}", self.pending_text.trim_end());
        }
    }
}

impl TurnObserver for ToolStatusDisplay {
    fn model_request_started(&mut self, iteration: usize) {
        self.close_line();
        if iteration > 1 {
            self.start_spinner(&format!("Thinking (step {})...", iteration));
        } else {
            self.start_spinner("Thinking...");
        }
    }

    fn content_delta(&mut self, delta: &str) {
        if self.markdown {
            self.pending_text.push_str(delta);
            return;
        }
        self.stop_spinner();
        print!("{}", delta);
        let _ = stdout().flush();
        self.open_line = !delta.ends_with('\n');
    }

    fn model_response_finished(&mut self) {
        self.stop_spinner();
        self.flush_markdown();
        self.close_line();
    }

    fn tool_calls_started(&mut self, calls: &[ToolCall]) {
        for call in calls {
            Self::print_call(ToolStatus::Pending, call);
        }
        if !self.tool_spinner {
            return;
        }
        let message = match calls {
            [only] => format!("Running {}...", only.function.name),
            _ => format!("Running {} tools...", calls.len()),
        };
        self.start_spinner(&message);
    }

    fn tool_finished(&mut self, call: &ToolCall, result: &RouteResult) {
        self.stop_spinner();

        let status = if result.is_success() {
            ToolStatus::Done
        } else {
            ToolStatus::Error
        };
        Self::print_call(status, call);

        let content = result.to_message_content();
        let preview = extract_result_preview(remove_diff_from_result(&content), 3, 80);
        for line in preview.lines() {
            println!("    {}{}{}", DIM, line, RESET);
        }
        if let Some(diff) = extract_unified_diff(&content) {
            for line in colorize_diff(diff).lines() {
                println!("    {}", line);
            }
        }
    }

    fn communication(&mut self, message: &str) {
        self.stop_spinner();
        self.close_line();
        println!("{}{}{}{}", DIM, ITALIC, message.trim_matches('\n'), RESET);
    }
}
