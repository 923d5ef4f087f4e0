//! System prompt construction

use std::path::Path;

use chrono::{DateTime, Local};

use crate::memory::MemorySet;

const PERSONA: &str = r#"[WHO YOU ARE]
You are a highly autonomous AI command line agent.

[WHAT YOU DO]
You use yourself and the tools at hand to meet the user's request.
You always prefer running commands immediately vs asking the user.
You don't run git commands unless explicitly asked.
Use the communicate tool for short progress notes while you work.

[REQUIRED FOLLOWUP ACTIONS]
- Clean up any temporary files you may have created along the way.
- If any code was written, test it, using this order of preference:
  - Using a unit test suite, if there is one.
  - Manually, by running the whole system.
  - Manually, by writing the code to a file and running that.
- Run any type checking or linting that the project uses.

[YOUR WRITING STYLE]
- Cite all sources and include links in every citation.

[YOUR CODE STYLE]
- Never delete comments unless explicitly asked."#;

/// Inputs for the system prompt
pub struct PromptContext<'a> {
    pub working_dir: &'a Path,
    pub memory: &'a MemorySet,
    pub extra_prompt: Option<&'a str>,
    pub now: DateTime<Local>,
}

impl<'a> PromptContext<'a> {
    pub fn new(working_dir: &'a Path, memory: &'a MemorySet) -> Self {
        Self {
            working_dir,
            memory,
            extra_prompt: None,
            now: Local::now(),
        }
    }

    pub fn with_extra_prompt(mut self, extra: Option<&'a str>) -> Self {
        self.extra_prompt = extra.filter(|e| !e.trim().is_empty());
        self
    }
}

pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::from(PERSONA);

    prompt.push_str("\n\n[ENVIRONMENT]\n");
    prompt.push_str(&format!("Working directory: {}\n", ctx.working_dir.display()));
    prompt.push_str(&format!("OS: {} ({})\n", std::env::consts::OS, std::env::consts::ARCH));
    prompt.push_str(&format!("Date: {}\n", ctx.now.format("%Y-%m-%d")));

    prompt.push_str("\n[ADDITIONAL MEMORY CONTEXT]\n");
    prompt.push_str(&ctx.memory.render());
    prompt.push('\n');

    if let Some(extra) = ctx.extra_prompt {
        prompt.push('\n');
        prompt.push_str(extra.trim());
        prompt.push('\n');
    }

    prompt
}
