//! Unified diff application

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::tools::{
    required_str, sanitize_path, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext, ToolResult,
};

pub struct PatchFileTool;

#[async_trait]
impl Tool for PatchFileTool {
    fn name(&self) -> &str {
        "patch_file"
    }

    fn description(&self) -> &str {
        "Apply a unified diff patch to the file at path. Either every hunk applies or the file is left untouched."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Dangerous
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("path", ParameterProperty::string("Path of the file to patch"))
            .with_required("diff", ParameterProperty::string("The unified diff to apply"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let raw = required_str(args, "path")?;
        let diff = required_str(args, "diff")?;
        let shown = sanitize_path(raw);
        let path = ctx.resolve_path(raw);

        let original = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::error(format!("file not found: {}", shown)));
            }
            Err(e) => return Ok(ToolResult::error(format!("IOError while reading file: {}", e))),
        };

        let (patched, hunks) = match apply_patch(&original, diff) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %shown, error = %e, "Patch rejected");
                return Ok(ToolResult::error(format!("Patch command failed: {}", e)));
            }
        };

        if let Err(e) = tokio::fs::write(&path, patched).await {
            return Ok(ToolResult::error(format!("Error writing to file: {}", e)));
        }

        debug!(path = %shown, hunks, "Patch applied");
        Ok(ToolResult::success(format!("Patch applied successfully ({} hunk(s))", hunks)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Default)]
struct Hunk {
    /// 1-based line from the `@@ -a,b` header
    old_start: usize,
    lines: Vec<HunkLine>,
}

impl Hunk {
    fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    fn new_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.clone()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

/// Parse `@@ -a,b +c,d @@`, returning `a`
fn parse_hunk_header(line: &str) -> Option<usize> {
    let old = line.strip_prefix("@@")?.trim_start().strip_prefix('-')?;
    let digits: String = old.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("@@") {
            let Some(old_start) = parse_hunk_header(line) else {
                bail!("malformed hunk header: {}", line);
            };
            hunks.extend(current.take());
            current = Some(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }

        // A new file header ends the current hunk
        let next_is_new_header = lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "));
        if line.starts_with("--- ") && next_is_new_header {
            hunks.extend(current.take());
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix('+') {
            if !line.starts_with("+++ ") || !hunk.lines.is_empty() {
                hunk.lines.push(HunkLine::Add(rest.to_string()));
            }
        } else if let Some(rest) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(rest.to_string()));
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
        } else {
            hunks.extend(current.take());
        }
    }
    hunks.extend(current);

    // Trailing blank lines are usually an artifact of how the diff was quoted
    for hunk in &mut hunks {
        while matches!(hunk.lines.last(), Some(HunkLine::Context(s)) if s.is_empty()) {
            hunk.lines.pop();
        }
    }

    if hunks.is_empty() {
        bail!("no hunks found in diff");
    }
    Ok(hunks)
}

fn matches_at(file: &[String], pos: usize, old: &[&str]) -> bool {
    if pos + old.len() > file.len() {
        return false;
    }
    file[pos..pos + old.len()]
        .iter()
        .zip(old)
        .all(|(a, b)| a.trim_end() == b.trim_end())
}

/// Search outward from `expected` for the hunk's old lines, never before `floor`
fn locate(file: &[String], old: &[&str], expected: usize, floor: usize) -> Option<usize> {
    let expected = expected.clamp(floor, file.len());
    let span = file.len().max(1);

    for delta in 0..=span {
        let after = expected + delta;
        if after <= file.len() && matches_at(file, after, old) {
            return Some(after);
        }
        if delta > 0 && expected >= floor + delta && matches_at(file, expected - delta, old) {
            return Some(expected - delta);
        }
    }
    None
}

/// Apply every hunk or none; returns the new text and hunk count
fn apply_patch(original: &str, diff: &str) -> Result<(String, usize)> {
    let hunks = parse_hunks(diff)?;
    let mut file: Vec<String> = original.lines().map(str::to_string).collect();
    let trailing_newline = original.is_empty() || original.ends_with('\n');

    let mut offset: isize = 0;
    let mut floor = 0usize;

    for (n, hunk) in hunks.iter().enumerate() {
        let old = hunk.old_lines();
        let new = hunk.new_lines();

        let expected = if old.is_empty() {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let expected = (expected as isize + offset).max(0) as usize;

        let pos = if old.is_empty() {
            expected.clamp(floor, file.len())
        } else {
            match locate(&file, &old, expected, floor) {
                Some(p) => p,
                None => bail!("hunk {} (at line {}) does not match the file", n + 1, hunk.old_start),
            }
        };

        let new_len = new.len();
        file.splice(pos..pos + old.len(), new);
        offset += new_len as isize - old.len() as isize;
        floor = pos + new_len;
    }

    let mut text = file.join("\n");
    if trailing_newline && !text.is_empty() {
        text.push('\n');
    }
    Ok((text, hunks.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const ORIGINAL: &str = "fn main() {\n    println!(\"hello\");\n}\n";

    #[test]
    fn test_apply_simple_patch() {
        let diff = "--- a/main.rs\n+++ b/main.rs\n@@ -1,3 +1,3 @@\n fn main() {\n-    println!(\"hello\");\n+    println!(\"goodbye\");\n }\n";
        let (patched, hunks) = apply_patch(ORIGINAL, diff).unwrap();
        assert_eq!(hunks, 1);
        assert_eq!(patched, "fn main() {\n    println!(\"goodbye\");\n}\n");
    }

    #[test]
    fn test_apply_with_wrong_line_number() {
        let original = "a\nb\nc\nd\ne\n";
        let diff = "@@ -1,2 +1,2 @@\n d\n-e\n+E\n";
        let (patched, _) = apply_patch(original, diff).unwrap();
        assert_eq!(patched, "a\nb\nc\nd\nE\n");
    }

    #[test]
    fn test_multiple_hunks_track_offset() {
        let original = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let diff = "@@ -1,2 +1,3 @@\n 1\n+1.5\n 2\n@@ -7,2 +8,2 @@\n 7\n-8\n+eight\n";
        let (patched, hunks) = apply_patch(original, diff).unwrap();
        assert_eq!(hunks, 2);
        assert_eq!(patched, "1\n1.5\n2\n3\n4\n5\n6\n7\neight\n");
    }

    #[test]
    fn test_rejects_mismatched_hunk() {
        let diff = "@@ -1,1 +1,1 @@\n-nothing like this\n+x\n";
        assert!(apply_patch(ORIGINAL, diff).is_err());
    }

    #[test]
    fn test_rejects_diff_without_hunks() {
        assert!(apply_patch(ORIGINAL, "just some text").is_err());
    }

    #[tokio::test]
    async fn test_failed_patch_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), ORIGINAL).unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        // First hunk applies, second does not
        let diff = "@@ -1,1 +1,1 @@\n-fn main() {\n+fn start() {\n@@ -3,1 +3,1 @@\n-missing\n+x\n";
        let result = PatchFileTool
            .execute(&json!({ "path": "main.rs", "diff": diff }), &ctx)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("main.rs")).unwrap(), ORIGINAL);
    }

    #[tokio::test]
    async fn test_patch_tool_success_message() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), ORIGINAL).unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let diff = "@@ -2,1 +2,1 @@\n-    println!(\"hello\");\n+    println!(\"hi\");\n";
        let result = PatchFileTool
            .execute(&json!({ "path": "./main.rs", "diff": diff }), &ctx)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "Patch applied successfully (1 hunk(s))");
    }
}
