//! Exact-text search and replace with a diff of the change

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use similar::TextDiff;
use tracing::debug;

use crate::tools::{
    required_str, sanitize_path, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext, ToolResult,
};

pub struct SearchReplaceTool;

#[async_trait]
impl Tool for SearchReplaceTool {
    fn name(&self) -> &str {
        "search_replace"
    }

    fn description(&self) -> &str {
        "Replace every occurrence of the exact text `search` with `replace` in the file at path. \
         Returns the number of replacements and a unified diff."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Dangerous
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("path", ParameterProperty::string("Path of the file to edit"))
            .with_required("search", ParameterProperty::string("Exact text to find"))
            .with_required("replace", ParameterProperty::string("Replacement text"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let raw = required_str(args, "path")?;
        let search = required_str(args, "search")?;
        let replace = required_str(args, "replace")?;
        let shown = sanitize_path(raw);
        let path = ctx.resolve_path(raw);

        if search.is_empty() {
            return Ok(ToolResult::error("search text must not be empty"));
        }

        let original = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::error(format!("file not found: {}", shown)));
            }
            Err(e) => return Ok(ToolResult::error(format!("IOError while reading file: {}", e))),
        };

        let count = original.matches(search).count();
        if count == 0 {
            return Ok(ToolResult::error(format!("Text not found in {}", shown)));
        }

        let updated = original.replace(search, replace);
        if let Err(e) = tokio::fs::write(&path, &updated).await {
            return Ok(ToolResult::error(format!("Error writing to file: {}", e)));
        }

        debug!(path = %path.display(), count, "Replaced text");
        Ok(ToolResult::success(format!(
            "Successfully replaced {} occurrence(s) in {}\nDiff:\n{}",
            count,
            shown,
            unified_diff(&shown, &original, &updated)
        )))
    }
}

/// Unified diff between two versions of a file
pub(crate) fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(path, path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replaces_every_occurrence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "let foo = 1;\nprint(foo);\n").unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let args = json!({ "path": "a.txt", "search": "foo", "replace": "bar" });
        let result = SearchReplaceTool.execute(&args, &ctx).await.unwrap();

        assert!(result.success);
        assert!(result
            .output
            .starts_with("Successfully replaced 2 occurrence(s) in ./a.txt\nDiff:\n"));
        assert!(result.output.contains("-let foo = 1;"));
        assert!(result.output.contains("+let bar = 1;"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "let bar = 1;\nprint(bar);\n"
        );
    }

    #[tokio::test]
    async fn test_text_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let args = json!({ "path": "./a.txt", "search": "absent", "replace": "x" });
        let result = SearchReplaceTool.execute(&args, &ctx).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Text not found in ./a.txt"));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello\n");
    }

    #[test]
    fn test_unified_diff_headers() {
        let diff = unified_diff("./f", "a\nb\n", "a\nc\n");
        assert!(diff.starts_with("--- ./f\n+++ ./f\n"));
        assert!(diff.contains("-b\n+c\n"));
    }
}
