//! File read tool

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{
    required_str, sanitize_path, truncate_output, ParameterProperty, ParameterSchema, SecurityLevel, Tool,
    ToolContext, ToolResult,
};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the file system. The path is relative, ex. ./file.ext, or absolute. \
         It must contain a folder, even if just ./"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Safe
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("path", ParameterProperty::string("Path of the file to read"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let raw = required_str(args, "path")?;
        let shown = sanitize_path(raw);
        let path = ctx.resolve_path(raw);

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let text = format!("[FILE]: {}\n{}", shown, contents);
                Ok(ToolResult::success(truncate_output(&text, ctx.max_output_len)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ToolResult::error(format!("file not found: {}", shown)))
            }
            Err(e) => Ok(ToolResult::error(format!("IOError while reading file: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_relative_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "line 1\nline 2\n").unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = ReadFileTool.execute(&json!({ "path": "notes.txt" }), &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "[FILE]: ./notes.txt\nline 1\nline 2\n");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = ReadFileTool.execute(&json!({ "path": "./gone.txt" }), &ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("file not found: ./gone.txt"));
    }
}
