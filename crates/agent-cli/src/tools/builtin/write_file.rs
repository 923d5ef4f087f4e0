//! File write tool

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext, ToolResult};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write contents to the file at path, overwriting it. Parent folders are created. \
         The path is relative, ex. ./file.ext, or absolute."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Dangerous
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("path", ParameterProperty::string("Path of the file to write"))
            .with_required("contents", ParameterProperty::string("The contents to write to the file"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = ctx.resolve_path(required_str(args, "path")?);
        let contents = required_str(args, "contents")?;

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!("Error creating directories: {}", e)));
            }
        }

        if let Err(e) = tokio::fs::write(&path, contents).await {
            return Ok(ToolResult::error(format!("Error writing to file: {}", e)));
        }

        debug!(path = %path.display(), bytes = contents.len(), "File written");
        Ok(ToolResult::success("Success"))
    }
}
