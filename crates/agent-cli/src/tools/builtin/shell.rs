//! Shell command execution tool

use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::tools::{
    required_str, truncate_output, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext,
    ToolResult,
};

/// Runs a command through `sh -c`
pub struct ShellTool;

/// Seconds from a number or numeric string; fractions round up, non-positive values are ignored
fn parse_timeout(value: &Value) -> Option<u64> {
    if let Some(secs) = value.as_u64() {
        return (secs > 0).then_some(secs);
    }
    let secs = match value {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        other => other.as_f64()?,
    };
    (secs.is_finite() && secs > 0.0).then(|| secs.ceil() as u64)
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Run a shell command on the user's machine. Use as many of these as needed to satisfy the user request. \
         A timeout in seconds, which defaults to 30, can be specified."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Dangerous
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("cmd", ParameterProperty::string("The shell command to run"))
            .with_property(
                "timeout",
                ParameterProperty::number("Timeout in seconds (default: 30)").with_default(Value::Number(30.into())),
            )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let cmd = required_str(args, "cmd")?;
        let timeout_secs = args
            .get("timeout")
            .and_then(parse_timeout)
            .unwrap_or(ctx.command_timeout_secs);

        if !ctx.working_dir.exists() {
            return Ok(ToolResult::error(format!(
                "Working directory does not exist: {}",
                ctx.working_dir.display()
            )));
        }

        debug!(cmd, timeout_secs, "Running shell command");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(Duration::from_secs(timeout_secs), command.output()).await {
            Ok(Ok(output)) => {
                let code = output.status.code().unwrap_or(-1);
                let text = format!(
                    "[STDOUT]\n{}\n[STDERR]\n{}\n[CODE]\n{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr),
                    code
                );
                let text = truncate_output(&text, ctx.max_output_len);

                if output.status.success() {
                    Ok(ToolResult::success(text))
                } else {
                    Ok(ToolResult::failure(text, format!("Command exited with code {}", code)))
                }
            }
            Ok(Err(e)) => Ok(ToolResult::error(format!("Failed to execute command: {}", e))),
            Err(_) => Ok(ToolResult::error(format!(
                "Command timed out after {} seconds",
                timeout_secs
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_output_format() {
        let ctx = ToolContext::default();
        let args = json!({ "cmd": "echo out; echo err >&2" });

        let result = ShellTool.execute(&args, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "[STDOUT]\nout\n\n[STDERR]\nerr\n\n[CODE]\n0");
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("marker.txt"), "x").unwrap();
        let ctx = ToolContext::new(temp_dir.path().to_path_buf());

        let result = ShellTool.execute(&json!({ "cmd": "ls" }), &ctx).await.unwrap();
        assert!(result.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let ctx = ToolContext::default();
        let result = ShellTool.execute(&json!({ "cmd": "exit 3" }), &ctx).await.unwrap();

        assert!(!result.success);
        assert!(result.output.ends_with("[CODE]\n3"));
        assert_eq!(result.error.as_deref(), Some("Command exited with code 3"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let ctx = ToolContext::default();
        let args = json!({ "cmd": "sleep 10", "timeout": 1 });

        let result = ShellTool.execute(&args, &ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Command timed out after 1 seconds"));
    }

    #[test]
    fn test_parse_timeout_accepts_model_variants() {
        assert_eq!(parse_timeout(&json!(60)), Some(60));
        assert_eq!(parse_timeout(&json!(30.0)), Some(30));
        assert_eq!(parse_timeout(&json!(1.5)), Some(2));
        assert_eq!(parse_timeout(&json!("60")), Some(60));
        assert_eq!(parse_timeout(&json!(" 12.5 ")), Some(13));
        assert_eq!(parse_timeout(&json!("soon")), None);
        assert_eq!(parse_timeout(&json!(0)), None);
        assert_eq!(parse_timeout(&json!(-5)), None);
        assert_eq!(parse_timeout(&json!(null)), None);
    }

    #[tokio::test]
    async fn test_string_timeout_is_honored() {
        let ctx = ToolContext::default();
        let args = json!({ "cmd": "sleep 10", "timeout": "1" });

        let result = ShellTool.execute(&args, &ctx).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("Command timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn test_missing_cmd_is_err() {
        let ctx = ToolContext::default();
        assert!(ShellTool.execute(&json!({}), &ctx).await.is_err());
    }
}
