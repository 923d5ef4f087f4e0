//! Out-of-band note to the user

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext, ToolResult};

pub const COMMUNICATE_TOOL: &str = "communicate";

/// Returns the message unchanged; the display renders it as an aside
pub struct CommunicateTool;

#[async_trait]
impl Tool for CommunicateTool {
    fn name(&self) -> &str {
        COMMUNICATE_TOOL
    }

    fn description(&self) -> &str {
        "Send a short progress note to the user while you keep working. Use it to explain what you are about to do."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Safe
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("message", ParameterProperty::string("The note to show the user"))
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        Ok(ToolResult::success(required_str(args, "message")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_returns_message() {
        let result = CommunicateTool
            .execute(&json!({"message": "Checking the tests first"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.output, "Checking the tests first");
    }
}
