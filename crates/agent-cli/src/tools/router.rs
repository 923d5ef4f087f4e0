//! Tool routing and dispatch

use std::sync::Arc;

use agent_core::{ToolCall, ToolDefinition};
use tracing::{debug, info, instrument, warn};

use super::registry::ToolRegistry;
use super::security::{ConfirmationHandler, ConfirmationResult};
use super::{SecurityLevel, ToolContext, ToolResult};

/// Result of routing a tool call
#[derive(Debug)]
pub enum RouteResult {
    /// Tool ran; the result may still report a failure
    Success(ToolResult),
    Skipped,
    Denied,
    Aborted,
    NotFound(String),
    /// Malformed arguments or an internal tool error
    Error(String),
}

impl RouteResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RouteResult::Success(r) if r.success)
    }

    /// Text reported back to the model
    pub fn to_message_content(&self) -> String {
        match self {
            RouteResult::Success(result) => result.to_message_content(),
            RouteResult::Skipped => "Error: Tool execution was skipped by the user".to_string(),
            RouteResult::Denied => "Error: Tool execution was denied by the user".to_string(),
            RouteResult::Aborted => "Error: Operation was aborted by the user".to_string(),
            RouteResult::NotFound(name) => format!("Error: Tool not found: {}", name),
            RouteResult::Error(e) => format!("Error: {}", e),
        }
    }
}

/// Router for dispatching tool calls
pub struct ToolRouter {
    registry: ToolRegistry,
    confirmation: Arc<dyn ConfirmationHandler>,
}

impl ToolRouter {
    pub fn new(registry: ToolRegistry, confirmation: impl ConfirmationHandler + 'static) -> Self {
        Self {
            registry,
            confirmation: Arc::new(confirmation),
        }
    }

    /// Route a single tool call
    #[instrument(skip(self, tool_call, ctx), fields(tool = %tool_call.function.name))]
    pub async fn route(&self, tool_call: &ToolCall, ctx: &ToolContext) -> RouteResult {
        let name = &tool_call.function.name;

        let tool = match self.registry.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = %name, "Tool not found");
                return RouteResult::NotFound(name.clone());
            }
        };

        let security_level = tool.security_level();
        let needs_confirmation = security_level != SecurityLevel::Safe && !ctx.auto_mode;

        if needs_confirmation {
            debug!(security_level = %security_level, "Requesting user confirmation");
            match self.confirmation.confirm(tool_call, security_level).await {
                ConfirmationResult::Approved => {}
                ConfirmationResult::Denied => {
                    info!(tool = %name, "User denied tool execution");
                    return RouteResult::Denied;
                }
                ConfirmationResult::Skip => {
                    info!(tool = %name, "User skipped tool execution");
                    return RouteResult::Skipped;
                }
                ConfirmationResult::Abort => {
                    info!(tool = %name, "User aborted operation");
                    return RouteResult::Aborted;
                }
            }
        }

        info!(tool = %name, "Executing tool");
        match tool.execute(&tool_call.function.arguments, ctx).await {
            Ok(result) => {
                if result.success {
                    info!(tool = %name, output_len = result.output.len(), "Tool executed successfully");
                } else {
                    warn!(tool = %name, error = ?result.error, "Tool execution failed");
                }
                RouteResult::Success(result)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution error");
                RouteResult::Error(e.to_string())
            }
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.tool_definitions()
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::security::{AutoApprove, AutoDeny};
    use crate::tools::{required_str, ParameterSchema, Tool};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool(SecurityLevel);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes input"
        }

        fn security_level(&self) -> SecurityLevel {
            self.0
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
            Ok(ToolResult::success(required_str(args, "text")?))
        }
    }

    fn router(level: SecurityLevel, confirmation: impl ConfirmationHandler + 'static) -> ToolRouter {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool(level));
        ToolRouter::new(registry, confirmation)
    }

    #[tokio::test]
    async fn test_route_success() {
        let router = router(SecurityLevel::Safe, AutoApprove);
        let call = ToolCall::new("c1", "echo", json!({"text": "hello"}));

        let result = router.route(&call, &ToolContext::default()).await;
        assert!(result.is_success());
        assert_eq!(result.to_message_content(), "hello");
    }

    #[tokio::test]
    async fn test_route_not_found() {
        let router = ToolRouter::new(ToolRegistry::new(), AutoApprove);
        let call = ToolCall::new("c1", "nonexistent", json!({}));

        let result = router.route(&call, &ToolContext::default()).await;
        assert!(matches!(result, RouteResult::NotFound(_)));
        assert_eq!(result.to_message_content(), "Error: Tool not found: nonexistent");
    }

    #[tokio::test]
    async fn test_missing_argument_is_error() {
        let router = router(SecurityLevel::Safe, AutoApprove);
        let call = ToolCall::new("c1", "echo", json!({}));

        let result = router.route(&call, &ToolContext::default()).await;
        assert!(matches!(result, RouteResult::Error(_)));
        assert!(result.to_message_content().contains("Missing required parameter: text"));
    }

    #[tokio::test]
    async fn test_confirmation_only_outside_auto_mode() {
        let router = router(SecurityLevel::Dangerous, AutoDeny);
        let call = ToolCall::new("c1", "echo", json!({"text": "hi"}));

        let auto = ToolContext::default().with_auto_mode(true);
        assert!(router.route(&call, &auto).await.is_success());

        let confirm = ToolContext::default().with_auto_mode(false);
        assert!(matches!(router.route(&call, &confirm).await, RouteResult::Denied));
    }
}
