//! Agent framework for autonomous task execution
//!
//! One turn is an observe-think-act loop: call the model, run the tools it
//! asks for, feed the results back, and stop when it answers in plain text.

mod agent_loop;
mod state;

pub use agent_loop::{repair_dangling_tool_calls, AgentLoop, SilentObserver, TurnObserver};
pub use state::{
    AgentConfig, AgentState, TokenUsage, DEFAULT_CONTEXT_BUDGET_TOKENS, DEFAULT_MAX_ITERATIONS,
};
