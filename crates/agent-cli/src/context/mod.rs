//! Fitting a conversation into the model's context window

pub mod tokenizer;

use agent_core::{ChatMessage, Role};
use tracing::debug;

pub use tokenizer::{count_tokens, Tokenizer};

/// Whether `result` answers one of the calls that opened `unit`
fn answers_unit(unit: &[&ChatMessage], result: &ChatMessage) -> bool {
    let Some(id) = result.tool_call_id.as_deref() else {
        return false;
    };
    unit.first()
        .filter(|m| m.role == Role::Assistant)
        .map_or(false, |m| m.tool_calls.iter().any(|c| c.id == id))
}

/// Split messages into units that must be kept or dropped together:
/// an assistant tool-call message with its results, or a single message.
/// Tool messages that answer no call of the current unit are dropped.
fn group_units(messages: &[ChatMessage]) -> Vec<Vec<&ChatMessage>> {
    let mut units: Vec<Vec<&ChatMessage>> = Vec::new();

    for msg in messages {
        if msg.role != Role::Tool {
            units.push(vec![msg]);
            continue;
        }
        match units.last_mut() {
            Some(unit) if answers_unit(unit.as_slice(), msg) => unit.push(msg),
            _ => debug!(tool_call_id = ?msg.tool_call_id, "Dropping tool message with no matching call"),
        }
    }

    units
}

/// The system message plus the newest messages that fit in `budget` tokens
///
/// The newest unit is always kept, even when it alone exceeds the budget.
pub fn trim_to_budget(
    tokenizer: &Tokenizer,
    system: Option<&ChatMessage>,
    messages: &[ChatMessage],
    budget: usize,
) -> Vec<ChatMessage> {
    let system_tokens = system.map(|s| tokenizer.message_tokens(s)).unwrap_or(0);
    let mut remaining = budget.saturating_sub(system_tokens);

    let units = group_units(messages);
    let mut kept: Vec<&Vec<&ChatMessage>> = Vec::new();

    for unit in units.iter().rev() {
        let cost: usize = unit.iter().map(|m| tokenizer.message_tokens(m)).sum();
        if cost > remaining && !kept.is_empty() {
            break;
        }
        remaining = remaining.saturating_sub(cost);
        kept.push(unit);
    }

    let dropped = units.len() - kept.len();
    if dropped > 0 {
        debug!(dropped_units = dropped, budget, "Trimmed conversation to fit context budget");
    }

    system
        .cloned()
        .into_iter()
        .chain(kept.into_iter().rev().flat_map(|u| u.iter().map(|m| (*m).clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tokenizer::TokenizerType;
    use agent_core::ToolCall;
    use serde_json::json;

    fn fallback() -> Tokenizer {
        Tokenizer::with_type(TokenizerType::Fallback)
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("first question ".repeat(20)),
            ChatMessage::assistant("first answer ".repeat(20)),
            ChatMessage::user("second question"),
            ChatMessage::assistant_with_tools("", vec![ToolCall::new("c1", "read_file", json!({"path": "./a"}))]),
            ChatMessage::tool_result("c1", "contents of a"),
            ChatMessage::assistant("done"),
        ]
    }

    #[test]
    fn test_large_budget_keeps_everything() {
        let system = ChatMessage::system("sys");
        let msgs = conversation();
        let trimmed = trim_to_budget(&fallback(), Some(&system), &msgs, 100_000);
        assert_eq!(trimmed.len(), msgs.len() + 1);
        assert_eq!(trimmed[0].role, Role::System);
    }

    #[test]
    fn test_small_budget_keeps_newest_and_tool_pairs() {
        let msgs = conversation();
        let tokenizer = fallback();
        let tail_cost: usize = msgs[2..].iter().map(|m| tokenizer.message_tokens(m)).sum();

        let trimmed = trim_to_budget(&tokenizer, None, &msgs, tail_cost);
        assert_eq!(trimmed.len(), 4);
        assert_eq!(trimmed[0].content, "second question");
        assert!(trimmed[1].has_tool_calls());
        assert_eq!(trimmed[2].role, Role::Tool);
    }

    #[test]
    fn test_never_splits_tool_results_from_call() {
        let msgs = conversation();
        let tokenizer = fallback();
        // Room for the final answer and part of the tool exchange only
        let budget = tokenizer.message_tokens(&msgs[5]) + tokenizer.message_tokens(&msgs[4]);

        let trimmed = trim_to_budget(&tokenizer, None, &msgs, budget);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].content, "done");
    }

    #[test]
    fn test_newest_kept_when_over_budget() {
        let msgs = vec![ChatMessage::user("x".repeat(400))];
        let trimmed = trim_to_budget(&fallback(), None, &msgs, 1);
        assert_eq!(trimmed.len(), 1);
    }

    #[test]
    fn test_stray_tool_message_after_user_dropped() {
        let msgs = vec![
            ChatMessage::user("hi"),
            ChatMessage::tool_result("ghost", "stale"),
            ChatMessage::assistant("hello"),
        ];
        let trimmed = trim_to_budget(&fallback(), None, &msgs, 100_000);
        assert_eq!(trimmed.len(), 2);
        assert!(trimmed.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn test_tool_result_for_other_call_dropped() {
        let msgs = vec![
            ChatMessage::assistant_with_tools("", vec![ToolCall::new("c1", "read_file", json!({}))]),
            ChatMessage::tool_result("c1", "ok"),
            ChatMessage::tool_result("c9", "unrelated"),
        ];
        let trimmed = trim_to_budget(&fallback(), None, &msgs, 100_000);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_leading_orphan_tool_message_dropped() {
        let msgs = vec![ChatMessage::tool_result("old", "stale"), ChatMessage::user("hi")];
        let trimmed = trim_to_budget(&fallback(), None, &msgs, 100_000);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].role, Role::User);
    }
}
