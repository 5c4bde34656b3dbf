use serde::{Deserialize, Serialize};

use triage_core::types::ToolDefinition;

use super::node::AgentNode;

const TOOL_PREFIX: &str = "transfer_to_";

/// A handoff edge registered after its endpoints, in the builder's second phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffEdge {
    /// Source agent id.
    pub from: String,
    /// Target agent id.
    pub to: String,
}

impl HandoffEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Tool name under which a handoff to `target` is offered to a model.
pub fn handoff_tool_name(target: &str) -> String {
    let slug: String = target
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}{}", TOOL_PREFIX, slug)
}

/// Tool definition offering a handoff to `target`.
pub fn handoff_tool(target: &AgentNode) -> ToolDefinition {
    let mut description = format!("Hand off to the {} agent.", target.capability.name);
    if !target.capability.description.is_empty() {
        description.push(' ');
        description.push_str(&target.capability.description);
    }

    ToolDefinition {
        name: handoff_tool_name(&target.id),
        description,
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}
