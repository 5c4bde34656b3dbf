use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use triage_core::error::Result;

use crate::conversation::{ConversationEntry, ProducedEntry};
use crate::graph::AgentNode;

/// What one turn produced: the new agent entries in emission order and the
/// agent that ended up owning the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResult {
    pub entries: Vec<ProducedEntry>,
    pub next_agent: String,
}

impl TurnResult {
    pub fn new(entries: Vec<ProducedEntry>, next_agent: impl Into<String>) -> Self {
        Self {
            entries,
            next_agent: next_agent.into(),
        }
    }

    /// A single reply from `agent` that keeps control.
    pub fn reply(agent: impl Into<String>, text: impl Into<String>) -> Self {
        let agent = agent.into();
        Self {
            entries: vec![ProducedEntry::new(agent.clone(), text)],
            next_agent: agent,
        }
    }
}

/// Computes one agent turn.
///
/// Receives the active agent (whose capability it may read) and the full
/// transcript. Deciding which agent holds control afterwards is entirely up
/// to the implementation; the orchestrator only validates the decision.
/// Dropping the returned future cancels the turn.
pub trait AgentExecutionService: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentNode,
        snapshot: &'a [ConversationEntry],
    ) -> BoxFuture<'a, Result<TurnResult>>;
}
