use serde::{Deserialize, Serialize};

use triage_core::error::{Result, TriageError};

use crate::graph::HandoffGraph;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    Participant,
    Agent,
}

/// One transcript entry. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: EntryRole,
    /// Producing agent; `None` for participant entries.
    pub attributed_agent: Option<String>,
    pub content: String,
}

impl ConversationEntry {
    pub fn participant(content: impl Into<String>) -> Self {
        Self {
            role: EntryRole::Participant,
            attributed_agent: None,
            content: content.into(),
        }
    }

    pub fn agent(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: EntryRole::Agent,
            attributed_agent: Some(agent.into()),
            content: content.into(),
        }
    }

    /// Label for display: the agent id, or `participant`.
    pub fn speaker(&self) -> &str {
        self.attributed_agent.as_deref().unwrap_or("participant")
    }
}

/// Text produced by an agent during a turn, as returned by the execution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedEntry {
    pub agent: String,
    pub text: String,
}

impl ProducedEntry {
    pub fn new(agent: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            text: text.into(),
        }
    }
}

/// Append-only transcript plus the agent that owns the next turn.
#[derive(Debug, Clone)]
pub struct ConversationState {
    history: Vec<ConversationEntry>,
    current_agent: String,
}

impl ConversationState {
    pub fn new(start_agent: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            current_agent: start_agent.into(),
        }
    }

    pub fn current_agent(&self) -> &str {
        &self.current_agent
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn append_participant_turn(&mut self, text: impl Into<String>) {
        self.history.push(ConversationEntry::participant(text));
    }

    /// Append a turn's agent entries in order and move control to `next_agent`.
    ///
    /// Everything is checked before anything is written: on error the
    /// history and current agent are exactly as they were.
    pub fn apply_agent_result(
        &mut self,
        graph: &HandoffGraph,
        entries: Vec<ProducedEntry>,
        next_agent: &str,
    ) -> Result<()> {
        if !graph.contains(next_agent) {
            return Err(TriageError::InvalidHandoffTarget(next_agent.to_string()));
        }
        if let Some(stray) = entries.iter().find(|e| !graph.contains(&e.agent)) {
            return Err(TriageError::turn(
                &self.current_agent,
                format!("entry attributed to unregistered agent '{}'", stray.agent),
            ));
        }

        self.history.extend(
            entries
                .into_iter()
                .map(|e| ConversationEntry::agent(e.agent, e.text)),
        );
        self.current_agent = next_agent.to_string();
        Ok(())
    }

    /// The full ordered history.
    pub fn snapshot(&self) -> &[ConversationEntry] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AgentNode;

    fn graph() -> HandoffGraph {
        let mut builder = HandoffGraph::builder();
        builder
            .register(AgentNode::new("intake").with_handoff("consult"))
            .unwrap()
            .register(AgentNode::new("consult"))
            .unwrap();
        builder.validate().unwrap()
    }

    #[test]
    fn test_participant_turn() {
        let mut state = ConversationState::new("intake");
        state.append_participant_turn("I have a cough");
        assert_eq!(state.len(), 1);
        let entry = &state.snapshot()[0];
        assert_eq!(entry.role, EntryRole::Participant);
        assert!(entry.attributed_agent.is_none());
        assert_eq!(entry.speaker(), "participant");
    }

    #[test]
    fn test_apply_agent_result_appends_in_order() {
        let graph = graph();
        let mut state = ConversationState::new("intake");
        state.append_participant_turn("hello");
        state
            .apply_agent_result(
                &graph,
                vec![
                    ProducedEntry::new("intake", "Thanks, passing you on."),
                    ProducedEntry::new("consult", "Hi, I can explain your plan."),
                ],
                "consult",
            )
            .unwrap();

        assert_eq!(state.current_agent(), "consult");
        let speakers: Vec<_> = state.snapshot().iter().map(|e| e.speaker()).collect();
        assert_eq!(speakers, vec!["participant", "intake", "consult"]);
        assert_eq!(state.snapshot()[2].role, EntryRole::Agent);
    }

    #[test]
    fn test_invalid_next_agent_leaves_state_unchanged() {
        let graph = graph();
        let mut state = ConversationState::new("intake");
        state.append_participant_turn("hello");
        let before = state.snapshot().to_vec();

        let err = state
            .apply_agent_result(&graph, vec![ProducedEntry::new("intake", "hi")], "unknown")
            .unwrap_err();

        assert!(matches!(err, TriageError::InvalidHandoffTarget(id) if id == "unknown"));
        assert_eq!(state.snapshot(), before.as_slice());
        assert_eq!(state.current_agent(), "intake");
    }

    #[test]
    fn test_stray_attribution_leaves_state_unchanged() {
        let graph = graph();
        let mut state = ConversationState::new("intake");
        let err = state
            .apply_agent_result(&graph, vec![ProducedEntry::new("ghost", "boo")], "consult")
            .unwrap_err();
        assert!(matches!(err, TriageError::TurnExecution { .. }));
        assert!(state.is_empty());
        assert_eq!(state.current_agent(), "intake");
    }

    #[test]
    fn test_empty_result_only_moves_control() {
        let graph = graph();
        let mut state = ConversationState::new("intake");
        state.apply_agent_result(&graph, vec![], "consult").unwrap();
        assert!(state.is_empty());
        assert_eq!(state.current_agent(), "consult");
    }

    #[test]
    fn test_entry_serialization() {
        let entry = ConversationEntry::agent("consult", "hello");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["role"], "agent");
        assert_eq!(json["attributed_agent"], "consult");
    }
}
