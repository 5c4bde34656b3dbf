use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriageError {
    // Graph construction errors
    #[error("Agent already registered: {0}")]
    DuplicateNode(String),

    #[error("Dangling handoff: {from} -> {to} (target not registered)")]
    DanglingHandoff { from: String, to: String },

    #[error("Handoff tool {tool} is shared by agents {first} and {second}")]
    HandoffToolCollision {
        tool: String,
        first: String,
        second: String,
    },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    // Turn errors
    #[error("Invalid handoff target: {0}")]
    InvalidHandoffTarget(String),

    #[error("Turn failed for agent {agent}: {message}")]
    TurnExecution { agent: String, message: String },

    // Session errors
    #[error("Session cancelled")]
    Cancelled,

    #[error("Session already terminated")]
    SessionTerminated,

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TriageError {
    /// Build a `TurnExecution` error for the given agent.
    pub fn turn(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TurnExecution {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Whether the session can keep accepting input after this error.
    ///
    /// Turn-level failures leave the conversation untouched; everything else
    /// is either a startup failure or a terminated session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidHandoffTarget(_) | Self::TurnExecution { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(TriageError::InvalidHandoffTarget("ghost".into()).is_recoverable());
        assert!(TriageError::turn("intake", "timeout").is_recoverable());
        assert!(!TriageError::DuplicateNode("intake".into()).is_recoverable());
        assert!(!TriageError::Cancelled.is_recoverable());
        assert!(!TriageError::SessionTerminated.is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = TriageError::DanglingHandoff {
            from: "intake".into(),
            to: "billing".into(),
        };
        assert_eq!(
            err.to_string(),
            "Dangling handoff: intake -> billing (target not registered)"
        );
        assert_eq!(
            TriageError::turn("consult", "timed out after 5s").to_string(),
            "Turn failed for agent consult: timed out after 5s"
        );
    }
}
