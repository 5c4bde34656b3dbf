use serde::{Deserialize, Serialize};

use triage_core::config::{AgentConfig, ModelConfig};

/// What an agent is for, handed unchanged to the execution service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapability {
    /// Human-readable name.
    pub name: String,
    /// Shown to other agents when they consider handing off here.
    #[serde(default)]
    pub description: String,
    /// Instructions for this agent's turns.
    #[serde(default)]
    pub instructions: String,
    /// Optional model override for this agent.
    #[serde(default)]
    pub model: Option<ModelConfig>,
}

/// A node in the handoff graph.
///
/// `handoff_targets` keeps insertion order and never holds duplicates. The
/// order carries no priority; which target takes over is decided by the
/// execution service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNode {
    /// Unique, stable identifier.
    pub id: String,
    pub capability: AgentCapability,
    #[serde(default)]
    pub handoff_targets: Vec<String>,
}

impl AgentNode {
    /// Create a node whose display name is its id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            capability: AgentCapability {
                name: id.clone(),
                ..AgentCapability::default()
            },
            id,
            handoff_targets: vec![],
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.capability.name = name.into();
        self
    }

    /// Set the description other agents see.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.capability.description = description.into();
        self
    }

    /// Set the instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.capability.instructions = instructions.into();
        self
    }

    /// Set a model override.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.capability.model = Some(model);
        self
    }

    /// Declare a handoff target. Repeats are ignored.
    pub fn with_handoff(mut self, target: impl Into<String>) -> Self {
        self.add_handoff(target);
        self
    }

    pub(crate) fn add_handoff(&mut self, target: impl Into<String>) {
        let target = target.into();
        if !self.handoff_targets.contains(&target) {
            self.handoff_targets.push(target);
        }
    }

    /// Whether `target` is one of this node's declared handoff targets.
    pub fn can_hand_off_to(&self, target: &str) -> bool {
        self.handoff_targets.iter().any(|t| t == target)
    }
}

impl From<&AgentConfig> for AgentNode {
    fn from(config: &AgentConfig) -> Self {
        let mut node = AgentNode::new(&config.id)
            .with_description(&config.description)
            .with_instructions(&config.instructions);
        if let Some(name) = &config.name {
            node.capability.name = name.clone();
        }
        if let Some(model) = &config.model {
            node.capability.model = Some(model.clone());
        }
        for target in &config.handoffs {
            node.add_handoff(target);
        }
        node
    }
}
