pub mod conversation;
pub mod graph;
pub mod orchestrator;
pub mod runner;
pub mod service;

pub use conversation::{ConversationEntry, ConversationState, EntryRole, ProducedEntry};
pub use graph::{AgentCapability, AgentNode, HandoffEdge, HandoffGraph, HandoffGraphBuilder};
pub use orchestrator::{Orchestrator, SessionIo, SessionStatus, TurnOutcome};
pub use runner::LlmExecutionService;
pub use service::{AgentExecutionService, TurnResult};
