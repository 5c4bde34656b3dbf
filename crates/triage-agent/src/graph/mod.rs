//! Handoff graph: the set of agents and which of them may pass control to which.
//!
//! Nodes are registered into a [`HandoffGraphBuilder`], which resolves every
//! handoff target on `validate` and yields an immutable [`HandoffGraph`].
//! Cycles are allowed. Each declared target is also exposed to models as a
//! `transfer_to_<id>` tool.

pub mod edge;
pub mod handoff;
pub mod node;

pub use edge::{handoff_tool, handoff_tool_name, HandoffEdge};
pub use handoff::{HandoffGraph, HandoffGraphBuilder};
pub use node::{AgentCapability, AgentNode};
