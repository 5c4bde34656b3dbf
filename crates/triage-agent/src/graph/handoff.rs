use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use triage_core::config::{AppConfig, HandoffPolicy};
use triage_core::error::{Result, TriageError};

use super::edge::{handoff_tool_name, HandoffEdge};
use super::node::AgentNode;

/// Two-phase builder for a [`HandoffGraph`].
///
/// Register every node, then every extra edge, then call
/// [`validate`](Self::validate) to close and freeze the graph. Nothing can
/// use the graph before it validates.
#[derive(Debug, Default)]
pub struct HandoffGraphBuilder {
    nodes: HashMap<String, AgentNode>,
    order: Vec<String>,
    edges: Vec<HandoffEdge>,
}

impl HandoffGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Fails if the id is already taken.
    pub fn register(&mut self, node: AgentNode) -> Result<&mut Self> {
        if self.nodes.contains_key(&node.id) {
            return Err(TriageError::DuplicateNode(node.id));
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(self)
    }

    /// Add a handoff edge. Endpoints are checked by `validate`.
    pub fn add_handoff(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push(HandoffEdge::new(from, to));
        self
    }

    /// Close the graph: fold edges into their source nodes, reject any
    /// target that is not registered, and reject ids whose handoff tool
    /// names collide.
    ///
    /// A single pass over edges, so cyclic topologies validate fine.
    pub fn validate(self) -> Result<HandoffGraph> {
        let Self {
            mut nodes,
            order,
            edges,
        } = self;

        for edge in edges {
            let source = nodes
                .get_mut(&edge.from)
                .ok_or_else(|| TriageError::UnknownAgent(edge.from.clone()))?;
            source.add_handoff(edge.to);
        }

        for id in &order {
            let node = &nodes[id];
            if let Some(target) = node
                .handoff_targets
                .iter()
                .find(|t| !nodes.contains_key(t.as_str()))
            {
                return Err(TriageError::DanglingHandoff {
                    from: node.id.clone(),
                    to: target.clone(),
                });
            }
        }

        let mut tools: HashMap<String, &str> = HashMap::new();
        for id in &order {
            if let Some(first) = tools.insert(handoff_tool_name(id), id) {
                return Err(TriageError::HandoffToolCollision {
                    tool: handoff_tool_name(id),
                    first: first.to_string(),
                    second: id.clone(),
                });
            }
        }

        debug!(nodes = order.len(), "Handoff graph validated");
        Ok(HandoffGraph { nodes, order })
    }
}

/// Validated, immutable graph of agents and their handoff edges.
///
/// Only obtainable through [`HandoffGraphBuilder::validate`]; safe to share
/// across sessions behind an `Arc`.
#[derive(Debug, Clone)]
pub struct HandoffGraph {
    nodes: HashMap<String, AgentNode>,
    order: Vec<String>,
}

impl HandoffGraph {
    pub fn builder() -> HandoffGraphBuilder {
        HandoffGraphBuilder::new()
    }

    /// Build and validate the graph described by `[[agents]]`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        if config.agents.is_empty() {
            return Err(TriageError::Config("no agents configured".into()));
        }
        let mut builder = Self::builder();
        for agent in &config.agents {
            builder.register(AgentNode::from(agent))?;
        }
        builder.validate()
    }

    pub fn get(&self, id: &str) -> Option<&AgentNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &AgentNode> {
        self.order.iter().map(|id| &self.nodes[id])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether `from` declares a handoff to `to`.
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.get(from).is_some_and(|n| n.can_hand_off_to(to))
    }

    /// Whether `to` is reachable from `from` over zero or more handoff edges.
    pub fn is_reachable(&self, from: &str, to: &str) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }
        self.reachable_from(from).contains(to)
    }

    /// Every registered node that can never receive control starting from `start`.
    pub fn unreachable_from(&self, start: &str) -> Vec<&str> {
        let reached = self.reachable_from(start);
        self.order
            .iter()
            .map(String::as_str)
            .filter(|id| !reached.contains(id))
            .collect()
    }

    fn reachable_from<'a>(&'a self, start: &'a str) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        if !self.contains(start) {
            return seen;
        }
        let mut queue = VecDeque::from([start]);
        seen.insert(start);

        while let Some(id) = queue.pop_front() {
            for target in &self.nodes[id].handoff_targets {
                if seen.insert(target.as_str()) {
                    queue.push_back(target.as_str());
                }
            }
        }
        seen
    }

    /// Whether control may move from `from` to `to` under `policy`.
    ///
    /// Staying with the current agent is always allowed for members.
    pub fn permits(&self, policy: HandoffPolicy, from: &str, to: &str) -> bool {
        if !self.contains(to) {
            return false;
        }
        match policy {
            HandoffPolicy::AnyNode => true,
            HandoffPolicy::DeclaredEdges => from == to || self.has_edge(from, to),
        }
    }

    /// One line per node: `id -> target, target`.
    pub fn describe(&self) -> Vec<String> {
        self.nodes()
            .map(|node| {
                if node.handoff_targets.is_empty() {
                    format!("{} (no handoffs)", node.id)
                } else {
                    format!("{} -> {}", node.id, node.handoff_targets.join(", "))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triage_graph() -> HandoffGraph {
        let mut builder = HandoffGraph::builder();
        builder
            .register(AgentNode::new("intake"))
            .unwrap()
            .register(AgentNode::new("consult"))
            .unwrap()
            .register(AgentNode::new("specialist"))
            .unwrap();
        builder
            .add_handoff("intake", "consult")
            .add_handoff("consult", "specialist")
            .add_handoff("specialist", "consult");
        builder.validate().unwrap()
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut builder = HandoffGraph::builder();
        builder.register(AgentNode::new("intake")).unwrap();
        let err = builder.register(AgentNode::new("intake")).unwrap_err();
        assert!(matches!(err, TriageError::DuplicateNode(id) if id == "intake"));
    }

    #[test]
    fn test_dangling_target_rejected() {
        let mut builder = HandoffGraph::builder();
        builder
            .register(AgentNode::new("intake").with_handoff("billing"))
            .unwrap();
        let err = builder.validate().unwrap_err();
        assert!(matches!(
            err,
            TriageError::DanglingHandoff { ref from, ref to } if from == "intake" && to == "billing"
        ));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut builder = HandoffGraph::builder();
        builder.register(AgentNode::new("intake")).unwrap();
        builder.add_handoff("intake", "ghost");
        assert!(matches!(
            builder.validate(),
            Err(TriageError::DanglingHandoff { .. })
        ));
    }

    #[test]
    fn test_edge_from_unknown_source_rejected() {
        let mut builder = HandoffGraph::builder();
        builder.register(AgentNode::new("intake")).unwrap();
        builder.add_handoff("ghost", "intake");
        assert!(matches!(
            builder.validate(),
            Err(TriageError::UnknownAgent(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_colliding_tool_names_rejected() {
        let mut builder = HandoffGraph::builder();
        builder
            .register(AgentNode::new("post-care"))
            .unwrap()
            .register(AgentNode::new("post_care"))
            .unwrap();
        let err = builder.validate().unwrap_err();
        assert!(matches!(
            err,
            TriageError::HandoffToolCollision { ref tool, ref first, ref second }
                if tool == "transfer_to_post_care" && first == "post-care" && second == "post_care"
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_every_target_is_registered() {
        let graph = triage_graph();
        for node in graph.nodes() {
            for target in &node.handoff_targets {
                assert!(graph.contains(target));
            }
        }
    }

    #[test]
    fn test_registration_order_preserved() {
        let graph = triage_graph();
        let ids: Vec<_> = graph.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["intake", "consult", "specialist"]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_reachability_with_cycle() {
        let graph = triage_graph();
        assert!(graph.is_reachable("intake", "specialist"));
        assert!(graph.is_reachable("specialist", "consult"));
        assert!(graph.is_reachable("consult", "consult"));
        assert!(!graph.is_reachable("consult", "intake"));
        assert!(!graph.is_reachable("specialist", "intake"));
        assert!(!graph.is_reachable("intake", "ghost"));
    }

    #[test]
    fn test_unreachable_from() {
        let graph = triage_graph();
        assert!(graph.unreachable_from("intake").is_empty());
        assert_eq!(graph.unreachable_from("consult"), vec!["intake"]);
    }

    #[test]
    fn test_permits_policy() {
        let graph = triage_graph();
        assert!(graph.permits(HandoffPolicy::AnyNode, "specialist", "intake"));
        assert!(!graph.permits(HandoffPolicy::AnyNode, "intake", "ghost"));

        assert!(graph.permits(HandoffPolicy::DeclaredEdges, "intake", "consult"));
        assert!(graph.permits(HandoffPolicy::DeclaredEdges, "intake", "intake"));
        assert!(!graph.permits(HandoffPolicy::DeclaredEdges, "specialist", "intake"));
    }

    #[test]
    fn test_describe() {
        let mut builder = HandoffGraph::builder();
        builder
            .register(AgentNode::new("a").with_handoff("b"))
            .unwrap()
            .register(AgentNode::new("b"))
            .unwrap();
        let graph = builder.validate().unwrap();
        assert_eq!(graph.describe(), vec!["a -> b", "b (no handoffs)"]);
    }

    #[test]
    fn test_from_config_default_topology() {
        let graph = HandoffGraph::from_config(&AppConfig::triage_default()).unwrap();
        assert!(graph.has_edge("intake", "consult"));
        assert!(graph.has_edge("consult", "specialist"));
        assert!(graph.has_edge("specialist", "consult"));
        assert_eq!(graph.get("specialist").unwrap().capability.name, "Lab report specialist");
    }

    #[test]
    fn test_from_config_empty() {
        let mut config = AppConfig::triage_default();
        config.agents.clear();
        assert!(matches!(
            HandoffGraph::from_config(&config),
            Err(TriageError::Config(_))
        ));
    }
}
