//! LLM-backed agent execution.
//!
//! Each agent's declared handoffs are offered to the model as
//! `transfer_to_<id>` tools. When the model calls one, the target agent
//! takes over inside the same turn and the model is asked again with the
//! target's instructions, until an agent answers without handing off.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{debug, info, warn};

use triage_core::config::{AppConfig, ModelConfig};
use triage_core::error::{Result, TriageError};
use triage_core::traits::LlmClient;
use triage_core::types::{ChatMessage, StreamDelta, ToolDefinition};

use crate::conversation::{ConversationEntry, EntryRole, ProducedEntry};
use crate::graph::{handoff_tool, handoff_tool_name, AgentNode, HandoffGraph};
use crate::service::{AgentExecutionService, TurnResult};

/// Prepended to every agent's instructions.
pub const HANDOFF_PREAMBLE: &str = "You are one of several agents working together in a \
single conversation with a patient. Control moves between agents through handoffs, \
which are exposed to you as tools named transfer_to_<agent>. Call one when another \
agent is better suited to continue; do not mention the handoff to the patient.";

/// Streaming tool call being assembled from deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    index: usize,
    id: String,
    name: String,
    input_json: String,
}

/// One model response, fully drained.
#[derive(Debug, Default)]
struct Completion {
    text: String,
    calls: Vec<ToolCallAccumulator>,
}

/// Agent execution service that asks an LLM for each agent's reply.
pub struct LlmExecutionService {
    graph: Arc<HandoffGraph>,
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    max_handoffs: usize,
}

impl LlmExecutionService {
    pub fn new(graph: Arc<HandoffGraph>, llm: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        Self {
            graph,
            llm,
            model,
            max_handoffs: 5,
        }
    }

    /// Build from config: global model and per-turn handoff limit.
    pub fn from_config(config: &AppConfig, graph: Arc<HandoffGraph>, llm: Arc<dyn LlmClient>) -> Self {
        Self::new(graph, llm, config.model.clone())
            .with_max_handoffs(config.session.max_handoffs_per_turn)
    }

    /// Cap on handoffs chained within one turn.
    pub fn with_max_handoffs(mut self, max: usize) -> Self {
        self.max_handoffs = max;
        self
    }

    fn model_for<'a>(&'a self, agent: &'a AgentNode) -> &'a ModelConfig {
        agent.capability.model.as_ref().unwrap_or(&self.model)
    }

    fn tools_for(&self, agent: &AgentNode) -> Vec<ToolDefinition> {
        agent
            .handoff_targets
            .iter()
            .filter_map(|id| self.graph.get(id))
            .map(handoff_tool)
            .collect()
    }

    async fn complete(
        &self,
        agent: &AgentNode,
        transcript: &[ChatMessage],
    ) -> Result<Completion> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(system_prompt(agent));
        messages.extend_from_slice(transcript);
        let tools = self.tools_for(agent);

        let mut stream = self
            .llm
            .chat_stream(self.model_for(agent), messages, &tools)
            .await?;

        let mut completion = Completion::default();
        let mut stopped = false;
        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(text) => completion.text.push_str(&text),
                StreamDelta::ToolUseStart { index, id, name } => {
                    completion.calls.push(ToolCallAccumulator {
                        index,
                        id,
                        name,
                        input_json: String::new(),
                    });
                }
                StreamDelta::ToolInputDelta { index, delta } => {
                    if let Some(call) = completion.calls.iter_mut().rev().find(|c| c.index == index) {
                        call.input_json.push_str(&delta);
                    }
                }
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => debug!(agent = %agent.id, input_tokens, output_tokens, "Token usage"),
                StreamDelta::Stop(reason) => {
                    debug!(agent = %agent.id, ?reason, "Completion stopped");
                    stopped = true;
                }
            }
        }

        if !stopped {
            return Err(TriageError::turn(&agent.id, "stream ended before completion"));
        }
        Ok(completion)
    }

    async fn run_turn<'a>(
        &'a self,
        agent: &'a AgentNode,
        snapshot: &[ConversationEntry],
    ) -> Result<TurnResult> {
        let mut active = agent;
        let mut transcript = to_chat_messages(snapshot);
        let mut produced = Vec::new();
        let mut handoffs = 0;

        loop {
            let completion = self.complete(active, &transcript).await?;

            let text = completion.text.trim();
            if !text.is_empty() {
                produced.push(ProducedEntry::new(&active.id, text));
                transcript.push(ChatMessage::assistant_text(text));
            }

            // Only the first call is honored; one agent takes over at a time.
            let Some(call) = completion.calls.into_iter().next() else {
                break;
            };

            let target_id = active
                .handoff_targets
                .iter()
                .find(|t| handoff_tool_name(t) == call.name)
                .ok_or_else(|| {
                    TriageError::turn(&active.id, format!("model called unknown tool '{}'", call.name))
                })?;
            let target = self
                .graph
                .get(target_id)
                .ok_or_else(|| TriageError::InvalidHandoffTarget(target_id.clone()))?;

            handoffs += 1;
            if handoffs > self.max_handoffs {
                return Err(TriageError::turn(
                    &active.id,
                    format!("exceeded {} handoffs in one turn", self.max_handoffs),
                ));
            }

            info!(from = %active.id, to = %target.id, "Model requested handoff");

            let input = serde_json::from_str(&call.input_json).unwrap_or_else(|e| {
                warn!(agent = %active.id, tool = %call.name, error = %e, "Malformed handoff arguments, ignoring");
                serde_json::json!({})
            });
            transcript.push(ChatMessage::assistant_tool_use(&call.id, &call.name, input));
            transcript.push(ChatMessage::tool_result(
                &call.id,
                serde_json::json!({ "assistant": target.id }).to_string(),
            ));
            active = target;
        }

        Ok(TurnResult {
            entries: produced,
            next_agent: active.id.clone(),
        })
    }
}

impl AgentExecutionService for LlmExecutionService {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentNode,
        snapshot: &'a [ConversationEntry],
    ) -> BoxFuture<'a, Result<TurnResult>> {
        Box::pin(self.run_turn(agent, snapshot))
    }
}

fn system_prompt(agent: &AgentNode) -> ChatMessage {
    ChatMessage::system(format!(
        "{}\n\n{}",
        HANDOFF_PREAMBLE, agent.capability.instructions
    ))
}

/// Map the transcript to provider messages: participant lines become user
/// messages, every agent's lines become assistant messages.
fn to_chat_messages(snapshot: &[ConversationEntry]) -> Vec<ChatMessage> {
    snapshot
        .iter()
        .map(|entry| match entry.role {
            EntryRole::Participant => ChatMessage::user(&entry.content),
            EntryRole::Agent => ChatMessage::assistant_text(&entry.content),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures::stream::BoxStream;
    use triage_core::types::{Role, StopReason};

    /// Replays one canned delta sequence per request and records requests.
    struct CannedLlm {
        replies: Mutex<VecDeque<Vec<StreamDelta>>>,
        requests: Mutex<Vec<(Vec<ChatMessage>, Vec<String>)>>,
    }

    impl CannedLlm {
        fn new(replies: Vec<Vec<StreamDelta>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(vec![]),
            })
        }
    }

    impl LlmClient for CannedLlm {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            messages: Vec<ChatMessage>,
            tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let tool_names = tools.iter().map(|t| t.name.clone()).collect();
            self.requests.lock().unwrap().push((messages, tool_names));
            let reply = self.replies.lock().unwrap().pop_front();
            Box::pin(async move {
                let deltas = reply.ok_or_else(|| TriageError::LlmRequest("no canned reply".into()))?;
                let stream = futures::stream::iter(deltas.into_iter().map(Ok));
                Ok(Box::pin(stream) as BoxStream<'_, Result<StreamDelta>>)
            })
        }
    }

    fn text(t: &str) -> Vec<StreamDelta> {
        vec![
            StreamDelta::TextDelta(t.to_string()),
            StreamDelta::Stop(StopReason::EndTurn),
        ]
    }

    fn handoff(tool: &str) -> Vec<StreamDelta> {
        vec![
            StreamDelta::ToolUseStart {
                index: 0,
                id: "call_1".into(),
                name: tool.to_string(),
            },
            StreamDelta::ToolInputDelta {
                index: 0,
                delta: "{}".into(),
            },
            StreamDelta::Stop(StopReason::ToolUse),
        ]
    }

    fn graph() -> Arc<HandoffGraph> {
        let mut builder = HandoffGraph::builder();
        builder
            .register(
                AgentNode::new("intake")
                    .with_instructions("Collect symptoms.")
                    .with_handoff("consult"),
            )
            .unwrap()
            .register(
                AgentNode::new("consult")
                    .with_instructions("Explain care.")
                    .with_handoff("specialist"),
            )
            .unwrap()
            .register(AgentNode::new("specialist").with_handoff("consult"))
            .unwrap();
        Arc::new(builder.validate().unwrap())
    }

    fn service(llm: Arc<CannedLlm>) -> LlmExecutionService {
        LlmExecutionService::new(graph(), llm, ModelConfig::default())
    }

    #[tokio::test]
    async fn test_plain_reply_keeps_agent() {
        let llm = CannedLlm::new(vec![text("What symptoms do you have?")]);
        let svc = service(llm.clone());
        let graph = graph();
        let snapshot = vec![ConversationEntry::participant("hello")];

        let result = svc.execute(graph.get("intake").unwrap(), &snapshot).await.unwrap();
        assert_eq!(result, TurnResult::reply("intake", "What symptoms do you have?"));

        let requests = llm.requests.lock().unwrap();
        let (messages, tools) = &requests[0];
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].text().contains("Collect symptoms."));
        assert!(messages[0].text().starts_with(HANDOFF_PREAMBLE));
        assert_eq!(messages[1].text(), "hello");
        assert_eq!(tools, &vec!["transfer_to_consult".to_string()]);
    }

    #[tokio::test]
    async fn test_handoff_switches_agent_within_turn() {
        let llm = CannedLlm::new(vec![
            handoff("transfer_to_consult"),
            text("I can walk you through your prescription."),
        ]);
        let svc = service(llm.clone());
        let graph = graph();
        let snapshot = vec![ConversationEntry::participant("what does my prescription mean?")];

        let result = svc.execute(graph.get("intake").unwrap(), &snapshot).await.unwrap();
        assert_eq!(result.next_agent, "consult");
        assert_eq!(
            result.entries,
            vec![ProducedEntry::new("consult", "I can walk you through your prescription.")]
        );

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let (messages, tools) = &requests[1];
        assert!(messages[0].text().contains("Explain care."));
        assert_eq!(tools, &vec!["transfer_to_specialist".to_string()]);
        // participant line, tool call, tool result
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].tool_uses()[0].1, "transfer_to_consult");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_turn_error() {
        let llm = CannedLlm::new(vec![handoff("transfer_to_specialist")]);
        let svc = service(llm);
        let graph = graph();

        let err = svc.execute(graph.get("intake").unwrap(), &[]).await.unwrap_err();
        assert!(matches!(err, TriageError::TurnExecution { ref agent, .. } if agent == "intake"));
    }

    #[tokio::test]
    async fn test_handoff_limit() {
        let llm = CannedLlm::new(vec![
            handoff("transfer_to_specialist"),
            handoff("transfer_to_consult"),
            handoff("transfer_to_specialist"),
        ]);
        let svc = service(llm).with_max_handoffs(2);
        let graph = graph();

        let err = svc.execute(graph.get("consult").unwrap(), &[]).await.unwrap_err();
        assert!(err.to_string().contains("exceeded 2 handoffs"));
    }

    #[tokio::test]
    async fn test_llm_failure_propagates() {
        let llm = CannedLlm::new(vec![]);
        let svc = service(llm);
        let graph = graph();

        let err = svc.execute(graph.get("intake").unwrap(), &[]).await.unwrap_err();
        assert!(matches!(err, TriageError::LlmRequest(_)));
    }

    #[tokio::test]
    async fn test_stream_without_stop_is_turn_error() {
        let llm = CannedLlm::new(vec![vec![StreamDelta::TextDelta("Your hemo".into())]]);
        let svc = service(llm);
        let graph = graph();

        let err = svc.execute(graph.get("intake").unwrap(), &[]).await.unwrap_err();
        assert!(matches!(
            err,
            TriageError::TurnExecution { ref agent, ref message }
                if agent == "intake" && message.contains("stream ended")
        ));
    }

    #[tokio::test]
    async fn test_malformed_handoff_arguments_still_hand_off() {
        let mut reply = handoff("transfer_to_consult");
        reply[1] = StreamDelta::ToolInputDelta {
            index: 0,
            delta: "{not json".into(),
        };
        let llm = CannedLlm::new(vec![reply, text("Hello from consult.")]);
        let svc = service(llm.clone());
        let graph = graph();

        let result = svc.execute(graph.get("intake").unwrap(), &[]).await.unwrap();
        assert_eq!(result.next_agent, "consult");
        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[1].0[1].tool_uses()[0].2, &serde_json::json!({}));
    }

    #[test]
    fn test_to_chat_messages_roles() {
        let snapshot = vec![
            ConversationEntry::participant("hi"),
            ConversationEntry::agent("intake", "hello"),
        ];
        let messages = to_chat_messages(&snapshot);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }
}
