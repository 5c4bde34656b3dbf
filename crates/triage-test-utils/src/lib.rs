//! Test doubles and fixtures shared by the triage crates.
//!
//! - [`ScriptedService`] replays queued turn results and records every snapshot it sees.
//! - [`FailingService`] fails every turn.
//! - [`StalledService`] never completes, and notes when its future is dropped.
//! - [`ScriptedLlm`] replays queued delta streams in place of a model provider.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tempfile::NamedTempFile;

use triage_agent::{AgentExecutionService, AgentNode, ConversationEntry, HandoffGraph, TurnResult};
use triage_core::config::ModelConfig;
use triage_core::error::{Result, TriageError};
use triage_core::traits::LlmClient;
use triage_core::types::{ChatMessage, StopReason, StreamDelta, ToolDefinition};

/// One recorded call to [`ScriptedService`].
#[derive(Debug, Clone)]
pub struct ServiceCall {
    pub agent: String,
    pub snapshot: Vec<ConversationEntry>,
}

/// Execution service that returns queued results in order.
///
/// An exhausted queue fails the turn.
#[derive(Default)]
pub struct ScriptedService {
    results: Mutex<VecDeque<Result<TurnResult>>>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl ScriptedService {
    pub fn new(results: Vec<Result<TurnResult>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl AgentExecutionService for ScriptedService {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentNode,
        snapshot: &'a [ConversationEntry],
    ) -> BoxFuture<'a, Result<TurnResult>> {
        self.calls.lock().unwrap().push(ServiceCall {
            agent: agent.id.clone(),
            snapshot: snapshot.to_vec(),
        });
        let next = self.results.lock().unwrap().pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| {
                Err(TriageError::LlmRequest(format!(
                    "no scripted result left for {}",
                    agent.id
                )))
            })
        })
    }
}

/// Execution service whose every turn fails with a transport-style error.
pub struct FailingService {
    pub message: String,
}

impl FailingService {
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
        })
    }
}

impl AgentExecutionService for FailingService {
    fn execute<'a>(
        &'a self,
        _agent: &'a AgentNode,
        _snapshot: &'a [ConversationEntry],
    ) -> BoxFuture<'a, Result<TurnResult>> {
        let err = TriageError::LlmRequest(self.message.clone());
        Box::pin(async move { Err(err) })
    }
}

/// Execution service that never finishes a turn.
#[derive(Default)]
pub struct StalledService {
    started: AtomicUsize,
    dropped: Arc<AtomicBool>,
}

impl StalledService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Turns that were started.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether an in-flight turn future has been dropped.
    pub fn was_abandoned(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl AgentExecutionService for StalledService {
    fn execute<'a>(
        &'a self,
        _agent: &'a AgentNode,
        _snapshot: &'a [ConversationEntry],
    ) -> BoxFuture<'a, Result<TurnResult>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let flag = DropFlag(self.dropped.clone());
        Box::pin(async move {
            let _flag = flag;
            futures::future::pending::<Result<TurnResult>>().await
        })
    }
}

/// One recorded request to [`ScriptedLlm`].
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// LLM client that streams queued replies in order.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Vec<StreamDelta>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Vec<StreamDelta>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// A plain text reply.
    pub fn text(text: &str) -> Vec<StreamDelta> {
        vec![
            StreamDelta::TextDelta(text.to_string()),
            StreamDelta::Stop(StopReason::EndTurn),
        ]
    }

    /// A reply that calls `tool`, optionally after some text.
    pub fn tool_call(preamble: Option<&str>, id: &str, tool: &str) -> Vec<StreamDelta> {
        let mut deltas = Vec::new();
        if let Some(text) = preamble {
            deltas.push(StreamDelta::TextDelta(text.to_string()));
        }
        deltas.push(StreamDelta::ToolUseStart {
            index: 0,
            id: id.to_string(),
            name: tool.to_string(),
        });
        deltas.push(StreamDelta::ToolInputDelta {
            index: 0,
            delta: "{}".to_string(),
        });
        deltas.push(StreamDelta::Stop(StopReason::ToolUse));
        deltas
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.requests.lock().unwrap().push(LlmRequest {
            model_id: config.model_id.clone(),
            messages,
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let reply = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            let deltas =
                reply.ok_or_else(|| TriageError::LlmRequest("no scripted reply left".into()))?;
            let stream: BoxStream<'_, Result<StreamDelta>> =
                Box::pin(futures::stream::iter(deltas.into_iter().map(Ok)));
            Ok(stream)
        })
    }
}

/// The three-agent triage topology: intake -> consult <-> specialist.
pub fn triage_graph() -> HandoffGraph {
    let mut builder = HandoffGraph::builder();
    builder
        .register(
            AgentNode::new("intake")
                .with_name("Intake")
                .with_description("Gathers symptoms and history before a consultation.")
                .with_handoff("consult"),
        )
        .unwrap()
        .register(
            AgentNode::new("consult")
                .with_name("Post-consultation care")
                .with_description("Explains the care plan after a consultation.")
                .with_handoff("specialist"),
        )
        .unwrap()
        .register(
            AgentNode::new("specialist")
                .with_name("Lab report specialist")
                .with_description("Interprets lab results.")
                .with_handoff("consult"),
        )
        .unwrap();
    builder.validate().unwrap()
}

/// Write `contents` to a temporary `.toml` file.
pub fn temp_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
