use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use triage_core::config::{AppConfig, HandoffPolicy};
use triage_core::error::{Result, TriageError};
use triage_core::event::EventBus;
use triage_core::types::{SessionEvent, SessionId};

use crate::conversation::{ConversationEntry, ConversationState};
use crate::graph::{AgentNode, HandoffGraph};
use crate::service::{AgentExecutionService, TurnResult};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    AwaitingInput,
    RunningTurn,
    Terminated,
}

/// What a successful turn changed.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Agent entries appended by this turn, in emission order.
    pub entries: Vec<ConversationEntry>,
    /// Agent that owned the turn when it started.
    pub previous_agent: String,
    /// Agent that owns the next turn.
    pub current_agent: String,
}

impl TurnOutcome {
    pub fn handed_off(&self) -> bool {
        self.previous_agent != self.current_agent
    }
}

/// Participant-facing side of a session (a terminal, a socket, a test double).
pub trait SessionIo {
    /// Next line of participant input. `None` ends the session.
    fn read_input(&mut self) -> BoxFuture<'_, Result<Option<String>>>;

    /// Show one agent entry.
    fn emit(&mut self, entry: &ConversationEntry) -> Result<()>;

    /// Report a turn that was rejected. The session keeps going.
    fn report_failure(&mut self, error: &TriageError) -> Result<()>;
}

/// Drives one conversation through the handoff graph.
///
/// Holds the only writable [`ConversationState`] for the session; one turn
/// runs at a time. A turn is staged on a copy of the state and committed
/// only if the execution service succeeds and its decision is valid, so a
/// failed turn leaves no trace in the transcript.
pub struct Orchestrator {
    session_id: SessionId,
    graph: Arc<HandoffGraph>,
    service: Arc<dyn AgentExecutionService>,
    state: ConversationState,
    status: SessionStatus,
    policy: HandoffPolicy,
    turn_timeout: Option<Duration>,
    cancel: CancellationToken,
    event_bus: Arc<EventBus>,
    turns: usize,
}

impl Orchestrator {
    /// Create a session starting at `start_agent`, which must be in the graph.
    pub fn new(
        graph: Arc<HandoffGraph>,
        service: Arc<dyn AgentExecutionService>,
        start_agent: &str,
    ) -> Result<Self> {
        if !graph.contains(start_agent) {
            return Err(TriageError::UnknownAgent(start_agent.to_string()));
        }
        Ok(Self {
            session_id: SessionId::new(),
            graph,
            service,
            state: ConversationState::new(start_agent),
            status: SessionStatus::AwaitingInput,
            policy: HandoffPolicy::default(),
            turn_timeout: None,
            cancel: CancellationToken::new(),
            event_bus: Arc::new(EventBus::default()),
            turns: 0,
        })
    }

    /// Create a session using `[session]` settings.
    pub fn from_config(
        config: &AppConfig,
        graph: Arc<HandoffGraph>,
        service: Arc<dyn AgentExecutionService>,
    ) -> Result<Self> {
        let timeout = config.session.turn_timeout_secs;
        Ok(Self::new(graph, service, &config.session.start_agent)?
            .with_policy(config.session.handoff_policy)
            .with_turn_timeout((timeout > 0).then(|| Duration::from_secs(timeout))))
    }

    pub fn with_policy(mut self, policy: HandoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound each turn; `None` waits indefinitely.
    pub fn with_turn_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Token that terminates the session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request termination. An in-flight turn is abandoned without effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current_agent(&self) -> &str {
        self.state.current_agent()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn graph(&self) -> &HandoffGraph {
        &self.graph
    }

    /// Completed turns.
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Run one turn for `input`.
    ///
    /// On any error the conversation state is exactly what it was before the
    /// call. Recoverable errors leave the session in `AwaitingInput`;
    /// cancellation moves it to `Terminated`.
    pub async fn submit(&mut self, input: impl Into<String>) -> Result<TurnOutcome> {
        if self.status == SessionStatus::Terminated {
            return Err(TriageError::SessionTerminated);
        }
        if self.cancel.is_cancelled() {
            self.terminate();
            return Err(TriageError::Cancelled);
        }

        let turn = self.turns + 1;
        let graph = self.graph.clone();
        let previous_agent = self.state.current_agent().to_string();
        let agent = graph
            .get(&previous_agent)
            .ok_or_else(|| TriageError::UnknownAgent(previous_agent.clone()))?;

        let mut staged = self.state.clone();
        staged.append_participant_turn(input);

        self.status = SessionStatus::RunningTurn;
        self.event_bus.publish(SessionEvent::TurnStarted {
            session_id: self.session_id.clone(),
            turn,
            agent: agent.id.clone(),
        });
        debug!(turn, agent = %agent.id, history = staged.len(), "Running turn");

        let result = match self.execute(agent, staged.snapshot()).await {
            Ok(result) => result,
            Err(TriageError::Cancelled) => {
                self.terminate();
                return Err(TriageError::Cancelled);
            }
            Err(e) => return Err(self.reject(turn, e)),
        };

        if !graph.permits(self.policy, &previous_agent, &result.next_agent) {
            return Err(self.reject(turn, TriageError::InvalidHandoffTarget(result.next_agent)));
        }

        let applied_from = staged.len();
        if let Err(e) = staged.apply_agent_result(&graph, result.entries, &result.next_agent) {
            return Err(self.reject(turn, e));
        }

        self.state = staged;
        self.turns = turn;
        self.status = SessionStatus::AwaitingInput;

        let outcome = TurnOutcome {
            entries: self.state.snapshot()[applied_from..].to_vec(),
            previous_agent,
            current_agent: self.state.current_agent().to_string(),
        };
        self.publish_outcome(turn, &outcome);
        Ok(outcome)
    }

    /// Call the service under the turn timeout, racing cancellation.
    ///
    /// Any service failure other than an invalid handoff is reported as a
    /// turn error for `agent`.
    async fn execute(&self, agent: &AgentNode, snapshot: &[ConversationEntry]) -> Result<TurnResult> {
        let call = self.service.execute(agent, snapshot);
        let bounded = async {
            match self.turn_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(TriageError::turn(
                        &agent.id,
                        format!("timed out after {:?}", limit),
                    )),
                },
                None => call.await,
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(TriageError::Cancelled),
            result = bounded => result.map_err(|e| match e {
                TriageError::TurnExecution { .. } | TriageError::InvalidHandoffTarget(_) => e,
                other => TriageError::turn(&agent.id, other.to_string()),
            }),
        }
    }

    fn reject(&mut self, turn: usize, error: TriageError) -> TriageError {
        self.status = SessionStatus::AwaitingInput;
        warn!(turn, agent = %self.state.current_agent(), error = %error, "Turn rejected, state unchanged");
        self.event_bus.publish(SessionEvent::TurnFailed {
            session_id: self.session_id.clone(),
            turn,
            error: error.to_string(),
        });
        error
    }

    fn publish_outcome(&self, turn: usize, outcome: &TurnOutcome) {
        for entry in &outcome.entries {
            self.event_bus.publish(SessionEvent::AgentMessage {
                session_id: self.session_id.clone(),
                agent: entry.speaker().to_string(),
                text: entry.content.clone(),
                at: chrono::Utc::now(),
            });
        }
        if outcome.handed_off() {
            info!(from = %outcome.previous_agent, to = %outcome.current_agent, "Handoff");
            self.event_bus.publish(SessionEvent::Handoff {
                session_id: self.session_id.clone(),
                from: outcome.previous_agent.clone(),
                to: outcome.current_agent.clone(),
            });
        }
        self.event_bus.publish(SessionEvent::TurnCompleted {
            session_id: self.session_id.clone(),
            turn,
            agent: outcome.current_agent.clone(),
            entries: outcome.entries.len(),
        });
    }

    fn terminate(&mut self) {
        if self.status == SessionStatus::Terminated {
            return;
        }
        self.status = SessionStatus::Terminated;
        self.cancel.cancel();
        info!(session = %self.session_id, turns = self.turns, "Session terminated");
        self.event_bus.publish(SessionEvent::SessionTerminated {
            session_id: self.session_id.clone(),
            turns: self.turns,
        });
    }

    /// Session loop: read input, run a turn, emit entries, repeat.
    ///
    /// Ends in `Terminated` when the input source closes or the session is
    /// cancelled, whether it was waiting for input or for the service.
    /// Rejected turns are reported through `io` and the loop continues.
    /// Returns the number of completed turns.
    pub async fn run<I: SessionIo + ?Sized>(&mut self, io: &mut I) -> Result<usize> {
        if self.status == SessionStatus::Terminated {
            return Err(TriageError::SessionTerminated);
        }
        info!(session = %self.session_id, agent = %self.current_agent(), "Session started");
        self.event_bus.publish(SessionEvent::SessionStarted {
            session_id: self.session_id.clone(),
            agent: self.current_agent().to_string(),
        });

        loop {
            let input = tokio::select! {
                _ = self.cancel.cancelled() => None,
                line = io.read_input() => line?,
            };
            let Some(input) = input else {
                self.terminate();
                break;
            };
            if input.trim().is_empty() {
                continue;
            }

            match self.submit(input).await {
                Ok(outcome) => {
                    for entry in &outcome.entries {
                        io.emit(entry)?;
                    }
                }
                Err(e) if e.is_recoverable() => io.report_failure(&e)?,
                Err(TriageError::Cancelled) | Err(TriageError::SessionTerminated) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(self.turns)
    }
}
