use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

/// Top-level router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Agent that owns the first turn.
    #[serde(default = "default_start_agent")]
    pub start_agent: String,
    /// Upper bound on a single turn (0 = unbounded).
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
    /// Which handoff decisions the orchestrator accepts.
    #[serde(default)]
    pub handoff_policy: HandoffPolicy,
    /// Handoffs the execution service may chain inside one turn.
    #[serde(default = "default_max_handoffs")]
    pub max_handoffs_per_turn: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_agent: default_start_agent(),
            turn_timeout_secs: default_turn_timeout(),
            handoff_policy: HandoffPolicy::default(),
            max_handoffs_per_turn: default_max_handoffs(),
        }
    }
}

fn default_start_agent() -> String { "intake".to_string() }
fn default_turn_timeout() -> u64 { 120 }
fn default_max_handoffs() -> usize { 5 }

/// Acceptance rule for the agent an execution service hands control to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPolicy {
    /// Any registered agent may take over, regardless of declared edges.
    #[default]
    AnyNode,
    /// Only the current agent or one of its declared handoff targets.
    DeclaredEdges,
}

/// One agent node in the handoff graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    /// Display name (defaults to the id).
    #[serde(default)]
    pub name: Option<String>,
    /// Shown to other agents when deciding whether to hand off here.
    #[serde(default)]
    pub description: String,
    /// Instructions handed to the execution service.
    #[serde(default)]
    pub instructions: String,
    /// Ordered handoff targets.
    #[serde(default)]
    pub handoffs: Vec<String>,
    /// Per-agent model override.
    #[serde(default)]
    pub model: Option<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

const INTAKE_INSTRUCTIONS: &str = "You are the intake agent for the oncology department. \
Collect the patient's current symptoms and relevant medical history. Be concise and \
empathetic. Once you have enough information, hand off to the consult agent.";

const CONSULT_INSTRUCTIONS: &str = "You are the post-consultation care agent for the \
oncology department. Explain prescriptions, upcoming procedures, and ordered lab tests \
in plain terms. If the patient asks about a lab report they do not understand, hand off \
to the specialist agent.";

const SPECIALIST_INSTRUCTIONS: &str = "You are the lab report specialist for the oncology \
department. Interpret lab results in clear, non-technical language. When the patient's \
questions move beyond the report, hand back to the consult agent.";

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TriageError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| TriageError::Config(e.to_string()))?;
        if config.agents.is_empty() {
            return Err(TriageError::Config(format!(
                "{}: no [[agents]] configured",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to the built-in triage topology.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "Config not found, using built-in triage agents");
            Ok(Self::triage_default())
        }
    }

    /// Built-in three-agent topology: intake -> consult <-> specialist.
    pub fn triage_default() -> Self {
        let agent = |id: &str, name: &str, description: &str, instructions: &str, handoffs: &[&str]| {
            AgentConfig {
                id: id.to_string(),
                name: Some(name.to_string()),
                description: description.to_string(),
                instructions: instructions.to_string(),
                handoffs: handoffs.iter().map(|h| h.to_string()).collect(),
                model: None,
            }
        };

        Self {
            session: SessionConfig::default(),
            model: ModelConfig {
                api_key: std::env::var("OPENAI_API_KEY").ok(),
                ..ModelConfig::default()
            },
            agents: vec![
                agent(
                    "intake",
                    "Intake",
                    "Collects symptoms and medical history.",
                    INTAKE_INSTRUCTIONS,
                    &["consult"],
                ),
                agent(
                    "consult",
                    "Post-consultation care",
                    "Explains prescriptions, procedures, and ordered tests.",
                    CONSULT_INSTRUCTIONS,
                    &["specialist"],
                ),
                agent(
                    "specialist",
                    "Lab report specialist",
                    "Interprets lab report results in plain language.",
                    SPECIALIST_INSTRUCTIONS,
                    &["consult"],
                ),
            ],
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(val) => result.push_str(&val),
                    // Unset vars stay verbatim
                    Err(_) => result.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_TRIAGE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_TRIAGE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_TRIAGE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_TRIAGE_VAR}\" tail");
        assert_eq!(result, "key = \"${NONEXISTENT_TRIAGE_VAR}\" tail");
    }

    #[test]
    fn test_expand_env_vars_unterminated() {
        assert_eq!(expand_env_vars("a ${OPEN"), "a ${OPEN");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[[agents]]
id = "intake"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.session.start_agent, "intake");
        assert_eq!(config.session.turn_timeout_secs, 120);
        assert_eq!(config.session.handoff_policy, HandoffPolicy::AnyNode);
        assert_eq!(config.session.max_handoffs_per_turn, 5);
        assert_eq!(config.model.provider, "openai");
        assert!(config.agents[0].handoffs.is_empty());
        assert!(config.agents[0].name.is_none());
    }

    #[test]
    fn test_policy_and_agent_override() {
        let toml_str = r#"
[session]
handoff_policy = "declared_edges"

[[agents]]
id = "intake"
handoffs = ["consult"]

[[agents]]
id = "consult"

[agents.model]
model_id = "gpt-4o"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.session.handoff_policy, HandoffPolicy::DeclaredEdges);
        assert!(config.agents[0].model.is_none());
        assert_eq!(config.agents[1].model.as_ref().unwrap().model_id, "gpt-4o");
    }

    #[test]
    fn test_triage_default_topology() {
        let config = AppConfig::triage_default();
        let ids: Vec<_> = config.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["intake", "consult", "specialist"]);
        let handoffs: Vec<_> = config.agents.iter().map(|a| a.handoffs.clone()).collect();
        assert_eq!(handoffs, vec![vec!["consult"], vec!["specialist"], vec!["consult"]]);
    }
}
