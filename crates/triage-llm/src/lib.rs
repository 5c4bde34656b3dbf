pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use tracing::warn;

use triage_core::config::ModelConfig;
use triage_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client for a model config.
///
/// Every provider is spoken to over the OpenAI-compatible chat completions
/// API (OpenAI, Ollama, vLLM, Groq, OpenRouter, ...). A `[model.retry]`
/// section wraps the client in a [`RetryingClient`].
pub fn create_client(config: &ModelConfig) -> Arc<dyn LlmClient> {
    if !matches!(
        config.provider.as_str(),
        "openai" | "ollama" | "groq" | "openrouter" | "vllm" | "together"
    ) && config.base_url.is_none()
    {
        warn!(
            provider = %config.provider,
            "Unknown provider without base_url, requests go to the OpenAI endpoint"
        );
    }

    let client = Box::new(OpenAiClient::new());
    match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(client, retry.clone())),
        None => Arc::from(client as Box<dyn LlmClient>),
    }
}
