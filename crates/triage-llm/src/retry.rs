use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::warn;

use triage_core::config::{ModelConfig, RetryConfig};
use triage_core::error::{Result, TriageError};
use triage_core::traits::LlmClient;
use triage_core::types::*;

/// An LLM client that retries transient request failures with jittered
/// exponential backoff.
///
/// Only opening the stream is retried; once deltas flow, errors are passed
/// through to the caller.
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &TriageError) -> bool {
    match e {
        TriageError::LlmRequest(msg) => ["429", "500", "502", "503", "timeout", "connection"]
            .iter()
            .any(|needle| msg.contains(needle)),
        TriageError::LlmStream(_) => true,
        _ => false,
    }
}

fn backoff_ceiling(attempt: u32, config: &RetryConfig) -> u64 {
    config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms)
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = backoff_ceiling(attempt, config);
    // 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;

            loop {
                match self
                    .inner
                    .chat_stream(&config, messages.clone(), &tools)
                    .await
                {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}
