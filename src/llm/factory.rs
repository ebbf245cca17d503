use crate::llm::config::RetryConfig;
use crate::llm::core::LLM;
use crate::llm::decorators::RetryLLM;

/// Wraps a base model with the decorators its configuration asks for.
pub struct LLMFactory;

impl LLMFactory {
    /// Returns `base_llm` unchanged when `retry_config` is `None` or allows
    /// zero retries, otherwise a [`RetryLLM`] around it.
    pub fn create(base_llm: Box<dyn LLM>, retry_config: Option<RetryConfig>) -> Box<dyn LLM> {
        match retry_config {
            Some(config) if config.max_attempts > 0 => {
                tracing::debug!(
                    max_attempts = config.max_attempts,
                    base_delay_ms = config.base_delay.as_millis(),
                    strategy = ?config.strategy,
                    only_rate_limits = config.only_retry_rate_limits,
                    "Wrapping LLM with retry decorator"
                );
                Box::new(RetryLLM::new(base_llm, config))
            }
            _ => {
                tracing::debug!("Using base LLM without retry");
                base_llm
            }
        }
    }
}
