//! Retries failed model requests.
//!
//! By default only rate limit errors (HTTP 429 in the Google JSON error
//! document) are retried. When the error carries a
//! `type.googleapis.com/google.rpc.RetryInfo` detail, its `retryDelay`
//! replaces the computed backoff for that attempt.

use crate::llm::config::RetryConfig;
use crate::llm::core::{CompletionRequest, LLM, LLMError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";

/// Wraps a boxed [`LLM`] and retries it according to a [`RetryConfig`].
pub struct RetryLLM {
    inner: Box<dyn LLM>,
    config: RetryConfig,
}

impl RetryLLM {
    pub fn new(inner: Box<dyn LLM>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn should_retry(&self, error: &LLMError) -> bool {
        if !self.config.only_retry_rate_limits {
            return true;
        }
        error_document(error)
            .and_then(|json| json["error"]["code"].as_i64())
            .is_some_and(|code| code == 429)
    }
}

/// Parses the JSON body out of a provider error, if it has one.
fn error_document(error: &LLMError) -> Option<Value> {
    let LLMError::PromptError(message) = error;
    let start = message.find('{')?;
    serde_json::from_str(&message[start..]).ok()
}

/// The server-suggested delay, e.g. `"retryDelay": "17s"`.
fn retry_delay_hint(error: &LLMError) -> Option<Duration> {
    let json = error_document(error)?;
    json["error"]["details"]
        .as_array()?
        .iter()
        .filter(|detail| detail["@type"].as_str() == Some(RETRY_INFO_TYPE))
        .find_map(|detail| {
            detail["retryDelay"]
                .as_str()
                .and_then(|delay| humantime::parse_duration(delay).ok())
        })
}

#[async_trait]
impl LLM for RetryLLM {
    async fn complete(&mut self, request: CompletionRequest) -> Result<String, LLMError> {
        let mut delays = self.config.delays();
        let mut attempt = 1;
        loop {
            let error = match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };
            if !self.should_retry(&error) {
                debug!(attempt, "Model error is not retryable");
                return Err(error);
            }
            let Some(backoff) = delays.next() else {
                warn!(attempt, "Giving up on model request after retries");
                return Err(error);
            };
            let delay = retry_delay_hint(&error).unwrap_or(backoff);
            warn!(
                attempt,
                delay = %humantime::format_duration(delay),
                error = %error,
                "Model request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::RetryStrategy;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    /// Fails with the given error a fixed number of times, then answers.
    struct FlakyLLM {
        failures_left: usize,
        error: LLMError,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LLM for FlakyLLM {
        async fn complete(&mut self, request: CompletionRequest) -> Result<String, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(self.error.clone());
            }
            Ok(format!("ok: {}", request.prompt))
        }
    }

    fn rate_limited() -> LLMError {
        LLMError::PromptError(
            r#"CompletionError: HttpError: {"error": {"code": 429, "message": "quota", "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "1ms"}]}}"#
                .to_string(),
        )
    }

    fn fast_config(max_attempts: usize) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(1), RetryStrategy::Fixed)
    }

    fn flaky(failures: usize, error: LLMError) -> (Box<dyn LLM>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let llm = FlakyLLM {
            failures_left: failures,
            error,
            calls: calls.clone(),
        };
        (Box::new(llm), calls)
    }

    #[tokio::test]
    async fn rate_limit_errors_are_retried_until_success() {
        // --- 1. Arrange ---
        let (inner, calls) = flaky(2, rate_limited());
        let mut llm = RetryLLM::new(inner, fast_config(3));

        // --- 2. Act ---
        let result = llm.complete(CompletionRequest::new("hi", vec![])).await;

        // --- 3. Assert ---
        assert_eq!(result.unwrap(), "ok: hi");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (inner, calls) = flaky(10, rate_limited());
        let mut llm = RetryLLM::new(inner, fast_config(2));

        let result = llm.complete(CompletionRequest::new("hi", vec![])).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_fail_immediately() {
        let error = LLMError::PromptError(r#"{"error": {"code": 400}}"#.to_string());
        let (inner, calls) = flaky(1, error);
        let mut llm = RetryLLM::new(inner, fast_config(3));

        let result = llm.complete(CompletionRequest::new("hi", vec![])).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_all_errors_covers_non_json_failures() {
        let error = LLMError::PromptError("connection reset".to_string());
        let (inner, calls) = flaky(1, error);
        let mut llm = RetryLLM::new(inner, fast_config(3).retry_all_errors());

        let result = llm.complete(CompletionRequest::new("hi", vec![])).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_delay_hint_is_read_from_retry_info() {
        assert_eq!(
            retry_delay_hint(&rate_limited()),
            Some(Duration::from_millis(1))
        );
        assert_eq!(
            retry_delay_hint(&LLMError::PromptError("plain".to_string())),
            None
        );
    }
}
