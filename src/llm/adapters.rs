use crate::llm::core::{CompletionRequest, LLM, LLMError};
use async_trait::async_trait;
use rig::{
    agent::Agent as RigAgent, client::CompletionClient, completion::CompletionModel,
    prelude::ProviderClient, providers::gemini,
};
use tracing::debug;

/// Environment variable the Gemini client reads its key from.
pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Lets any `rig::Agent` serve as the poller's model.
///
/// Attachments are flattened into the prompt text with
/// [`CompletionRequest::to_prompt_text`].
#[async_trait]
impl<M> LLM for RigAgent<M>
where
    M: CompletionModel,
{
    async fn complete(&mut self, request: CompletionRequest) -> Result<String, LLMError> {
        rig::completion::Prompt::prompt(self, request.to_prompt_text())
            .await
            .map(|response| response.to_string())
            .map_err(|e| {
                debug!("Rig agent error: {}", e);
                LLMError::PromptError(e.to_string())
            })
    }
}

/// Builds a Gemini-backed agent. The API key is read from `GEMINI_API_KEY`.
pub fn gemini_agent(model: &str, preamble: &str) -> Result<Box<dyn LLM>, LLMError> {
    if std::env::var(GEMINI_API_KEY_VAR).is_err() {
        return Err(LLMError::PromptError(format!(
            "{GEMINI_API_KEY_VAR} is not set"
        )));
    }
    let client = gemini::Client::from_env();
    let agent = client.agent(model).preamble(preamble).build();
    Ok(Box::new(agent))
}
