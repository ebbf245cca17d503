use crate::mail::Attachment;
use async_trait::async_trait;
use thiserror::Error;

/// Attachments larger than this are described instead of inlined.
pub const MAX_INLINE_ATTACHMENT_BYTES: usize = 64 * 1024;

/// A custom error type for LLM operations.
///
/// Provider failures are carried as their rendered message, which for Google
/// APIs is the JSON error document (see the retry decorator).
#[derive(Error, Debug, Clone)]
pub enum LLMError {
    /// An error occurred while prompting the model.
    #[error("Failed to prompt the model: {0}")]
    PromptError(String),
}

/// What is sent to the model for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            prompt: prompt.into(),
            attachments,
        }
    }

    /// Flattens the request into a single text prompt.
    ///
    /// Small UTF-8 attachments are inlined under their file name; anything
    /// else is listed by name and size.
    pub fn to_prompt_text(&self) -> String {
        let mut text = self.prompt.clone();
        for attachment in &self.attachments {
            let inlined = (attachment.data.len() <= MAX_INLINE_ATTACHMENT_BYTES)
                .then(|| std::str::from_utf8(&attachment.data).ok())
                .flatten();
            match inlined {
                Some(content) => {
                    text.push_str(&format!(
                        "\n\n--- attachment: {} ---\n{}",
                        attachment.filename, content
                    ));
                }
                None => {
                    text.push_str(&format!(
                        "\n\n--- attachment: {} ({} bytes, not shown) ---",
                        attachment.filename,
                        attachment.data.len()
                    ));
                }
            }
        }
        text
    }
}

/// A trait that defines the contract for any model the poller can forward to.
///
/// # Examples
///
/// ```rust
/// use chatterbox::llm::{CompletionRequest, LLM, LLMError};
/// use async_trait::async_trait;
///
/// struct EchoLLM;
///
/// #[async_trait]
/// impl LLM for EchoLLM {
///     async fn complete(&mut self, request: CompletionRequest) -> Result<String, LLMError> {
///         Ok(format!("echo: {}", request.prompt))
///     }
/// }
/// ```
#[async_trait]
pub trait LLM: Send + Sync {
    /// Sends the request to the model and returns its answer.
    async fn complete(&mut self, request: CompletionRequest) -> Result<String, LLMError>;
}
