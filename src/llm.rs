// The `llm` module forwards stored requests to a language model.

pub mod adapters;
pub mod config;
pub mod core;
pub mod decorators;
pub mod factory;

pub use self::config::{RetryConfig, RetryStrategy};
pub use self::core::{CompletionRequest, LLM, LLMError};
pub use self::factory::LLMFactory;
