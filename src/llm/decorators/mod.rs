/// Decorators wrap an [`LLM`](crate::llm::LLM) and implement the trait
/// themselves, adding behavior transparently.
pub mod retry;

pub use retry::RetryLLM;
