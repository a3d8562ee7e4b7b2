pub mod openai;
pub mod provider;
pub mod retry;
pub mod types;

pub use openai::OpenAiCompatProvider;
pub use provider::LlmProvider;
pub use retry::{Attempt, RetryError, RetryPolicy};
pub use types::{ChatMessage, ChatRequest};
