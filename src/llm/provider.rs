use async_trait::async_trait;

use super::types::ChatRequest;
use crate::core::errors::RagError;

/// Narrow request/response contract with the remote model services.
///
/// Implementations perform exactly one remote call per method invocation;
/// batching and retry live in the callers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "openai", "dashscope")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, RagError>;

    /// generate embeddings, same length and order as `inputs`
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, RagError>;
}
