//! Embedding client: batching, retry and normalization in front of a remote
//! [`LlmProvider`].

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::EmbeddingConfig;
use crate::core::errors::RagError;
use crate::llm::{LlmProvider, RetryError, RetryPolicy};
use crate::vector_math::{ensure_dimension, normalize_in_place};

#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn LlmProvider>,
    config: EmbeddingConfig,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: EmbeddingConfig) -> Self {
        let retry = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        );
        Self {
            provider,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    /// Embeds `texts` in fixed-size batches. The output has the same length
    /// and order as the input. Nothing is returned unless every batch succeeds.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let batch_size = self.config.batch_size.max(1);
        let mut all = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            let vectors = self.embed_batch(batch).await?;
            all.extend(vectors);
            tracing::debug!("Embedding progress: {}/{}", all.len(), texts.len());
        }

        for vector in &mut all {
            ensure_dimension(vector, self.config.dimension)?;
            if self.config.normalize {
                normalize_in_place(vector);
            }
        }
        Ok(all)
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.embed(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Remote("embedding service returned no vector".into()))
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let model = self.config.model_name.as_str();
        let provider = self.provider.as_ref();

        let outcome = self
            .retry
            .run("embedding batch", |_attempt| async move {
                let vectors = provider.embed(batch, model).await?;
                if vectors.len() != batch.len() {
                    return Err(RagError::Remote(format!(
                        "embedding service returned {} vectors for {} inputs",
                        vectors.len(),
                        batch.len()
                    )));
                }
                Ok(vectors)
            })
            .await;

        match outcome {
            Ok(vectors) => Ok(vectors),
            Err(RetryError::Fatal(err)) => Err(err),
            Err(RetryError::Exhausted { attempts, errors }) => {
                tracing::error!(
                    "Embedding service unavailable after {} attempts ({} provider)",
                    attempts,
                    self.provider.name()
                );
                Err(RagError::EmbeddingUnavailable { attempts, errors })
            }
        }
    }
}
