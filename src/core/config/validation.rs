use super::settings::AppConfig;
use crate::core::errors::RagError;
use crate::rag::Metric;

pub fn validate_config(config: &AppConfig) -> Result<(), RagError> {
    let embedding = &config.embedding;
    require_non_empty("embedding.model_name", &embedding.model_name)?;
    require_non_empty("embedding.api_base_url", &embedding.api_base_url)?;
    require_positive("embedding.dimension", embedding.dimension)?;
    require_positive("embedding.batch_size", embedding.batch_size)?;
    require_positive("embedding.max_retries", embedding.max_retries)?;

    require_non_empty("index.index_dir", &config.index.index_dir)?;

    let llm = &config.llm;
    require_non_empty("llm.model_name", &llm.model_name)?;
    require_non_empty("llm.api_base_url", &llm.api_base_url)?;
    if !llm.temperature.is_finite() || !(0.0..=2.0).contains(&llm.temperature) {
        return Err(RagError::Configuration(format!(
            "llm.temperature must be within 0.0..=2.0, got {}",
            llm.temperature
        )));
    }
    require_positive("llm.max_tokens", llm.max_tokens as usize)?;

    let retrieval = &config.retrieval;
    require_positive("retrieval.top_k", retrieval.top_k)?;
    require_positive("retrieval.max_results", retrieval.max_results)?;
    if !retrieval.score_threshold.is_finite() {
        return Err(RagError::Configuration(
            "retrieval.score_threshold must be finite".to_string(),
        ));
    }

    if config.index.metric == Metric::L2 && retrieval.score_threshold > 0.0 {
        return Err(RagError::Configuration(format!(
            "retrieval.score_threshold is {} but L2 similarities are negated distances (<= 0); \
             use a threshold <= 0 such as -0.5",
            retrieval.score_threshold
        )));
    }

    require_non_empty("credentials.api_key_env", &config.credentials.api_key_env)?;

    if config.index.metric == Metric::InnerProduct && !embedding.normalize {
        tracing::warn!(
            "Inner-product index without normalization: scores are not cosine similarities"
        );
    }

    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), RagError> {
    if value.trim().is_empty() {
        return Err(RagError::Configuration(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_positive(field: &str, value: usize) -> Result<(), RagError> {
    if value == 0 {
        return Err(RagError::Configuration(format!("{field} must be greater than 0")));
    }
    Ok(())
}
