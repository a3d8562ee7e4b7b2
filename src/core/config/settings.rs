use serde::{Deserialize, Serialize};

use crate::rag::Metric;

pub const DEFAULT_API_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_API_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/// Full application configuration. Every section falls back to its defaults
/// when absent from the YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub credentials: CredentialConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_name: String,
    /// Expected vector dimension; responses of any other size are rejected.
    pub dimension: usize,
    /// L2-normalize every vector. Required for inner product to equal cosine.
    pub normalize: bool,
    pub batch_size: usize,
    pub max_retries: usize,
    /// Base unit of the exponential backoff (`base * 2^attempt`).
    pub retry_base_delay_ms: u64,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "text-embedding-v3".to_string(),
            dimension: 1024,
            normalize: true,
            batch_size: 10,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub metric: Metric,
    pub index_dir: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: Metric::InnerProduct,
            index_dir: "faiss_store".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model_name: String,
    pub api_base_url: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Ask the endpoint for `response_format = json_object`.
    pub json_mode: bool,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_name: "qwen-plus".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            temperature: 0.3,
            max_tokens: 2048,
            json_mode: true,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates requested from the vector index.
    pub top_k: usize,
    /// Candidates scoring strictly below this are dropped.
    pub score_threshold: f32,
    /// Cap applied after threshold filtering.
    pub max_results: usize,
    /// Characters of fragment text kept in answer sources.
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.35,
            max_results: 5,
            preview_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Environment variable consulted for the bearer key.
    pub api_key_env: String,
    /// Fallback key, normally only present in the secrets file.
    pub api_key: Option<String>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
        }
    }
}
