pub mod service;
pub mod settings;
pub mod validation;

pub use service::{resolve_api_key, ConfigService};
pub use settings::{
    AppConfig, CredentialConfig, EmbeddingConfig, IndexConfig, LlmConfig, RetrievalConfig,
};
