use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::settings::AppConfig;
use super::validation::validate_config;
use crate::core::errors::RagError;

pub const CONFIG_PATH_ENV: &str = "GROUNDED_QA_CONFIG";

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 6] = [
    "api_key",
    "secret",
    "password",
    "credential",
    "access_token",
    "bearer",
];

/// Resolves, merges and validates configuration files.
///
/// The public config (`config.yml`) and the optional secrets file
/// (`secrets.yaml`, next to it) are deep-merged before deserialization, so a
/// key such as `credentials.api_key` can live outside the shared file.
#[derive(Debug, Clone)]
pub struct ConfigService {
    config_path: PathBuf,
}

impl ConfigService {
    pub fn new(explicit_path: Option<PathBuf>) -> Self {
        let config_path = explicit_path
            .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config.yml"));
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("secrets.yaml")
    }

    pub fn load_config(&self) -> Result<AppConfig, RagError> {
        let public_config = load_yaml_file(&self.config_path)?;
        let secrets_config = load_yaml_file(&self.secrets_path())?;
        let merged = deep_merge(&public_config, &secrets_config);

        let config: AppConfig = serde_json::from_value(merged)
            .map_err(|e| RagError::Configuration(format!("invalid config: {e}")))?;
        validate_config(&config)?;

        if let Ok(effective) = serde_json::to_value(&config) {
            tracing::debug!(config = %redact_sensitive_values(&effective), "Configuration loaded");
        }
        Ok(config)
    }
}

/// Resolves the bearer credential: environment first, then the merged config.
/// A missing key is a configuration error raised before any network attempt.
pub fn resolve_api_key(config: &AppConfig) -> Result<String, RagError> {
    let env_name = &config.credentials.api_key_env;
    let from_env = env::var(env_name).ok().filter(|v| !v.trim().is_empty());
    let from_file = config
        .credentials
        .api_key
        .clone()
        .filter(|v| !v.trim().is_empty());

    from_env.or(from_file).ok_or_else(|| {
        RagError::Configuration(format!(
            "missing API key: set the {env_name} environment variable"
        ))
    })
}

fn load_yaml_file(path: &Path) -> Result<Value, RagError> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }

    let contents = fs::read_to_string(path)?;
    let value = serde_yaml::from_str::<Value>(&contents).map_err(|e| {
        RagError::Configuration(format!("failed to parse {}: {e}", path.display()))
    })?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(RagError::Configuration(format!(
            "{} must contain a mapping at the top level",
            path.display()
        ))),
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    // `api_key_env` names a variable, it is not the secret itself.
    lowered != "api_key_env" && SENSITIVE_PATTERNS.iter().any(|p| lowered.contains(p))
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::Metric;
    use serde_json::json;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = ConfigService::new(Some(dir.path().join("absent.yml")));
        let config = service.load_config().unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.model_name, "text-embedding-v3");
        assert_eq!(config.index.metric, Metric::InnerProduct);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "config.yml",
            "retrieval:\n  score_threshold: 0.5\nindex:\n  metric: l2\n",
        );
        let config = ConfigService::new(Some(path)).load_config().unwrap();
        assert!((config.retrieval.score_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.max_results, 5);
        assert_eq!(config.index.metric, Metric::L2);
    }

    #[test]
    fn secrets_file_is_merged_over_public_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "config.yml", "credentials:\n  api_key_env: NO_SUCH_VAR_FOR_TEST\n");
        write(dir.path(), "secrets.yaml", "credentials:\n  api_key: sk-from-file\n");

        let config = ConfigService::new(Some(path)).load_config().unwrap();
        assert_eq!(config.credentials.api_key.as_deref(), Some("sk-from-file"));
        assert_eq!(resolve_api_key(&config).unwrap(), "sk-from-file");
    }

    #[test]
    fn missing_credential_is_configuration_error() {
        let mut config = AppConfig::default();
        config.credentials.api_key_env = "GROUNDED_QA_TEST_UNSET_KEY".to_string();
        let err = resolve_api_key(&config).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "config.yml", "embedding:\n  batch_size: 0\n");
        let err = ConfigService::new(Some(path)).load_config().unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn redaction_hides_keys_but_not_variable_names() {
        let value = json!({
            "credentials": { "api_key": "sk-123", "api_key_env": "DASHSCOPE_API_KEY" }
        });
        let redacted = redact_sensitive_values(&value);
        assert_eq!(redacted["credentials"]["api_key"], "****");
        assert_eq!(redacted["credentials"]["api_key_env"], "DASHSCOPE_API_KEY");
    }
}
