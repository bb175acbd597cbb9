//! Model catalog files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use switchyard_core::{types::ModelConfig, Error, Result};

use crate::registry::ModelRegistry;

/// A list of models loaded from disk (JSON, YAML or TOML by extension).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl ModelCatalog {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("Failed to read model catalog {}: {}", path.display(), e)))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("json")
            .to_ascii_lowercase();

        let catalog: Self = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| Error::config(format!("Failed to parse model catalog: {}", e)))?,
            "toml" => toml::from_str(&content)
                .map_err(|e| Error::config(format!("Failed to parse model catalog: {}", e)))?,
            _ => serde_json::from_str(&content)
                .map_err(|e| Error::config(format!("Failed to parse model catalog: {}", e)))?,
        };

        tracing::info!(path = %path.display(), models = catalog.models.len(), "Loaded model catalog");
        Ok(catalog)
    }

    /// Register every model; returns how many were registered.
    pub fn register_into(&self, registry: &ModelRegistry) -> usize {
        for model in &self.models {
            registry.register(model.clone());
        }
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use switchyard_core::types::Capability;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_json() {
        let file = write_temp(
            ".json",
            r#"{"models": [{
                "model_id": "gpt-4o-mini",
                "provider": "openai",
                "capabilities": {"streaming": true},
                "context_window": 128000,
                "max_output_tokens": 16384,
                "cost_per_1m_input_tokens": 0.15,
                "cost_per_1m_output_tokens": 0.6
            }]}"#,
        );
        let catalog = ModelCatalog::load(file.path()).await.unwrap();
        assert_eq!(catalog.models.len(), 1);
        assert!(catalog.models[0].capabilities.supports(Capability::Streaming));
    }

    #[tokio::test]
    async fn test_load_yaml_and_register() {
        let file = write_temp(
            ".yaml",
            r#"
models:
  - model_id: claude-haiku
    provider: anthropic
    context_window: 200000
    max_output_tokens: 4096
    cost_per_1m_input_tokens: 0.25
    cost_per_1m_output_tokens: 1.25
    status: deprecated
"#,
        );
        let catalog = ModelCatalog::load(file.path()).await.unwrap();
        let registry = ModelRegistry::new();
        assert_eq!(catalog.register_into(&registry), 1);
        assert_eq!(registry.get("claude-haiku").unwrap().provider, "anthropic");
    }

    #[tokio::test]
    async fn test_load_toml() {
        let file = write_temp(
            ".toml",
            r#"
[[models]]
model_id = "local"
provider = "mock"
context_window = 4096
max_output_tokens = 512
cost_per_1m_input_tokens = 0.0
cost_per_1m_output_tokens = 0.0
"#,
        );
        let catalog = ModelCatalog::load(file.path()).await.unwrap();
        assert_eq!(catalog.models[0].context_window, 4096);
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let result = ModelCatalog::load("/nonexistent/models.json").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
