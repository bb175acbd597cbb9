use serde::{Deserialize, Serialize};

// =============================================================================
// Model Catalog Types
// =============================================================================

/// A single capability a request may require from a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Incremental token streaming.
    Streaming,
    /// Function / tool calling.
    ToolUse,
    /// Image inputs.
    Vision,
}

/// Capability flags advertised by a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub streaming: bool,
    pub tool_use: bool,
    pub vision: bool,
}

impl Capabilities {
    /// Whether a single capability is supported.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Streaming => self.streaming,
            Capability::ToolUse => self.tool_use,
            Capability::Vision => self.vision,
        }
    }

    /// Whether every required capability is supported.
    pub fn satisfies(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.supports(*c))
    }
}

/// Lifecycle status of a registered model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    #[default]
    Active,
    Deprecated,
    Disabled,
}

/// Configuration of a model served by some provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Unique key in the registry (e.g. "gpt-4o-mini").
    pub model_id: String,
    /// Provider id the model is served by (e.g. "openai").
    pub provider: String,
    /// Human readable name.
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Context window in tokens.
    pub context_window: u32,
    /// Maximum completion tokens.
    pub max_output_tokens: u32,
    /// Cost per 1M input tokens in USD.
    #[serde(default)]
    pub cost_per_1m_input_tokens: f64,
    /// Cost per 1M output tokens in USD.
    #[serde(default)]
    pub cost_per_1m_output_tokens: f64,
    #[serde(default)]
    pub status: ModelStatus,
}

impl ModelConfig {
    /// Create an active model with an 8K window and no cost.
    pub fn new(model_id: impl Into<String>, provider: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            display_name: model_id.clone(),
            model_id,
            provider: provider.into(),
            capabilities: Capabilities::default(),
            context_window: 8192,
            max_output_tokens: 4096,
            cost_per_1m_input_tokens: 0.0,
            cost_per_1m_output_tokens: 0.0,
            status: ModelStatus::Active,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set capability flags.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Enable a single capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Streaming => self.capabilities.streaming = true,
            Capability::ToolUse => self.capabilities.tool_use = true,
            Capability::Vision => self.capabilities.vision = true,
        }
        self
    }

    /// Set context window and output limits.
    pub fn with_limits(mut self, context_window: u32, max_output_tokens: u32) -> Self {
        self.context_window = context_window;
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Set pricing (USD per 1M tokens).
    pub fn with_pricing(mut self, input_per_1m: f64, output_per_1m: f64) -> Self {
        self.cost_per_1m_input_tokens = input_per_1m;
        self.cost_per_1m_output_tokens = output_per_1m;
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: ModelStatus) -> Self {
        self.status = status;
        self
    }

    /// Estimate cost of a call in USD.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.cost_per_1m_input_tokens;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.cost_per_1m_output_tokens;
        input_cost + output_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_cost() {
        let model = ModelConfig::new("m", "p").with_pricing(1.0, 2.0);

        // 1M input + 500K output = $1 + $1
        let cost = model.estimate_cost(1_000_000, 500_000);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_capabilities_satisfy() {
        let caps = Capabilities {
            tool_use: true,
            ..Default::default()
        };
        assert!(caps.satisfies(&[]));
        assert!(caps.satisfies(&[Capability::ToolUse]));
        assert!(!caps.satisfies(&[Capability::ToolUse, Capability::Vision]));
    }

    #[test]
    fn test_deserialize_catalog_entry() {
        let json = r#"{
            "model_id": "claude-3-haiku",
            "provider": "anthropic",
            "capabilities": { "tool_use": true },
            "context_window": 200000,
            "max_output_tokens": 4096,
            "cost_per_1m_input_tokens": 0.25,
            "cost_per_1m_output_tokens": 1.25,
            "status": "deprecated"
        }"#;
        let model: ModelConfig = serde_json::from_str(json).unwrap();
        assert!(model.capabilities.tool_use);
        assert!(!model.capabilities.vision);
        assert_eq!(model.status, ModelStatus::Deprecated);
    }
}
