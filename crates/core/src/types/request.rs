use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::model::Capability;
use crate::error::{Error, Result};

/// Average characters per token used for estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Highest temperature accepted by validation.
const MAX_TEMPERATURE: f32 = 2.0;

// =============================================================================
// Request Types
// =============================================================================

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role (system, user, assistant, tool).
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// The prompt of a request: plain system/user text or a message sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicalPrompt {
    Text {
        #[serde(default)]
        system: Option<String>,
        user: String,
    },
    Messages { messages: Vec<ChatMessage> },
}

impl LogicalPrompt {
    /// Whether the prompt carries no user-visible text.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text { user, .. } => user.trim().is_empty(),
            Self::Messages { messages } => messages.iter().all(|m| m.content.trim().is_empty()),
        }
    }

    /// Messages in chat form.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        match self {
            Self::Text { system, user } => {
                let mut messages = Vec::with_capacity(2);
                if let Some(system) = system {
                    messages.push(ChatMessage::new("system", system.clone()));
                }
                messages.push(ChatMessage::new("user", user.clone()));
                messages
            }
            Self::Messages { messages } => messages.clone(),
        }
    }

    /// Flatten into a single text block ("role: content" lines).
    pub fn render(&self) -> String {
        self.to_messages()
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rough prompt size in tokens.
    pub fn estimate_tokens(&self) -> u64 {
        let chars: usize = self.to_messages().iter().map(|m| m.content.len()).sum();
        chars.div_ceil(CHARS_PER_TOKEN) as u64
    }
}

/// What a model must be able to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    pub capabilities: Vec<Capability>,
}

/// Caller constraints on a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    /// Hard ceiling for the whole call, queue wait included.
    pub max_latency_ms: Option<u64>,
    /// Maximum estimated cost in USD.
    pub max_cost: Option<f64>,
    pub temperature: Option<f32>,
    /// Expected completion size, used for cost and budget estimates.
    pub max_output_tokens: Option<u32>,
}

/// An inference request as submitted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(default = "new_request_id")]
    pub request_id: String,
    /// Caller identity used for rate limiting and usage.
    pub agent_id: String,
    pub prompt: LogicalPrompt,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub constraints: Constraints,
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

impl InferenceRequest {
    /// Create a request with a single user message.
    pub fn text(agent_id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            request_id: new_request_id(),
            agent_id: agent_id.into(),
            prompt: LogicalPrompt::Text {
                system: None,
                user: user.into(),
            },
            requirements: Requirements::default(),
            constraints: Constraints::default(),
        }
    }

    /// Create a request from a message sequence.
    pub fn messages(agent_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            request_id: new_request_id(),
            agent_id: agent_id.into(),
            prompt: LogicalPrompt::Messages { messages },
            requirements: Requirements::default(),
            constraints: Constraints::default(),
        }
    }

    /// Set a system prompt (text prompts only).
    pub fn with_system(mut self, text: impl Into<String>) -> Self {
        if let LogicalPrompt::Text { system, .. } = &mut self.prompt {
            *system = Some(text.into());
        }
        self
    }

    /// Set the request id.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// Require a capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        if !self.requirements.capabilities.contains(&capability) {
            self.requirements.capabilities.push(capability);
        }
        self
    }

    pub fn with_max_latency_ms(mut self, ms: u64) -> Self {
        self.constraints.max_latency_ms = Some(ms);
        self
    }

    pub fn with_max_cost(mut self, usd: f64) -> Self {
        self.constraints.max_cost = Some(usd);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.constraints.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.constraints.max_output_tokens = Some(tokens);
        self
    }

    /// Check the request shape.
    pub fn validate(&self) -> Result<()> {
        if self.request_id.trim().is_empty() {
            return Err(Error::validation("request_id must not be empty"));
        }
        if self.agent_id.trim().is_empty() {
            return Err(Error::validation("agent_id must not be empty"));
        }
        if self.prompt.is_empty() {
            return Err(Error::validation("prompt must not be empty"));
        }

        let c = &self.constraints;
        if c.max_latency_ms == Some(0) {
            return Err(Error::validation("max_latency_ms must be positive"));
        }
        if let Some(cost) = c.max_cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(Error::validation("max_cost must be a non-negative number"));
            }
        }
        if let Some(t) = c.temperature {
            if !t.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&t) {
                return Err(Error::validation(format!(
                    "temperature must be within 0.0..={}",
                    MAX_TEMPERATURE
                )));
            }
        }
        if c.max_output_tokens == Some(0) {
            return Err(Error::validation("max_output_tokens must be positive"));
        }
        Ok(())
    }

    /// Exact-match cache key: SHA-256 over the normalized prompt.
    pub fn cache_key(&self) -> String {
        let normalized = self
            .prompt
            .render()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Prompt tokens plus the expected completion size.
    pub fn estimate_total_tokens(&self, default_output_tokens: u32) -> u64 {
        let output = self
            .constraints
            .max_output_tokens
            .unwrap_or(default_output_tokens);
        self.prompt.estimate_tokens() + u64::from(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_prompt() {
        let req = InferenceRequest::text("agent-1", "   ");
        assert!(matches!(req.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_bad_constraints() {
        let req = InferenceRequest::text("agent-1", "hi").with_max_latency_ms(0);
        assert!(req.validate().is_err());

        let req = InferenceRequest::text("agent-1", "hi").with_temperature(3.5);
        assert!(req.validate().is_err());

        let req = InferenceRequest::text("agent-1", "hi").with_max_cost(-1.0);
        assert!(req.validate().is_err());

        let req = InferenceRequest::text("", "hi");
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let req = InferenceRequest::text("agent-1", "Summarise this")
            .with_system("Be brief")
            .with_capability(Capability::ToolUse)
            .with_max_latency_ms(5_000)
            .with_temperature(0.2);
        assert!(req.validate().is_ok());
        assert_eq!(req.prompt.to_messages().len(), 2);
    }

    #[test]
    fn test_cache_key_normalizes_case_and_whitespace() {
        let a = InferenceRequest::text("a", "What is   Rust?");
        let b = InferenceRequest::text("b", "what is rust?");
        let c = InferenceRequest::text("a", "What is Go?");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_deserialize_minimal_request() {
        let json = r#"{
            "agent_id": "planner",
            "prompt": { "type": "text", "user": "hello" },
            "requirements": { "capabilities": ["tool_use"] }
        }"#;
        let req: InferenceRequest = serde_json::from_str(json).unwrap();
        assert!(!req.request_id.is_empty());
        assert_eq!(req.requirements.capabilities, vec![Capability::ToolUse]);
        assert_eq!(req.constraints, Constraints::default());
    }

    #[test]
    fn test_estimate_tokens() {
        let req = InferenceRequest::text("a", "12345678");
        assert_eq!(req.prompt.estimate_tokens(), 2);
        assert_eq!(req.estimate_total_tokens(100), 102);
        assert_eq!(req.with_max_output_tokens(10).estimate_total_tokens(100), 12);
    }
}
