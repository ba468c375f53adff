//! Request and response types shared by every capability client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The closed set of backend kinds a task can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Language model completion
    Llm,
    /// External specialized agent
    Agent,
    /// Callable tool
    Tool,
    /// Retrieval / grounding source
    Grounding,
}

impl CapabilityKind {
    /// All kinds, in a stable order.
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::Llm,
        CapabilityKind::Agent,
        CapabilityKind::Tool,
        CapabilityKind::Grounding,
    ];

    /// Lowercase label used in config files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Llm => "llm",
            CapabilityKind::Agent => "agent",
            CapabilityKind::Tool => "tool",
            CapabilityKind::Grounding => "grounding",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llm" | "model" => Ok(CapabilityKind::Llm),
            "agent" => Ok(CapabilityKind::Agent),
            "tool" => Ok(CapabilityKind::Tool),
            "grounding" | "retrieval" => Ok(CapabilityKind::Grounding),
            other => Err(format!("unknown capability kind '{}'", other)),
        }
    }
}

/// A single capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Which kind of backend to call
    pub kind: CapabilityKind,
    /// Named client within the kind (None = the kind's default client)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Prompt, query, or instruction for the backend
    pub prompt: String,
    /// Structured context (history, dependency outputs, caller metadata)
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl CapabilityRequest {
    /// Create a request for the default client of `kind`.
    pub fn new(kind: CapabilityKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            target: None,
            prompt: prompt.into(),
            context: Map::new(),
        }
    }

    /// Route the request to a named client.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Add a context value.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Human-readable label, e.g. `tool:calculator`.
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => format!("{}:{}", self.kind, target),
            None => self.kind.to_string(),
        }
    }
}

/// A retrieved source attached to a capability output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Stable source identifier (document id, URL, ...)
    pub id: String,
    /// Optional title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Relevant excerpt
    #[serde(default)]
    pub snippet: String,
}

impl SourceRef {
    pub fn new(id: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            snippet: snippet.into(),
        }
    }
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Successful capability result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    /// Primary textual content
    pub content: String,
    /// Optional structured payload (tool results, agent artifacts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Sources backing the content (grounding results)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    /// Usage metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl CapabilityOutput {
    /// Create a plain text output.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
            sources: Vec::new(),
            usage: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a source.
    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.sources.push(source);
        self
    }

    /// Attach usage metadata.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse_and_display() {
        assert_eq!("LLM".parse::<CapabilityKind>().unwrap(), CapabilityKind::Llm);
        assert_eq!(
            "retrieval".parse::<CapabilityKind>().unwrap(),
            CapabilityKind::Grounding
        );
        assert!("database".parse::<CapabilityKind>().is_err());
        assert_eq!(CapabilityKind::Agent.to_string(), "agent");
    }

    #[test]
    fn test_request_builder() {
        let req = CapabilityRequest::new(CapabilityKind::Tool, "2 + 2")
            .with_target("calculator")
            .with_context("precision", json!(2));

        assert_eq!(req.label(), "tool:calculator");
        assert_eq!(req.context.get("precision"), Some(&json!(2)));
    }

    #[test]
    fn test_output_serialization_skips_empty() {
        let out = CapabilityOutput::text("hello");
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value, json!({ "content": "hello" }));
    }
}
