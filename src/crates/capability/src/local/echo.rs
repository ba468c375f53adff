//! Deterministic offline client.
//!
//! Answers every request by echoing the prompt, tagged with the client name.
//! Grounding clients also return the prompt as a single source so the fusion
//! stage has evidence to attach.

use crate::client::CapabilityClient;
use crate::error::Result;
use crate::types::{CapabilityKind, CapabilityOutput, CapabilityRequest, SourceRef};
use async_trait::async_trait;
use std::time::Duration;

/// Offline client that echoes its input.
#[derive(Debug, Clone)]
pub struct EchoClient {
    name: String,
    kind: CapabilityKind,
}

impl EchoClient {
    pub fn new(name: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[async_trait]
impl CapabilityClient for EchoClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
        _timeout: Duration,
    ) -> Result<CapabilityOutput> {
        let content = format!("[{}] {}", self.name, request.prompt);
        let output = match self.kind {
            CapabilityKind::Grounding => CapabilityOutput::text(content)
                .with_source(SourceRef::new(format!("{}:0", self.name), request.prompt.clone())),
            _ => CapabilityOutput::text(content),
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_tags_prompt() {
        let client = EchoClient::new("offline", CapabilityKind::Llm);
        let request = CapabilityRequest::new(CapabilityKind::Llm, "hello");
        let output = client.invoke(&request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(output.content, "[offline] hello");
        assert!(output.sources.is_empty());
    }

    #[tokio::test]
    async fn test_echo_grounding_returns_source() {
        let client = EchoClient::new("kb", CapabilityKind::Grounding);
        let request = CapabilityRequest::new(CapabilityKind::Grounding, "rust ownership");
        let output = client.invoke(&request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(output.sources.len(), 1);
        assert_eq!(output.sources[0].id, "kb:0");
        assert_eq!(output.sources[0].snippet, "rust ownership");
    }
}
