//! Extraction of JSON payloads from model output
//!
//! Models wrap structured answers in prose or fenced code blocks. The helpers
//! here locate the JSON document so the classifier and the capability planner
//! can parse it.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Locate a JSON object in free-form model output.
///
/// Checks, in order: a ```` ```json ```` fenced block (either case), a plain
/// ```` ``` ```` fenced block starting with `{`, and finally the outermost
/// `{ ... }` span.
pub fn extract_json(text: &str) -> Option<&str> {
    for fence in ["```json", "```JSON"] {
        if let Some(start) = text.find(fence) {
            let content = &text[start + fence.len()..];
            if let Some(end) = content.find("```") {
                return Some(content[..end].trim());
            }
        }
    }

    if let Some(start) = text.find("```") {
        let content = &text[start + 3..];
        if let Some(end) = content.find("```") {
            let block = content[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(text[start..=end].trim())
    } else {
        None
    }
}

/// Extract and parse a JSON value.
pub fn parse_json_value(text: &str) -> Option<Value> {
    extract_json(text).and_then(|json| serde_json::from_str(json).ok())
}

/// Extract and deserialize a JSON document into `T`.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    extract_json(text).and_then(|json| serde_json::from_str(json).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_raw_object() {
        let text = r#"{"profile": "direct_llm"}"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn test_extract_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nAnything else?";
        assert_eq!(extract_json(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_untagged_fence() {
        let text = "```\n{\"a\": 2}\n```";
        assert_eq!(parse_json_value(text), Some(json!({"a": 2})));
    }

    #[test]
    fn test_extract_embedded_in_prose() {
        let text = "Sure. {\"tasks\": []} Hope that helps.";
        assert_eq!(parse_json_value(text), Some(json!({"tasks": []})));
    }

    #[test]
    fn test_no_json() {
        assert_eq!(extract_json("no braces here"), None);
        assert_eq!(extract_json("} backwards {"), None);
        assert!(parse_json_value("{not json}").is_none());
    }
}
