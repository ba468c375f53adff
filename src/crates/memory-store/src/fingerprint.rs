//! Cache keys derived from requests.
//!
//! Two flavours are provided:
//!
//! - **exact** - SHA-256 over the raw parts; any byte difference is a miss
//! - **normalized** - case, punctuation and whitespace are folded before
//!   hashing, so trivially rephrased prompts share an entry

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Exact fingerprint of the given parts.
    ///
    /// Parts are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn exact<S: AsRef<str>>(parts: &[S]) -> Self {
        Self(format!("x:{}", digest(parts)))
    }

    /// Normalized fingerprint of `text` within a scope (kind, target, ...).
    pub fn normalized<S: AsRef<str>>(scope: &[S], text: &str) -> Self {
        let mut parts: Vec<String> = scope.iter().map(|s| s.as_ref().to_string()).collect();
        parts.push(normalize(text));
        Self(format!("n:{}", digest(&parts)))
    }

    /// Key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_is_stable_and_prefixed() {
        let a = Fingerprint::exact(&["llm", "what is rust"]);
        let b = Fingerprint::exact(&["llm", "what is rust"]);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("x:"));
        assert_eq!(a.as_str().len(), 2 + 64);
    }

    #[test]
    fn test_exact_parts_are_unambiguous() {
        assert_ne!(Fingerprint::exact(&["ab", "c"]), Fingerprint::exact(&["a", "bc"]));
    }

    #[test]
    fn test_normalized_folds_trivial_differences() {
        let a = Fingerprint::normalized(&["llm"], "What is   Rust?");
        let b = Fingerprint::normalized(&["llm"], "what is rust");
        let c = Fingerprint::normalized(&["tool"], "what is rust");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, Fingerprint::exact(&["llm", "what is rust"]));
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(text in ".{0,64}") {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once);
        }
    }
}
