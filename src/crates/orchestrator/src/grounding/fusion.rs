//! Fusion of task results into a grounded answer.
//!
//! Pure over its inputs: the same results and evidence always fuse to the
//! same answer.

use crate::executor::TaskResult;
use capability::CapabilityKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "his", "how", "its", "may", "new", "now", "see", "who",
    "did", "get", "him", "let", "she", "too", "use", "that", "this", "with", "from", "they",
    "will", "would", "there", "their", "what", "when", "which", "were", "been", "into", "than",
    "then", "them", "these", "those", "also", "about", "some", "such", "only", "other",
];

/// One piece of supporting material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    /// Results key of the task that produced this evidence
    pub result_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub snippet: String,
    /// False when `result_key` does not name an existing result
    #[serde(default)]
    pub grounded: bool,
}

impl EvidenceItem {
    pub fn new(id: impl Into<String>, result_key: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result_key: result_key.into(),
            title: None,
            snippet: snippet.into(),
            grounded: false,
        }
    }
}

/// Sentence-level slice of the answer with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub task_id: String,
    /// Ids of the evidence items supporting this segment
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Final answer with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundedAnswer {
    pub text: String,
    pub segments: Vec<Segment>,
    /// Tasks whose output forms the text, in plan order
    pub contributors: Vec<String>,
    pub evidence: Vec<EvidenceItem>,
    /// Some planned tasks produced no result
    pub partial: bool,
}

impl GroundedAnswer {
    /// Evidence items actually cited by a segment.
    pub fn cited(&self) -> Vec<&EvidenceItem> {
        let cited: BTreeSet<&str> = self
            .segments
            .iter()
            .flat_map(|s| s.evidence.iter().map(String::as_str))
            .collect();
        self.evidence
            .iter()
            .filter(|e| cited.contains(e.id.as_str()))
            .collect()
    }
}

/// Evidence carried by grounding results, keyed back to their results entry.
///
/// A grounding result without structured sources contributes its text as a
/// single item.
pub fn evidence_from_results(results: &BTreeMap<String, TaskResult>) -> Vec<EvidenceItem> {
    let mut evidence = Vec::new();
    for (key, result) in results {
        if result.capability != CapabilityKind::Grounding {
            continue;
        }
        if result.output.sources.is_empty() {
            if !result.output.content.trim().is_empty() {
                evidence.push(EvidenceItem::new(
                    format!("{}:0", key),
                    key.clone(),
                    result.output.content.clone(),
                ));
            }
            continue;
        }
        for source in &result.output.sources {
            let mut item = EvidenceItem::new(source.id.clone(), key.clone(), source.snippet.clone());
            item.title = source.title.clone();
            evidence.push(item);
        }
    }
    evidence
}

/// Fuses results and evidence.
#[derive(Debug, Clone)]
pub struct Fuser {
    min_overlap: usize,
}

impl Default for Fuser {
    fn default() -> Self {
        Self { min_overlap: 2 }
    }
}

impl Fuser {
    pub fn new(min_overlap: usize) -> Self {
        Self {
            min_overlap: min_overlap.max(1),
        }
    }

    /// Fuse the results of the tasks in `order` (plan order).
    ///
    /// Returns `None` when none of them produced a result.
    pub fn fuse(
        &self,
        order: &[String],
        results: &BTreeMap<String, TaskResult>,
        evidence: Vec<EvidenceItem>,
    ) -> Option<GroundedAnswer> {
        let usable: Vec<&TaskResult> = order.iter().filter_map(|id| results.get(id)).collect();
        if usable.is_empty() {
            return None;
        }

        let mut contributors: Vec<&TaskResult> = usable
            .iter()
            .copied()
            .filter(|r| r.capability != CapabilityKind::Grounding)
            .collect();
        if contributors.is_empty() {
            contributors = usable;
        }

        let evidence: Vec<EvidenceItem> = evidence
            .into_iter()
            .map(|mut item| {
                item.grounded = results.contains_key(&item.result_key);
                item
            })
            .collect();
        let evidence_terms: Vec<(&EvidenceItem, BTreeSet<String>)> = evidence
            .iter()
            .filter(|e| e.grounded)
            .map(|e| (e, terms(&e.snippet)))
            .collect();

        let text = if contributors.len() == 1 {
            contributors[0].output.content.clone()
        } else {
            contributors
                .iter()
                .map(|r| r.output.content.trim())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let mut segments = Vec::new();
        for result in &contributors {
            for sentence in split_sentences(&result.output.content) {
                let sentence_terms = terms(sentence);
                let supporting = evidence_terms
                    .iter()
                    .filter(|(_, t)| t.intersection(&sentence_terms).count() >= self.min_overlap)
                    .map(|(e, _)| e.id.clone())
                    .collect();
                segments.push(Segment {
                    text: sentence.to_string(),
                    task_id: result.task_id.clone(),
                    evidence: supporting,
                });
            }
        }

        Some(GroundedAnswer {
            text,
            segments,
            contributors: contributors.iter().map(|r| r.task_id.clone()).collect(),
            evidence,
            partial: order.iter().any(|id| !results.contains_key(id)),
        })
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}
