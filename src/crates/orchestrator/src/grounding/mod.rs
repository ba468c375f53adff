//! Grounding and fusion
//!
//! Turns the accumulated task results into one [`GroundedAnswer`] that says
//! which task produced each sentence and which evidence supports it.

pub mod fusion;

use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};

pub use fusion::{evidence_from_results, EvidenceItem, Fuser, GroundedAnswer, Segment};

/// Grounding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
    /// Retrieve evidence through the grounding capability before fusion
    pub retrieve_evidence: bool,
    /// Named grounding client (None = the default one)
    pub target: Option<String>,
    /// Shared terms needed before a sentence cites an evidence item
    pub min_overlap: usize,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            retrieve_evidence: true,
            target: None,
            min_overlap: 2,
        }
    }
}

impl GroundingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_overlap == 0 {
            return Err(OrchestratorError::Config(
                "grounding.min_overlap must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn fuser(&self) -> Fuser {
        Fuser::new(self.min_overlap)
    }
}
