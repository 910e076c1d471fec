mod chain;
mod gate;
mod openai;
mod session;
mod stop_words;

pub use chain::{AnswerModel, Embedder, RetrievalQaChain, RetrievedPassage, build_prompt};
pub use gate::ContentRelevanceGate;
pub use openai::{OpenAiAnswerer, OpenAiEmbedder};
pub use session::{QaEngine, QaOutcome, QaSession};

#[cfg(test)]
pub(crate) use chain::tests::{KeywordEmbedder, RecordingAnswerer, sorting_embedder};

use crate::errors::{PipelineError, Result};

pub const REFUSAL: &str = "I can only answer questions related to the lecture content.";

pub const DEFAULT_THRESHOLD: f64 = 0.04;
pub const MIN_THRESHOLD: f64 = 0.01;
pub const MAX_THRESHOLD: f64 = 0.10;
pub const DEFAULT_FAN_OUT: usize = 3;

/// What the relevance gate does when its model could not be fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateFailurePolicy {
    /// Accept every non-empty question.
    #[default]
    Open,
    Closed,
}

/// Session-scoped QA settings. Any change forces a rebuild of the gate and
/// the chain before the next answer.
#[derive(Debug, Clone, PartialEq)]
pub struct QaChainConfig {
    pub threshold: f64,
    pub safety_instructions: String,
    pub k: usize,
    pub failure_policy: GateFailurePolicy,
}

impl Default for QaChainConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            safety_instructions: String::new(),
            k: DEFAULT_FAN_OUT,
            failure_policy: GateFailurePolicy::Open,
        }
    }
}

impl QaChainConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&self.threshold)
        {
            return Err(PipelineError::invalid_config(format!(
                "threshold must be between {MIN_THRESHOLD} and {MAX_THRESHOLD}, got {}",
                self.threshold
            )));
        }
        if self.k == 0 {
            return Err(PipelineError::invalid_config("k must be at least 1"));
        }
        Ok(())
    }

    pub fn extra_instructions(&self) -> Option<&str> {
        let trimmed = self.safety_instructions.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Cosine similarity of two dense vectors; zero when either is all zeros.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
