pub mod mcts;

use anyhow::Result;
use candle_core::Tensor;

use crate::models::aptatrans::AptaTrans;

/// Scores one candidate aptamer sequence against an already-tokenized
/// target protein. The search loop only sees this seam, so tests can drive
/// it with a stub and the recommendation path with the full model.
pub trait CandidateEvaluator {
    fn score(&self, aptamer: &str, prot_tokens: &Tensor) -> Result<f32>;
}

/// The production evaluator: tokenize the candidate and run the scorer.
pub struct ModelEvaluator<'a> {
    model: &'a AptaTrans,
}

impl<'a> ModelEvaluator<'a> {
    pub fn new(model: &'a AptaTrans) -> Self {
        Self { model }
    }
}

impl CandidateEvaluator for ModelEvaluator<'_> {
    fn score(&self, aptamer: &str, prot_tokens: &Tensor) -> Result<f32> {
        let apta_tokens = self.model.tokenize_apta(aptamer)?;
        let probs = self.model.predict(&apta_tokens, prot_tokens)?;
        Ok(probs.to_vec1::<f32>()?[0])
    }
}
