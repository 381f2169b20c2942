//! Candidate aptamer recommendation for a single target protein.

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use candle_core::Tensor;

use crate::models::aptatrans::AptaTrans;
use crate::models::checkpoint::{load_bundle, BEST_AUC_TAG};
use crate::search::mcts::Mcts;
use crate::search::{CandidateEvaluator, ModelEvaluator};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendConfig {
    #[serde(default = "default_n_aptamers")]
    pub n_aptamers: usize,
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_states")]
    pub states: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_aptamers() -> usize {
    5
}
fn default_depth() -> usize {
    20
}
fn default_iterations() -> usize {
    1000
}
fn default_states() -> usize {
    8
}
fn default_seed() -> u64 {
    42
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            n_aptamers: default_n_aptamers(),
            depth: default_depth(),
            iterations: default_iterations(),
            states: default_states(),
            seed: default_seed(),
        }
    }
}

/// One recommended aptamer with its audited interaction score.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub sequence: String,
    pub score: f32,
}

/// Runs the search loop against an evaluator and an already-tokenized
/// target. Always yields exactly `n_aptamers` entries, keyed by rank order
/// of generation. Every candidate is re-scored independently of the search's
/// own rollout bookkeeping, and the tree is reset between candidates.
pub fn recommend_with(
    evaluator: &dyn CandidateEvaluator,
    target_tokens: &Tensor,
    target_protein: &str,
    config: &RecommendConfig,
) -> Result<BTreeMap<usize, Candidate>> {
    if config.n_aptamers == 0 {
        anyhow::bail!("n_aptamers must be at least 1");
    }
    if config.depth == 0 {
        anyhow::bail!("Candidate depth must be at least 1");
    }

    let mut mcts = Mcts::new(
        target_tokens.clone(),
        target_protein,
        config.depth,
        config.iterations,
        config.states,
        config.seed,
    );

    let mut candidates = BTreeMap::new();
    for rank in 0..config.n_aptamers {
        mcts.reset();
        let sequence = mcts.make_candidate(evaluator)?;
        // audit score, independent of the search's internal estimate
        let score = evaluator.score(&sequence, target_tokens)?;
        info!("Candidate {rank}: {sequence} (score {score:.4})");
        candidates.insert(rank, Candidate { sequence, score });
    }
    Ok(candidates)
}

/// Loads the best checkpoint bundle if one exists and recommends
/// `n_aptamers` candidate aptamers for the target protein.
pub fn recommend(
    model: &mut AptaTrans,
    target_protein: &str,
    config: &RecommendConfig,
) -> Result<BTreeMap<usize, Candidate>> {
    if !load_bundle(model, BEST_AUC_TAG)? {
        warn!("Recommending with an untrained scorer");
    }
    model.set_evaluation_mode();
    let target_tokens = model.tokenize_prot(target_protein)?;
    let evaluator = ModelEvaluator::new(model);
    recommend_with(&evaluator, &target_tokens, target_protein, config)
}
