mod common;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};

use aptatrans_core::recommend::{recommend, recommend_with, RecommendConfig};
use aptatrans_core::search::CandidateEvaluator;

/// Deterministic stub: rewards adenine-rich candidates.
struct ARichEvaluator;

impl CandidateEvaluator for ARichEvaluator {
    fn score(&self, aptamer: &str, _prot_tokens: &Tensor) -> Result<f32> {
        let a = aptamer.chars().filter(|&c| c == 'A').count() as f32;
        Ok(a / aptamer.len().max(1) as f32)
    }
}

fn dummy_target() -> Tensor {
    Tensor::zeros((1, 8), DType::U32, &Device::Cpu).unwrap()
}

fn stub_config() -> RecommendConfig {
    RecommendConfig {
        n_aptamers: 3,
        depth: 6,
        iterations: 15,
        states: 3,
        seed: 5,
    }
}

#[test]
fn yields_exactly_n_full_length_candidates() -> Result<()> {
    let target = dummy_target();
    let candidates = recommend_with(&ARichEvaluator, &target, "TARGET", &stub_config())?;

    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    for candidate in candidates.values() {
        assert_eq!(candidate.sequence.len(), 6);
        assert!(candidate.sequence.chars().all(|c| "ACGU".contains(c)));
        assert!(candidate.score.is_finite());
    }
    Ok(())
}

#[test]
fn reported_scores_match_an_independent_rescore() -> Result<()> {
    let target = dummy_target();
    let candidates = recommend_with(&ARichEvaluator, &target, "TARGET", &stub_config())?;
    for candidate in candidates.values() {
        let audited = ARichEvaluator.score(&candidate.sequence, &target)?;
        assert_eq!(candidate.score, audited);
    }
    Ok(())
}

#[test]
fn degenerate_configs_are_rejected() {
    let target = dummy_target();
    let no_candidates = RecommendConfig {
        n_aptamers: 0,
        ..stub_config()
    };
    assert!(recommend_with(&ARichEvaluator, &target, "TARGET", &no_candidates).is_err());

    let no_depth = RecommendConfig {
        depth: 0,
        ..stub_config()
    };
    assert!(recommend_with(&ARichEvaluator, &target, "TARGET", &no_depth).is_err());
}

#[test]
fn full_model_recommendation_without_a_checkpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut model = common::tiny_model(dir.path());

    let config = RecommendConfig {
        n_aptamers: 2,
        depth: 4,
        iterations: 4,
        states: 2,
        seed: 11,
    };
    let candidates = recommend(&mut model, "MKVLAAGIV", &config)?;
    assert_eq!(candidates.len(), 2);
    for candidate in candidates.values() {
        assert_eq!(candidate.sequence.len(), 4);
        assert!((0.0..=1.0).contains(&candidate.score));
    }
    Ok(())
}
