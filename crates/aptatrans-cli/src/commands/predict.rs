use anyhow::Result;
use log::warn;

use aptatrans_core::models::checkpoint::{load_bundle, BEST_AUC_TAG};

use crate::config::{build_model, AppConfig};

/// Scores one aptamer/protein pair and prints the probability to stdout.
pub fn run_predict(config: &AppConfig, aptamer: &str, protein: &str) -> Result<f32> {
    let mut model = build_model(config)?;
    if !load_bundle(&mut model, BEST_AUC_TAG)? {
        warn!("Scoring with an untrained model");
    }
    model.set_evaluation_mode();

    let apta_tokens = model.tokenize_apta(aptamer)?;
    let prot_tokens = model.tokenize_prot(protein)?;
    let score = model.predict(&apta_tokens, &prot_tokens)?.to_vec1::<f32>()?[0];
    println!("{score:.6}");
    Ok(score)
}
