use anyhow::{Context, Result};
use log::warn;
use std::path::Path;

use aptatrans_core::explain::{explain, SaliencyView};
use aptatrans_core::models::checkpoint::{load_bundle, BEST_AUC_TAG};

use crate::config::{build_model, AppConfig};

/// Computes pair saliency and writes it as JSON to `output` or stdout.
pub fn run_explain(
    config: &AppConfig,
    aptamer: &str,
    protein: &str,
    view: &str,
    top_k: usize,
    output: Option<&Path>,
) -> Result<()> {
    let mut model = build_model(config)?;
    if !load_bundle(&mut model, BEST_AUC_TAG)? {
        warn!("Explaining with an untrained model");
    }
    model.set_evaluation_mode();

    let saliency = explain(&model, aptamer, protein, SaliencyView::parse(view), top_k)?;
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file {path:?}"))?;
            serde_json::to_writer_pretty(file, &saliency)?;
        }
        None => println!("{}", serde_json::to_string_pretty(&saliency)?),
    }
    Ok(())
}
