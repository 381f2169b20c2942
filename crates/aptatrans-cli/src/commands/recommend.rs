use anyhow::{Context, Result};
use std::path::Path;

use aptatrans_core::recommend::recommend;

use crate::config::{build_model, AppConfig};

/// Recommends candidate aptamers for a target protein sequence.
pub fn run_recommend(config: &AppConfig, target: &str, output: Option<&Path>) -> Result<()> {
    let mut model = build_model(config)?;
    let candidates = recommend(&mut model, target, &config.recommend)?;

    println!("rank\tsequence\tscore");
    for (rank, candidate) in &candidates {
        println!("{rank}\t{}\t{:.4}", candidate.sequence, candidate.score);
    }
    if let Some(path) = output {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create output file {path:?}"))?;
        serde_json::to_writer_pretty(file, &candidates)?;
    }
    Ok(())
}
