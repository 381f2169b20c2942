use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;

use aptatrans_core::data::{load_pretrain_sequences, train_test_split};
use aptatrans_core::models::aptatrans::EncoderFamily;
use aptatrans_core::training::pretrain::pretrain;

use crate::config::{build_model, AppConfig};

pub fn parse_family(name: &str) -> Result<EncoderFamily> {
    match name.to_ascii_lowercase().as_str() {
        "apta" | "aptamer" | "rna" => Ok(EncoderFamily::Aptamer),
        "prot" | "protein" => Ok(EncoderFamily::Protein),
        other => Err(anyhow!("Unknown encoder family: {other}")),
    }
}

/// Pretrains one family's encoder on a sequence/structure table.
pub fn run_pretrain(config: &AppConfig, family: EncoderFamily, data: &Path) -> Result<()> {
    // a raw sequence of n residues yields n-2 tokens
    let max_raw_len = match family {
        EncoderFamily::Aptamer => config.model.apta_max_len + 2,
        EncoderFamily::Protein => config.model.prot_max_len + 2,
    };
    let records = load_pretrain_sequences(data, max_raw_len)?;
    info!(
        "Loaded {} sequences from {data:?} for {family:?} pretraining",
        records.len()
    );
    let (train_records, test_records) =
        train_test_split(&records, config.test_fraction, config.seed);

    let mut model = build_model(config)?;
    let reports = pretrain(
        &mut model,
        family,
        &train_records,
        &test_records,
        &config.pretrain,
    )?;
    if let Some(best) = reports
        .iter()
        .filter(|r| r.checkpointed)
        .map(|r| r.test_loss)
        .fold(None::<f64>, |acc, l| Some(acc.map_or(l, |a| a.min(l))))
    {
        info!("Best held-out pretraining loss: {best:.5}");
    }
    Ok(())
}
