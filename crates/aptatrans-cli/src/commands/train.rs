use anyhow::Result;
use log::info;
use std::path::Path;

use aptatrans_core::data::{load_interactions, train_test_split};
use aptatrans_core::models::checkpoint::load_pretrained_encoders;
use aptatrans_core::training::train::Trainer;

use crate::config::{build_model, AppConfig};

/// Fine-tunes the interaction scorer on a labeled pair table.
pub fn run_train(config: &AppConfig, data: &Path) -> Result<()> {
    let records = load_interactions(data)?;
    info!("Loaded {} labeled pairs from {data:?}", records.len());
    let (train_records, test_records) =
        train_test_split(&records, config.test_fraction, config.seed);

    let mut model = build_model(config)?;
    // warm start from whatever pretrained snapshots exist
    load_pretrained_encoders(&mut model)?;

    let mut trainer = Trainer::new(&mut model, config.train.clone());
    let reports = trainer.train(&train_records, &test_records)?;
    if let Some(last) = reports.last() {
        info!(
            "Finished {} epochs; best held-out ROC-AUC {:.4}",
            last.epoch,
            trainer.best_auc()
        );
    }
    Ok(())
}
