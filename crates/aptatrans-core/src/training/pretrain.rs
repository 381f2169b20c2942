//! Masked-token and secondary-structure pretraining of one encoder family.
//!
//! Each batch carries a masked view, its reconstruction targets and the
//! per-position structure labels. The joint objective weights reconstruction
//! at twice the structure term. Batches whose loss comes out non-finite are
//! reported and skipped without an optimizer step.

use anyhow::Result;
use candle_core::Tensor;
use candle_nn::loss::cross_entropy;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::data::{masked_batches, MaskedBatch, PretrainRecord};
use crate::models::aptatrans::{AptaTrans, EncoderFamily};
use crate::models::checkpoint::save_pretrained_encoder;
use crate::utils::get_tensor_stats;

/// Reconstruction counts double against the structure term.
const MLM_WEIGHT: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PretrainConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default = "default_mask_rate")]
    pub mask_rate: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_epochs() -> usize {
    10
}
fn default_batch_size() -> usize {
    32
}
fn default_lr() -> f64 {
    1e-4
}
fn default_weight_decay() -> f64 {
    1e-5
}
fn default_mask_rate() -> f64 {
    0.15
}
fn default_seed() -> u64 {
    42
}

impl Default for PretrainConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            lr: default_lr(),
            weight_decay: default_weight_decay(),
            mask_rate: default_mask_rate(),
            seed: default_seed(),
        }
    }
}

/// Per-epoch pretraining report.
#[derive(Debug, Clone)]
pub struct PretrainEpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub test_loss: f64,
    pub skipped_batches: usize,
    pub checkpointed: bool,
}

/// Steps the optimizer only when the loss is finite. Returns whether the
/// step was taken, so callers can skip and report poisoned batches.
pub fn step_if_finite(optimizer: &mut AdamW, loss: &Tensor) -> Result<bool> {
    let value = loss.to_scalar::<f32>()?;
    if !value.is_finite() {
        return Ok(false);
    }
    optimizer.backward_step(loss)?;
    Ok(true)
}

/// Cross-entropy over the positions whose target class is non-zero.
/// Padding and unmasked positions carry target 0 and are excluded.
fn masked_cross_entropy(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let (b, l, v) = logits.dims3()?;
    let logits = logits.reshape((b * l, v))?;
    let targets = targets.reshape(b * l)?;
    let target_ids: Vec<u32> = targets.to_vec1()?;
    let keep: Vec<u32> = target_ids
        .iter()
        .enumerate()
        .filter(|(_, &t)| t != 0)
        .map(|(i, _)| i as u32)
        .collect();
    if keep.is_empty() {
        return Ok(Tensor::zeros((), candle_core::DType::F32, logits.device())?);
    }
    let n_keep = keep.len();
    let idx = Tensor::from_vec(keep, (n_keep,), logits.device())?;
    let logits = logits.index_select(&idx, 0)?;
    let targets = targets.index_select(&idx, 0)?;
    Ok(cross_entropy(&logits, &targets)?)
}

fn batch_loss(model: &AptaTrans, family: EncoderFamily, batch: &MaskedBatch) -> Result<Tensor> {
    let (mlm_logits, ssp_logits) = model.pretrain_forward(family, &batch.masked, &batch.original)?;
    let mlm = masked_cross_entropy(&mlm_logits, &batch.masked_targets)?;
    let ssp = masked_cross_entropy(&ssp_logits, &batch.struct_labels)?;
    Ok(((mlm * MLM_WEIGHT)? + ssp)?)
}

fn dump_batch_diagnostics(family: EncoderFamily, batch_idx: usize, batch: &MaskedBatch, model: &AptaTrans) {
    error!("Non-finite pretraining loss ({family:?}, batch {batch_idx}); skipping optimizer step");
    if let Ok((mlm_logits, ssp_logits)) =
        model.pretrain_forward(family, &batch.masked, &batch.original)
    {
        if let Ok((mean, min, max)) = get_tensor_stats(&mlm_logits) {
            error!("  reconstruction logits: mean={mean:.4} min={min:.4} max={max:.4}");
        }
        if let Ok((mean, min, max)) = get_tensor_stats(&ssp_logits) {
            error!("  structure logits: mean={mean:.4} min={min:.4} max={max:.4}");
        }
    }
}

/// Pretrains one family's encoder. The held-out loss gates the snapshot: the
/// encoder is written only on a strict improvement.
pub fn pretrain(
    model: &mut AptaTrans,
    family: EncoderFamily,
    train_records: &[PretrainRecord],
    test_records: &[PretrainRecord],
    config: &PretrainConfig,
) -> Result<Vec<PretrainEpochReport>> {
    let (seq_vocab, struct_vocab, max_len) = match family {
        EncoderFamily::Aptamer => (
            &model.vocabs.apta,
            &model.vocabs.apta_struct,
            model.config.apta_max_len,
        ),
        EncoderFamily::Protein => (
            &model.vocabs.prot,
            &model.vocabs.prot_struct,
            model.config.prot_max_len,
        ),
    };
    let seq_vocab = seq_vocab.clone();
    let struct_vocab = struct_vocab.clone();

    let params = ParamsAdamW {
        lr: config.lr,
        weight_decay: config.weight_decay,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(model.pretrain_vars(family), params)?;

    let test_batches = masked_batches(
        test_records,
        &seq_vocab,
        &struct_vocab,
        max_len,
        config.mask_rate,
        config.batch_size,
        config.seed,
        model.device(),
    )?;

    let mut best_test_loss = f64::INFINITY;
    let mut reports = Vec::with_capacity(config.epochs);
    for epoch in 1..=config.epochs {
        // fresh masking every epoch
        let train_batches = masked_batches(
            train_records,
            &seq_vocab,
            &struct_vocab,
            max_len,
            config.mask_rate,
            config.batch_size,
            config.seed.wrapping_add(epoch as u64),
            model.device(),
        )?;

        model.set_training_mode();
        let mut loss_total = 0f64;
        let mut skipped_batches = 0usize;
        for (batch_idx, batch) in train_batches.iter().enumerate() {
            let loss = batch_loss(model, family, batch)?;
            if step_if_finite(&mut optimizer, &loss)? {
                loss_total += loss.to_scalar::<f32>()? as f64;
            } else {
                dump_batch_diagnostics(family, batch_idx, batch, model);
                skipped_batches += 1;
            }
        }
        let train_loss = loss_total / train_batches.len().max(1) as f64;

        model.set_evaluation_mode();
        let mut test_total = 0f64;
        for batch in &test_batches {
            test_total += batch_loss(model, family, batch)?.to_scalar::<f32>()? as f64;
        }
        let test_loss = test_total / test_batches.len().max(1) as f64;

        let checkpointed = test_loss < best_test_loss;
        if checkpointed {
            best_test_loss = test_loss;
            if let Err(e) = save_pretrained_encoder(model, family) {
                error!("Failed to write encoder snapshot: {e:#}");
            }
        }
        info!(
            "Pretrain epoch {epoch} ({family:?}): train_loss={train_loss:.5} \
             test_loss={test_loss:.5} skipped={skipped_batches}{}",
            if checkpointed { " [checkpoint]" } else { "" }
        );
        reports.push(PretrainEpochReport {
            epoch,
            train_loss,
            test_loss,
            skipped_batches,
            checkpointed,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn masked_cross_entropy_ignores_zero_targets() -> Result<()> {
        let device = Device::Cpu;
        // two positions, one with a real target
        let logits = Tensor::from_vec(
            vec![5.0f32, -5.0, -5.0, 0.0, 0.0, 0.0],
            (1, 2, 3),
            &device,
        )?;
        let all_pad = Tensor::zeros((1, 2), DType::U32, &device)?;
        let zero = masked_cross_entropy(&logits, &all_pad)?;
        assert_eq!(zero.to_scalar::<f32>()?, 0.0);

        let targets = Tensor::from_vec(vec![0u32, 2], (1, 2), &device)?;
        let loss = masked_cross_entropy(&logits, &targets)?;
        // uniform logits over 3 classes at the kept position
        assert!((loss.to_scalar::<f32>()? - 3f32.ln()).abs() < 1e-5);
        Ok(())
    }
}
