//! Supervised fine-tuning of the interaction scorer.

use anyhow::Result;
use candle_nn::loss::binary_cross_entropy_with_logit;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::info;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::data::{interaction_batches, InteractionBatch, InteractionRecord};
use crate::models::aptatrans::AptaTrans;
use crate::models::checkpoint::{save_bundle, BEST_AUC_TAG};
use crate::training::metrics::{classification_scores, ClassificationScores};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
}

fn default_epochs() -> usize {
    50
}
fn default_batch_size() -> usize {
    16
}
fn default_lr() -> f64 {
    1e-5
}
fn default_weight_decay() -> f64 {
    1e-5
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            lr: default_lr(),
            weight_decay: default_weight_decay(),
        }
    }
}

/// Per-epoch training report.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub test_loss: f64,
    pub scores: ClassificationScores,
    pub checkpointed: bool,
}

/// Drives supervised epochs over labeled pairs and keeps the best held-out
/// ROC-AUC of the current run. Both the best metric and the optimizer are
/// re-initialized at the start of every `train` call.
pub struct Trainer<'a> {
    model: &'a mut AptaTrans,
    config: TrainConfig,
    best_auc: f64,
}

impl<'a> Trainer<'a> {
    pub fn new(model: &'a mut AptaTrans, config: TrainConfig) -> Self {
        Self {
            model,
            config,
            best_auc: 0.0,
        }
    }

    /// Best held-out ROC-AUC of the most recent `train` call.
    pub fn best_auc(&self) -> f64 {
        self.best_auc
    }

    /// Runs the configured number of epochs. The checkpoint bundle is
    /// written only when an epoch's held-out ROC-AUC strictly beats the
    /// best seen earlier in this run; ties never save.
    pub fn train(
        &mut self,
        train_records: &[InteractionRecord],
        test_records: &[InteractionRecord],
    ) -> Result<Vec<EpochReport>> {
        let train_batches = self.batches(train_records)?;
        let test_batches = self.batches(test_records)?;

        // training state belongs to this call alone
        self.best_auc = 0.0;
        let params = ParamsAdamW {
            lr: self.config.lr,
            weight_decay: self.config.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(self.model.scorer_vars(), params)?;

        let mut reports = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            self.model.set_training_mode();
            let mut loss_total = 0f64;
            for batch in &train_batches {
                let logits = self.model.forward_logits(&batch.apta, &batch.prot)?;
                let loss = binary_cross_entropy_with_logit(&logits, &batch.labels)?;
                let value = loss.to_scalar::<f32>()? as f64;
                if !value.is_finite() {
                    anyhow::bail!("Non-finite training loss in epoch {epoch}");
                }
                loss_total += value;
                optimizer.backward_step(&loss)?;
            }
            let train_loss = loss_total / train_batches.len().max(1) as f64;

            let (test_loss, scores) = self.evaluate(&test_batches)?;
            let checkpointed = scores.roc_auc > self.best_auc;
            if checkpointed {
                self.best_auc = scores.roc_auc;
                // a failed write must not abort the run
                if let Err(e) = save_bundle(self.model, BEST_AUC_TAG) {
                    log::error!("Failed to write checkpoint bundle: {e:#}");
                }
            }
            info!(
                "Epoch {epoch}: train_loss={train_loss:.5} test_loss={test_loss:.5} \
                 acc={:.4} roc_auc={:.4} pr_auc={:.4} mcc={:.4} f1={:.4}{}",
                scores.accuracy,
                scores.roc_auc,
                scores.pr_auc,
                scores.mcc,
                scores.f1,
                if checkpointed { " [checkpoint]" } else { "" }
            );
            reports.push(EpochReport {
                epoch,
                train_loss,
                test_loss,
                scores,
                checkpointed,
            });
        }
        Ok(reports)
    }

    /// One evaluation pass: mean batch loss and the epoch scores.
    pub fn evaluate(&mut self, batches: &[InteractionBatch]) -> Result<(f64, ClassificationScores)> {
        self.model.set_evaluation_mode();
        let mut loss_total = 0f64;
        let mut all_probs: Vec<f32> = Vec::new();
        let mut all_labels: Vec<f32> = Vec::new();
        for batch in batches {
            let logits = self.model.forward_logits(&batch.apta, &batch.prot)?;
            let loss = binary_cross_entropy_with_logit(&logits, &batch.labels)?;
            loss_total += loss.to_scalar::<f32>()? as f64;
            all_probs.extend(candle_nn::ops::sigmoid(&logits)?.to_vec1::<f32>()?);
            all_labels.extend(batch.labels.to_vec1::<f32>()?);
        }
        let scores = classification_scores(&Array1::from(all_probs), &Array1::from(all_labels))?;
        Ok((loss_total / batches.len().max(1) as f64, scores))
    }

    fn batches(&self, records: &[InteractionRecord]) -> Result<Vec<InteractionBatch>> {
        interaction_batches(
            records,
            &self.model.vocabs,
            self.model.config.apta_max_len,
            self.model.config.prot_max_len,
            self.config.batch_size,
            self.model.device(),
        )
    }
}
