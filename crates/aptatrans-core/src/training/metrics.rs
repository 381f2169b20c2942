//! Binary classification metrics over one evaluation pass.

use anyhow::Result;
use ndarray::Array1;

/// Threshold for turning probabilities into hard predictions.
const DECISION_THRESHOLD: f32 = 0.5;

/// The held-out scores reported after every epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationScores {
    pub accuracy: f64,
    pub roc_auc: f64,
    pub pr_auc: f64,
    pub mcc: f64,
    pub f1: f64,
}

/// Computes all epoch scores from predicted probabilities and binary labels.
///
/// ROC-AUC uses the rank statistic with average ranks for tied scores;
/// PR-AUC is the average precision over the descending-score sweep. When one
/// class is absent the ranking metrics fall back to 0.5 (ROC) and the
/// positive rate (PR).
pub fn classification_scores(
    probs: &Array1<f32>,
    labels: &Array1<f32>,
) -> Result<ClassificationScores> {
    if probs.len() != labels.len() {
        anyhow::bail!(
            "Score/label length mismatch: {} vs {}",
            probs.len(),
            labels.len()
        );
    }
    if probs.is_empty() {
        anyhow::bail!("Cannot score an empty evaluation set");
    }

    let n = probs.len();
    let positives: Vec<bool> = labels.iter().map(|&y| y > 0.5).collect();
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = n - n_pos;

    let mut tp = 0usize;
    let mut tn = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (&p, &pos) in probs.iter().zip(&positives) {
        match (p >= DECISION_THRESHOLD, pos) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }

    let accuracy = (tp + tn) as f64 / n as f64;
    let roc_auc = rank_roc_auc(probs, &positives, n_pos, n_neg);
    let pr_auc = average_precision(probs, &positives, n_pos);
    let f1 = if 2 * tp + fp + fn_ == 0 {
        0.0
    } else {
        2.0 * tp as f64 / (2 * tp + fp + fn_) as f64
    };
    let mcc_denom =
        ((tp + fp) as f64 * (tp + fn_) as f64 * (tn + fp) as f64 * (tn + fn_) as f64).sqrt();
    let mcc = if mcc_denom == 0.0 {
        0.0
    } else {
        (tp as f64 * tn as f64 - fp as f64 * fn_ as f64) / mcc_denom
    };

    Ok(ClassificationScores {
        accuracy,
        roc_auc,
        pr_auc,
        mcc,
        f1,
    })
}

fn rank_roc_auc(probs: &Array1<f32>, positives: &[bool], n_pos: usize, n_neg: usize) -> f64 {
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[a].partial_cmp(&probs[b]).unwrap_or(std::cmp::Ordering::Equal));

    // average ranks across tied scores
    let mut ranks = vec![0f64; probs.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probs[order[j + 1]] == probs[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = positives
        .iter()
        .zip(&ranks)
        .filter(|(&pos, _)| pos)
        .map(|(_, &r)| r)
        .sum();
    (pos_rank_sum - n_pos as f64 * (n_pos as f64 + 1.0) / 2.0) / (n_pos as f64 * n_neg as f64)
}

fn average_precision(probs: &Array1<f32>, positives: &[bool], n_pos: usize) -> f64 {
    if n_pos == 0 {
        return 0.0;
    }
    if n_pos == positives.len() {
        return 1.0;
    }
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut tp = 0usize;
    let mut ap = 0.0;
    for (seen, &idx) in order.iter().enumerate() {
        if positives[idx] {
            tp += 1;
            ap += tp as f64 / (seen + 1) as f64;
        }
    }
    ap / n_pos as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn perfect_separation() {
        let probs = array![0.9f32, 0.8, 0.3, 0.2];
        let labels = array![1f32, 1.0, 0.0, 0.0];
        let s = classification_scores(&probs, &labels).unwrap();
        assert_eq!(s.accuracy, 1.0);
        assert_eq!(s.roc_auc, 1.0);
        assert_eq!(s.pr_auc, 1.0);
        assert_eq!(s.mcc, 1.0);
        assert_eq!(s.f1, 1.0);
    }

    #[test]
    fn one_swapped_pair() {
        // positives score 0.9 and 0.4; negatives 0.6 and 0.2
        let probs = array![0.9f32, 0.4, 0.6, 0.2];
        let labels = array![1f32, 1.0, 0.0, 0.0];
        let s = classification_scores(&probs, &labels).unwrap();
        assert_eq!(s.accuracy, 0.5);
        assert!((s.roc_auc - 0.75).abs() < 1e-12);
        assert!((s.pr_auc - 5.0 / 6.0).abs() < 1e-12);
        assert_eq!(s.mcc, 0.0);
        assert_eq!(s.f1, 0.5);
    }

    #[test]
    fn tied_scores_get_average_ranks() {
        // one positive and one negative share a score: half a concordant pair
        let probs = array![0.7f32, 0.7, 0.1];
        let labels = array![1f32, 0.0, 0.0];
        let s = classification_scores(&probs, &labels).unwrap();
        assert!((s.roc_auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn single_class_falls_back() {
        let probs = array![0.9f32, 0.1];
        let labels = array![1f32, 1.0];
        let s = classification_scores(&probs, &labels).unwrap();
        assert_eq!(s.roc_auc, 0.5);
        assert_eq!(s.pr_auc, 1.0);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let probs = array![0.9f32];
        let labels = array![1f32, 0.0];
        assert!(classification_scores(&probs, &labels).is_err());
    }
}
