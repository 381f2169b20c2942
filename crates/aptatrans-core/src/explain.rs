//! Saliency extraction from the pairwise interaction map.
//!
//! The map for one pair is stripped of padding positions. Scoring one axis
//! applies softmax along that axis (normalizing each line of the orthogonal
//! axis) and sums along the orthogonal axis, giving one saliency score per
//! position. The combined view scores both axes and ranks each
//! independently; the stripped map itself is reported un-normalized.

use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::ops::softmax;
use log::warn;
use serde::Serialize;

use crate::models::aptatrans::AptaTrans;
use crate::vocab::recover_tokens;

/// Which sequence the per-position saliency is reported for. `Combined`
/// scores both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaliencyView {
    Aptamer,
    Protein,
    Combined,
}

impl SaliencyView {
    /// Parses a view name; anything unrecognized falls back to `Combined`.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "aptamer" | "apta" | "rna" => SaliencyView::Aptamer,
            "protein" | "prot" => SaliencyView::Protein,
            "combined" | "both" => SaliencyView::Combined,
            other => {
                warn!("Unknown saliency view '{other}', using combined");
                SaliencyView::Combined
            }
        }
    }

    fn scores_aptamer(&self) -> bool {
        matches!(self, SaliencyView::Aptamer | SaliencyView::Combined)
    }

    fn scores_protein(&self) -> bool {
        matches!(self, SaliencyView::Protein | SaliencyView::Combined)
    }
}

/// One ranked position with its saliency score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TopPosition {
    pub index: usize,
    pub score: f32,
}

/// Saliency for one aptamer/protein pair. The score vectors and top-k lists
/// for an axis are empty when the view does not cover it.
#[derive(Debug, Clone, Serialize)]
pub struct Saliency {
    pub view: SaliencyView,
    /// Stripped map height (aptamer positions kept).
    pub rows: usize,
    /// Stripped map width (protein positions kept).
    pub cols: usize,
    /// The stripped map, row-major, un-normalized.
    pub map: Vec<f32>,
    /// The aptamer 3-mers behind the map rows, in order.
    pub apta_tokens: Vec<String>,
    /// The protein words behind the map columns, in order.
    pub prot_tokens: Vec<String>,
    /// Per-row saliency over the aptamer positions.
    pub apta_scores: Vec<f32>,
    /// Per-column saliency over the protein positions.
    pub prot_scores: Vec<f32>,
    /// The `top_k` highest-scoring aptamer positions, descending by score,
    /// ties broken toward the earlier position.
    pub top_apta_positions: Vec<TopPosition>,
    /// The `top_k` highest-scoring protein positions, ranked the same way,
    /// independently of the aptamer ranking.
    pub top_prot_positions: Vec<TopPosition>,
}

/// Computes the saliency of one pair under the given view.
///
/// The map is computed without dropout, so running this twice on the same
/// inputs gives identical results whatever mode the model is in.
pub fn explain(
    model: &AptaTrans,
    aptamer: &str,
    protein: &str,
    view: SaliencyView,
    top_k: usize,
) -> Result<Saliency> {
    let apta_ids = model.tokenize_apta(aptamer)?;
    let prot_ids = model.tokenize_prot(protein)?;
    let map = model
        .interaction_map(&apta_ids, &prot_ids)?
        .squeeze(0)?
        .squeeze(0)?;

    let apta_vec: Vec<u32> = apta_ids.squeeze(0)?.to_vec1()?;
    let prot_vec: Vec<u32> = prot_ids.squeeze(0)?.to_vec1()?;
    let keep_rows: Vec<usize> = nonzero_positions(&apta_vec);
    let keep_cols: Vec<usize> = nonzero_positions(&prot_vec);
    if keep_rows.is_empty() || keep_cols.is_empty() {
        anyhow::bail!("Cannot explain a pair with an all-padding sequence");
    }

    let stripped = strip(&map, &keep_rows, &keep_cols, model.device())?;
    let (rows, cols) = stripped.dims2()?;

    // softmax across the scored axis puts unit mass in each orthogonal
    // line; summing the orthogonal axis yields one score per position
    let apta_scores: Vec<f32> = if view.scores_aptamer() {
        softmax(&stripped, 0)?.sum(1)?.to_vec1()?
    } else {
        Vec::new()
    };
    let prot_scores: Vec<f32> = if view.scores_protein() {
        softmax(&stripped, 1)?.sum(0)?.to_vec1()?
    } else {
        Vec::new()
    };

    let top_apta_positions = top_k_positions(&apta_scores, top_k);
    let top_prot_positions = top_k_positions(&prot_scores, top_k);
    Ok(Saliency {
        view,
        rows,
        cols,
        map: stripped.flatten_all()?.to_vec1()?,
        apta_tokens: recover_tokens(&apta_vec, &model.vocabs.apta),
        prot_tokens: recover_tokens(&prot_vec, &model.vocabs.prot),
        apta_scores,
        prot_scores,
        top_apta_positions,
        top_prot_positions,
    })
}

fn nonzero_positions(ids: &[u32]) -> Vec<usize> {
    ids.iter()
        .enumerate()
        .filter(|(_, &id)| id != 0)
        .map(|(i, _)| i)
        .collect()
}

fn strip(map: &Tensor, keep_rows: &[usize], keep_cols: &[usize], device: &Device) -> Result<Tensor> {
    let rows = Tensor::from_vec(
        keep_rows.iter().map(|&i| i as u32).collect::<Vec<_>>(),
        (keep_rows.len(),),
        device,
    )?;
    let cols = Tensor::from_vec(
        keep_cols.iter().map(|&i| i as u32).collect::<Vec<_>>(),
        (keep_cols.len(),),
        device,
    )?;
    Ok(map.index_select(&rows, 0)?.index_select(&cols, 1)?)
}

/// The `k` highest scores. Ordered by descending score; equal scores are
/// broken toward the smaller index, so the result is stable across runs.
pub fn top_k_positions(scores: &[f32], k: usize) -> Vec<TopPosition> {
    let mut ranked: Vec<TopPosition> = scores
        .iter()
        .enumerate()
        .map(|(index, &score)| TopPosition { index, score })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });
    ranked.truncate(k.min(scores.len()));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_view_falls_back_to_combined() {
        assert_eq!(SaliencyView::parse("apta"), SaliencyView::Aptamer);
        assert_eq!(SaliencyView::parse("Protein"), SaliencyView::Protein);
        assert_eq!(SaliencyView::parse("heatmap"), SaliencyView::Combined);
    }

    #[test]
    fn view_axis_coverage() {
        assert!(SaliencyView::Aptamer.scores_aptamer());
        assert!(!SaliencyView::Aptamer.scores_protein());
        assert!(!SaliencyView::Protein.scores_aptamer());
        assert!(SaliencyView::Combined.scores_aptamer());
        assert!(SaliencyView::Combined.scores_protein());
    }

    #[test]
    fn top_k_breaks_ties_toward_earlier_positions() {
        let scores = vec![0.2f32, 0.5, 0.5, 0.1];
        let top = top_k_positions(&scores, 3);
        assert_eq!(top[0].index, 1);
        assert_eq!(top[1].index, 2);
        assert_eq!(top[2].index, 0);
    }

    #[test]
    fn top_k_clamps_to_available_positions() {
        let scores = vec![0.3f32, 0.1];
        assert_eq!(top_k_positions(&scores, 10).len(), 2);
        assert!(top_k_positions(&[], 3).is_empty());
    }
}
