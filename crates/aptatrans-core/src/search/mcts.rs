//! Monte-Carlo tree search over candidate aptamer sequences.
//!
//! The tree is an arena of nodes indexed into a `Vec`, each extending the
//! committed prefix by one base. A search commits one base at a time: run a
//! fixed number of simulations from the current prefix, keep the most
//! visited child, re-root and repeat until the sequence reaches the target
//! depth. Rollouts are capped at `states` random bases of lookahead.

use anyhow::Result;
use candle_core::Tensor;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::search::CandidateEvaluator;

const BASES: [char; 4] = ['A', 'C', 'G', 'U'];
const EXPLORATION: f64 = std::f64::consts::SQRT_2;

struct Node {
    parent: Option<usize>,
    base: Option<char>,
    children: Vec<usize>,
    untried: Vec<char>,
    visits: u32,
    value_sum: f64,
}

impl Node {
    fn new(parent: Option<usize>, base: Option<char>, expandable: bool) -> Self {
        Self {
            parent,
            base,
            children: Vec::new(),
            untried: if expandable { BASES.to_vec() } else { Vec::new() },
            visits: 0,
            value_sum: 0.0,
        }
    }

    fn mean_value(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.value_sum / self.visits as f64
        }
    }
}

/// One search instance bound to a single target protein.
///
/// The target is tokenized once by the caller and reused for every rollout.
/// `reset` clears the tree and the committed prefix but keeps the RNG state,
/// so successive candidates from one instance explore differently.
pub struct Mcts {
    target_tokens: Tensor,
    target_protein: String,
    depth: usize,
    iterations: usize,
    states: usize,
    rng: StdRng,
    nodes: Vec<Node>,
    committed: String,
    best: Option<(String, f32)>,
}

impl Mcts {
    pub fn new(
        target_tokens: Tensor,
        target_protein: impl Into<String>,
        depth: usize,
        iterations: usize,
        states: usize,
        seed: u64,
    ) -> Self {
        Self {
            target_tokens,
            target_protein: target_protein.into(),
            depth,
            iterations,
            states,
            rng: StdRng::seed_from_u64(seed),
            nodes: Vec::new(),
            committed: String::new(),
            best: None,
        }
    }

    pub fn target_protein(&self) -> &str {
        &self.target_protein
    }

    /// The best candidate found so far and its rollout score, once
    /// `make_candidate` has run.
    pub fn get_candidate(&self) -> Option<(&str, f32)> {
        self.best.as_ref().map(|(seq, score)| (seq.as_str(), *score))
    }

    /// Discards the tree, the committed prefix and the stored candidate.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.committed.clear();
        self.best = None;
    }

    /// Grows one candidate sequence of up to `depth` bases and returns it.
    pub fn make_candidate(&mut self, evaluator: &dyn CandidateEvaluator) -> Result<String> {
        while self.committed.len() < self.depth {
            self.nodes.clear();
            self.nodes
                .push(Node::new(None, None, self.committed.len() < self.depth));

            for _ in 0..self.iterations {
                self.simulate(evaluator)?;
            }

            let root = &self.nodes[0];
            let Some(&chosen) = root
                .children
                .iter()
                .max_by_key(|&&c| (self.nodes[c].visits, (self.nodes[c].mean_value() * 1e9) as i64))
            else {
                break;
            };
            let base = self.nodes[chosen].base.unwrap_or('A');
            self.committed.push(base);
            debug!(
                "Committed base {base} at position {} (visits={})",
                self.committed.len(),
                self.nodes[chosen].visits
            );
        }

        // fallback: pad the committed prefix out to full depth
        if self.best.is_none() {
            let mut candidate = self.committed.clone();
            while candidate.len() < self.depth {
                if let Some(&base) = BASES.choose(&mut self.rng) {
                    candidate.push(base);
                }
            }
            let score = evaluator.score(&candidate, &self.target_tokens)?;
            self.best = Some((candidate, score));
        }
        Ok(self
            .best
            .as_ref()
            .map(|(seq, _)| seq.clone())
            .unwrap_or_else(|| self.committed.clone()))
    }

    fn simulate(&mut self, evaluator: &dyn CandidateEvaluator) -> Result<()> {
        // selection
        let mut node = 0usize;
        let mut suffix = String::new();
        while self.nodes[node].untried.is_empty() && !self.nodes[node].children.is_empty() {
            node = self.select_child(node);
            if let Some(base) = self.nodes[node].base {
                suffix.push(base);
            }
        }

        // expansion
        if !self.nodes[node].untried.is_empty() {
            let pick = self.rng.gen_range(0..self.nodes[node].untried.len());
            let base = self.nodes[node].untried.swap_remove(pick);
            let depth_here = self.committed.len() + suffix.len() + 1;
            let child = Node::new(Some(node), Some(base), depth_here < self.depth);
            self.nodes.push(child);
            let child_idx = self.nodes.len() - 1;
            self.nodes[node].children.push(child_idx);
            node = child_idx;
            suffix.push(base);
        }

        // rollout
        let mut candidate = format!("{}{}", self.committed, suffix);
        let lookahead = self
            .states
            .min(self.depth.saturating_sub(candidate.len()));
        for _ in 0..lookahead {
            if let Some(&base) = BASES.choose(&mut self.rng) {
                candidate.push(base);
            }
        }
        let score = if candidate.is_empty() {
            0.0
        } else {
            evaluator.score(&candidate, &self.target_tokens)?
        };

        // only full-depth rollouts compete as candidates; short rollouts
        // still guide the tree through backpropagation
        if candidate.len() == self.depth
            && self
                .best
                .as_ref()
                .map(|(_, best)| score > *best)
                .unwrap_or(true)
        {
            self.best = Some((candidate, score));
        }

        // backpropagation
        let mut cursor = Some(node);
        while let Some(idx) = cursor {
            self.nodes[idx].visits += 1;
            self.nodes[idx].value_sum += score as f64;
            cursor = self.nodes[idx].parent;
        }
        Ok(())
    }

    fn select_child(&self, node: usize) -> usize {
        let parent_visits = self.nodes[node].visits.max(1) as f64;
        let mut best_child = self.nodes[node].children[0];
        let mut best_uct = f64::NEG_INFINITY;
        for &child in &self.nodes[node].children {
            let c = &self.nodes[child];
            let uct = if c.visits == 0 {
                f64::INFINITY
            } else {
                c.mean_value() + EXPLORATION * (parent_visits.ln() / c.visits as f64).sqrt()
            };
            if uct > best_uct {
                best_uct = uct;
                best_child = child;
            }
        }
        best_child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    /// Rewards G-rich sequences so the search has a gradient to follow.
    struct GRichEvaluator;

    impl CandidateEvaluator for GRichEvaluator {
        fn score(&self, aptamer: &str, _prot_tokens: &Tensor) -> Result<f32> {
            let g = aptamer.chars().filter(|&c| c == 'G').count() as f32;
            Ok(g / aptamer.len().max(1) as f32)
        }
    }

    fn dummy_target() -> Tensor {
        Tensor::zeros((1, 4), DType::U32, &Device::Cpu).unwrap()
    }

    #[test]
    fn candidate_has_requested_depth_and_valid_alphabet() -> Result<()> {
        let mut mcts = Mcts::new(dummy_target(), "TARGET", 8, 20, 4, 1);
        let seq = mcts.make_candidate(&GRichEvaluator)?;
        assert_eq!(seq.len(), 8);
        assert!(seq.chars().all(|c| "ACGU".contains(c)));
        Ok(())
    }

    #[test]
    fn search_prefers_the_rewarded_base() -> Result<()> {
        let mut mcts = Mcts::new(dummy_target(), "TARGET", 12, 80, 4, 7);
        let seq = mcts.make_candidate(&GRichEvaluator)?;
        let g = seq.chars().filter(|&c| c == 'G').count();
        // a uniform draw would give ~3 of 12
        assert!(g >= 6, "expected a G-rich candidate, got {seq}");
        Ok(())
    }

    #[test]
    fn reset_clears_candidate_and_allows_reuse() -> Result<()> {
        let mut mcts = Mcts::new(dummy_target(), "TARGET", 6, 10, 3, 3);
        mcts.make_candidate(&GRichEvaluator)?;
        assert!(mcts.get_candidate().is_some());
        mcts.reset();
        assert!(mcts.get_candidate().is_none());
        let seq = mcts.make_candidate(&GRichEvaluator)?;
        assert_eq!(seq.len(), 6);
        Ok(())
    }
}
