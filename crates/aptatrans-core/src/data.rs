//! Dataset loading, splitting and mini-batch tensorization.
//!
//! Labeled interaction pairs and raw pretraining sequences are read from
//! CSV tables. Batches are tokenized in parallel and materialized as
//! integer-id tensors with the batch dimension leading.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Deserialize;
use std::path::Path;

use crate::vocab::{tokenize_pair, tokenize_protein, tokenize_rna, Vocabularies, Vocabulary};

/// One labeled aptamer/protein pair.
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionRecord {
    pub aptamer: String,
    pub protein: String,
    pub label: f32,
}

/// One raw sequence with its secondary-structure annotation, for
/// pretraining.
#[derive(Debug, Clone, Deserialize)]
pub struct PretrainRecord {
    pub sequence: String,
    pub structure: String,
}

#[derive(Debug, Deserialize)]
struct WordRecord {
    word: String,
    freq: f64,
}

/// Loads labeled interaction pairs from a CSV file with header
/// `aptamer,protein,label`.
pub fn load_interactions<P: AsRef<Path>>(path: P) -> Result<Vec<InteractionRecord>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .with_context(|| format!("Failed to open interaction table {:?}", path.as_ref()))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Loads pretraining sequences from a CSV file with header
/// `sequence,structure`. Sequences longer than `max_raw_len` are dropped so
/// the 3-mer token track fits the fixed model length.
pub fn load_pretrain_sequences<P: AsRef<Path>>(
    path: P,
    max_raw_len: usize,
) -> Result<Vec<PretrainRecord>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .with_context(|| format!("Failed to open sequence table {:?}", path.as_ref()))?;
    let mut records: Vec<PretrainRecord> = Vec::new();
    for row in reader.deserialize() {
        let record: PretrainRecord = row?;
        if record.sequence.len() <= max_raw_len {
            records.push(record);
        }
    }
    Ok(records)
}

/// Loads the protein word table (`word,freq`) and keeps the words whose
/// frequency is strictly above the table mean, in file order.
pub fn load_protein_words<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .with_context(|| format!("Failed to open protein word table {:?}", path.as_ref()))?;
    let mut records: Vec<WordRecord> = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    if records.is_empty() {
        anyhow::bail!("Protein word table {:?} is empty", path.as_ref());
    }
    let mean = records.iter().map(|r| r.freq).sum::<f64>() / records.len() as f64;
    Ok(records
        .into_iter()
        .filter(|r| r.freq > mean)
        .map(|r| r.word)
        .collect())
}

/// Shuffles `data` with a seeded RNG and splits off the last `test_fraction`
/// as the held-out set.
pub fn train_test_split<T: Clone>(data: &[T], test_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut shuffled: Vec<T> = data.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);
    let n_test = ((shuffled.len() as f64) * test_fraction).round() as usize;
    let n_test = n_test.min(shuffled.len());
    let test = shuffled.split_off(shuffled.len() - n_test);
    (shuffled, test)
}

/// One tensorized interaction batch.
pub struct InteractionBatch {
    /// Aptamer token ids, `(batch, apta_max_len)`, u32.
    pub apta: Tensor,
    /// Protein token ids, `(batch, prot_max_len)`, u32.
    pub prot: Tensor,
    /// Binary labels, `(batch,)`, f32.
    pub labels: Tensor,
}

/// Tokenizes and batches labeled interaction pairs.
pub fn interaction_batches(
    records: &[InteractionRecord],
    vocabs: &Vocabularies,
    apta_max_len: usize,
    prot_max_len: usize,
    batch_size: usize,
    device: &Device,
) -> Result<Vec<InteractionBatch>> {
    let tokenized: Vec<(Vec<u32>, Vec<u32>, f32)> = records
        .par_iter()
        .map(|r| {
            (
                tokenize_rna(&r.aptamer, &vocabs.apta, apta_max_len),
                tokenize_protein(&r.protein, &vocabs.prot, prot_max_len),
                r.label,
            )
        })
        .collect();

    let mut batches = Vec::new();
    for chunk in tokenized.chunks(batch_size) {
        let b = chunk.len();
        let apta: Vec<u32> = chunk.iter().flat_map(|(a, _, _)| a.iter().copied()).collect();
        let prot: Vec<u32> = chunk.iter().flat_map(|(_, p, _)| p.iter().copied()).collect();
        let labels: Vec<f32> = chunk.iter().map(|(_, _, y)| *y).collect();
        batches.push(InteractionBatch {
            apta: Tensor::from_vec(apta, (b, apta_max_len), device)?,
            prot: Tensor::from_vec(prot, (b, prot_max_len), device)?,
            labels: Tensor::from_vec(labels, (b,), device)?.to_dtype(DType::F32)?,
        });
    }
    Ok(batches)
}

/// One tensorized pretraining batch: a masked view, the reconstruction
/// targets at masked positions (0 elsewhere), the original view, and the
/// per-position structure labels. All `(batch, max_len)`, u32.
pub struct MaskedBatch {
    pub masked: Tensor,
    pub masked_targets: Tensor,
    pub original: Tensor,
    pub struct_labels: Tensor,
}

/// Randomly masks non-padding positions at `mask_rate`, writing `mask_id`
/// into the input view and the original id into the target track.
pub fn apply_mask(
    ids: &[u32],
    mask_rate: f64,
    mask_id: u32,
    rng: &mut StdRng,
) -> (Vec<u32>, Vec<u32>) {
    let mut masked = ids.to_vec();
    let mut targets = vec![0u32; ids.len()];
    for (i, &id) in ids.iter().enumerate() {
        if id != 0 && rng.gen_bool(mask_rate) {
            masked[i] = mask_id;
            targets[i] = id;
        }
    }
    (masked, targets)
}

/// Tokenizes, masks and batches pretraining sequences for one family.
pub fn masked_batches(
    records: &[PretrainRecord],
    seq_vocab: &Vocabulary,
    struct_vocab: &Vocabulary,
    max_len: usize,
    mask_rate: f64,
    batch_size: usize,
    seed: u64,
    device: &Device,
) -> Result<Vec<MaskedBatch>> {
    let tokenized: Vec<(Vec<u32>, Vec<u32>)> = records
        .par_iter()
        .map(|r| tokenize_pair(&r.sequence, &r.structure, seq_vocab, struct_vocab, max_len))
        .collect();

    let mask_id = seq_vocab.mask_id();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut batches = Vec::new();
    for chunk in tokenized.chunks(batch_size) {
        let b = chunk.len();
        let mut masked = Vec::with_capacity(b * max_len);
        let mut masked_targets = Vec::with_capacity(b * max_len);
        let mut original = Vec::with_capacity(b * max_len);
        let mut struct_labels = Vec::with_capacity(b * max_len);
        for (ids, labels) in chunk {
            let (m, t) = apply_mask(ids, mask_rate, mask_id, &mut rng);
            masked.extend_from_slice(&m);
            masked_targets.extend_from_slice(&t);
            original.extend_from_slice(ids);
            struct_labels.extend_from_slice(labels);
        }
        batches.push(MaskedBatch {
            masked: Tensor::from_vec(masked, (b, max_len), device)?,
            masked_targets: Tensor::from_vec(masked_targets, (b, max_len), device)?,
            original: Tensor::from_vec(original, (b, max_len), device)?,
            struct_labels: Tensor::from_vec(struct_labels, (b, max_len), device)?,
        });
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::rna_vocab;
    use std::io::Write;

    #[test]
    fn split_is_seeded_and_disjoint_in_size() {
        let data: Vec<u32> = (0..100).collect();
        let (train_a, test_a) = train_test_split(&data, 0.05, 7);
        let (train_b, test_b) = train_test_split(&data, 0.05, 7);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(test_a.len(), 5);
        assert_eq!(train_a.len(), 95);
    }

    #[test]
    fn mask_writes_targets_only_at_masked_positions() {
        let vocab = rna_vocab();
        let ids = tokenize_rna("ACGUACGUACGUACGU", &vocab, 32);
        let mut rng = StdRng::seed_from_u64(3);
        let (masked, targets) = apply_mask(&ids, 0.5, vocab.mask_id(), &mut rng);
        for i in 0..ids.len() {
            if masked[i] == vocab.mask_id() {
                assert_eq!(targets[i], ids[i]);
            } else {
                assert_eq!(masked[i], ids[i]);
                assert_eq!(targets[i], 0);
            }
        }
        // padding is never masked
        assert!(ids
            .iter()
            .zip(&masked)
            .all(|(&orig, &m)| orig != 0 || m == 0));
    }

    #[test]
    fn interactions_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "aptamer,protein,label").unwrap();
        writeln!(f, "ACGUACGU,MKVLAAGIV,1").unwrap();
        writeln!(f, "GGGCCCAAA,MKVLAAGIV,0").unwrap();
        drop(f);

        let records = load_interactions(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].label, 1.0);
        assert_eq!(records[1].aptamer, "GGGCCCAAA");
    }

    #[test]
    fn protein_words_filtered_by_mean_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "word,freq").unwrap();
        writeln!(f, "MKV,100").unwrap();
        writeln!(f, "KVL,10").unwrap();
        writeln!(f, "VLA,1").unwrap();
        drop(f);

        // mean is 37; only MKV survives
        let words = load_protein_words(&path).unwrap();
        assert_eq!(words, vec!["MKV".to_string()]);
    }
}
