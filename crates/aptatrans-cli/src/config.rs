//! CLI configuration: one JSON file covering the model and every driver,
//! with command-line overrides applied on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use aptatrans_core::data::load_protein_words;
use aptatrans_core::models::aptatrans::{AptaTrans, AptaTransConfig};
use aptatrans_core::recommend::RecommendConfig;
use aptatrans_core::training::pretrain::PretrainConfig;
use aptatrans_core::training::train::TrainConfig;
use aptatrans_core::utils::get_device;
use aptatrans_core::vocab::{protein_structure_vocab, rna_structure_vocab, rna_vocab, Vocabularies, Vocabulary};

const AMINO_ACIDS: [char; 20] = [
    'A', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W',
    'Y',
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: AptaTransConfig,
    #[serde(default)]
    pub train: TrainConfig,
    #[serde(default)]
    pub pretrain: PretrainConfig,
    #[serde(default)]
    pub recommend: RecommendConfig,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    /// Corpus frequency table (`word,freq`) the protein vocabulary is built
    /// from. Without it every 3-mer over the 20 amino acids is used.
    #[serde(default)]
    pub protein_words: Option<PathBuf>,
}

fn default_device() -> String {
    "cpu".to_string()
}
fn default_seed() -> u64 {
    42
}
fn default_test_fraction() -> f64 {
    0.05
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: AptaTransConfig::default(),
            train: TrainConfig::default(),
            pretrain: PretrainConfig::default(),
            recommend: RecommendConfig::default(),
            device: default_device(),
            seed: default_seed(),
            test_fraction: default_test_fraction(),
            protein_words: None,
        }
    }
}

/// Loads a JSON config, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {path:?}"))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file {path:?}"))
        }
        None => Ok(AppConfig::default()),
    }
}

fn exhaustive_protein_words() -> Vec<String> {
    let mut words = Vec::with_capacity(8000);
    for a in AMINO_ACIDS {
        for b in AMINO_ACIDS {
            for c in AMINO_ACIDS {
                words.push(format!("{a}{b}{c}"));
            }
        }
    }
    words
}

/// Builds the vocabulary set, from the configured word table when present.
pub fn build_vocabularies(config: &AppConfig) -> Result<Vocabularies> {
    let words = match &config.protein_words {
        Some(path) => load_protein_words(path)?,
        None => exhaustive_protein_words(),
    };
    Ok(Vocabularies {
        apta: rna_vocab(),
        apta_struct: rna_structure_vocab(),
        prot: Vocabulary::from_words(words, true),
        prot_struct: protein_structure_vocab(),
    })
}

/// Instantiates the model on the configured device.
pub fn build_model(config: &AppConfig) -> Result<AptaTrans> {
    let device = get_device(&config.device)?;
    let vocabs = build_vocabularies(config)?;
    AptaTrans::new(config.model.clone(), vocabs, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_config_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config.device, "cpu");
        assert_eq!(config.model.dim, 128);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{{\"model\": {{\"dim\": 32}}, \"device\": \"cpu\"}}").unwrap();
        drop(f);

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.model.dim, 32);
        assert_eq!(config.model.n_heads, 8);
        assert_eq!(config.train.epochs, 50);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn fallback_protein_vocab_covers_all_3mers() {
        let config = AppConfig::default();
        let vocabs = build_vocabularies(&config).unwrap();
        // 8000 3-mers + pad + mask
        assert_eq!(vocabs.prot.size(), 8002);
    }
}
