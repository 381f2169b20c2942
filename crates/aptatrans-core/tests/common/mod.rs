use candle_core::Device;
use std::path::Path;

use aptatrans_core::models::aptatrans::{AptaTrans, AptaTransConfig};
use aptatrans_core::vocab::Vocabularies;

pub fn tiny_config(model_dir: &Path) -> AptaTransConfig {
    AptaTransConfig {
        dim: 16,
        mult_ff: 2,
        n_layers: 1,
        n_heads: 2,
        dropout: 0.1,
        channel_size: 8,
        apta_max_len: 16,
        prot_max_len: 24,
        save_name: "test".to_string(),
        model_dir: model_dir.to_path_buf(),
    }
}

pub fn protein_words() -> Vec<String> {
    ["MKV", "KVL", "VLA", "LAA", "AAG", "AGI", "GIV"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn tiny_model(model_dir: &Path) -> AptaTrans {
    AptaTrans::new(
        tiny_config(model_dir),
        Vocabularies::new(&protein_words()),
        Device::Cpu,
    )
    .unwrap()
}
