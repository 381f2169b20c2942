//! Checkpoint bundle layout and persistence.
//!
//! A bundle is one directory per `save_name` under the model directory,
//! holding one safetensors file per scorer component, tagged with the
//! selection criterion (`best_auc` for supervised training). Pretrained
//! encoder snapshots live in the same directory, untagged, one per family.

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::models::aptatrans::{AptaTrans, Component, EncoderFamily};

/// Tag for components selected on held-out ROC-AUC.
pub const BEST_AUC_TAG: &str = "best_auc";

/// `<model_dir>/<save_name>/<stem>_<tag>.safetensors`, or untagged
/// `<model_dir>/<stem>.safetensors` when `save_name` and `tag` are absent.
pub fn component_path(
    model_dir: &Path,
    save_name: Option<&str>,
    stem: &str,
    tag: Option<&str>,
) -> PathBuf {
    let dir = match save_name {
        Some(name) => model_dir.join(name),
        None => model_dir.to_path_buf(),
    };
    let file = match tag {
        Some(tag) => format!("{stem}_{tag}.safetensors"),
        None => format!("{stem}.safetensors"),
    };
    dir.join(file)
}

fn bundle_paths(model: &AptaTrans, tag: &str) -> Vec<(Component, PathBuf)> {
    Component::ALL
        .iter()
        .map(|&c| {
            (
                c,
                component_path(
                    &model.config.model_dir,
                    Some(&model.config.save_name),
                    c.file_stem(),
                    Some(tag),
                ),
            )
        })
        .collect()
}

/// Writes all five scorer components under the given tag, creating the
/// bundle directory if needed.
pub fn save_bundle(model: &AptaTrans, tag: &str) -> Result<()> {
    let dir = model.config.model_dir.join(&model.config.save_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create checkpoint directory {dir:?}"))?;
    for (component, path) in bundle_paths(model, tag) {
        model
            .varmap(component)
            .save(&path)
            .with_context(|| format!("Failed to save {} to {path:?}", component.file_stem()))?;
    }
    info!("Saved checkpoint bundle '{tag}' to {dir:?}");
    Ok(())
}

/// Loads all five scorer components from the given tag into the model.
///
/// An incomplete or absent bundle is not an error: the model keeps its
/// current parameters and `Ok(false)` is returned. Corrupt files still fail.
pub fn load_bundle(model: &mut AptaTrans, tag: &str) -> Result<bool> {
    let paths = bundle_paths(model, tag);
    if let Some((component, path)) = paths.iter().find(|(_, p)| !p.exists()) {
        warn!(
            "Checkpoint bundle '{tag}' is missing {} ({path:?}); keeping current parameters",
            component.file_stem()
        );
        return Ok(false);
    }
    for (component, path) in paths {
        model
            .varmap_mut(component)
            .load(&path)
            .with_context(|| format!("Failed to load {} from {path:?}", component.file_stem()))?;
    }
    info!("Loaded checkpoint bundle '{tag}'");
    Ok(true)
}

fn pretrained_path(model: &AptaTrans, family: EncoderFamily) -> PathBuf {
    component_path(
        &model.config.model_dir,
        Some(&model.config.save_name),
        family.pretrained_file_stem(),
        None,
    )
}

/// Writes one family's encoder snapshot after pretraining.
pub fn save_pretrained_encoder(model: &AptaTrans, family: EncoderFamily) -> Result<()> {
    let dir = model.config.model_dir.join(&model.config.save_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create checkpoint directory {dir:?}"))?;
    let path = pretrained_path(model, family);
    let component = match family {
        EncoderFamily::Aptamer => Component::EncoderApta,
        EncoderFamily::Protein => Component::EncoderProt,
    };
    model
        .varmap(component)
        .save(&path)
        .with_context(|| format!("Failed to save pretrained encoder to {path:?}"))?;
    info!("Saved pretrained encoder to {path:?}");
    Ok(())
}

/// Loads whichever pretrained encoder snapshots exist. Returns
/// `(aptamer_loaded, protein_loaded)`; a missing snapshot leaves that
/// encoder randomly initialized.
pub fn load_pretrained_encoders(model: &mut AptaTrans) -> Result<(bool, bool)> {
    let mut loaded = (false, false);
    for family in [EncoderFamily::Aptamer, EncoderFamily::Protein] {
        let path = pretrained_path(model, family);
        if !path.exists() {
            warn!("No pretrained encoder at {path:?}; starting from random init");
            continue;
        }
        model
            .encoder_varmap_mut(family)
            .load(&path)
            .with_context(|| format!("Failed to load pretrained encoder from {path:?}"))?;
        info!("Loaded pretrained encoder from {path:?}");
        match family {
            EncoderFamily::Aptamer => loaded.0 = true,
            EncoderFamily::Protein => loaded.1 = true,
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_path_layout() {
        let dir = Path::new("/tmp/models");
        assert_eq!(
            component_path(dir, Some("exp1"), "encoder_apta", Some(BEST_AUC_TAG)),
            PathBuf::from("/tmp/models/exp1/encoder_apta_best_auc.safetensors")
        );
        assert_eq!(
            component_path(dir, Some("exp1"), "pretrained_encoder_rna", None),
            PathBuf::from("/tmp/models/exp1/pretrained_encoder_rna.safetensors")
        );
    }
}
