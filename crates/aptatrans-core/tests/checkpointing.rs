mod common;

use anyhow::Result;

use aptatrans_core::models::aptatrans::EncoderFamily;
use aptatrans_core::models::checkpoint::{
    load_bundle, load_pretrained_encoders, save_bundle, save_pretrained_encoder, BEST_AUC_TAG,
};

const APTAMER: &str = "GGGCCCAAAUUU";
const PROTEIN: &str = "MKVLAAGIV";

#[test]
fn bundle_round_trip_restores_predictions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut source = common::tiny_model(dir.path());
    source.set_evaluation_mode();
    let apta = source.tokenize_apta(APTAMER)?;
    let prot = source.tokenize_prot(PROTEIN)?;
    let expected = source.predict(&apta, &prot)?.to_vec1::<f32>()?;

    save_bundle(&source, BEST_AUC_TAG)?;

    // a fresh random init predicts differently until the bundle is loaded
    let mut restored = common::tiny_model(dir.path());
    restored.set_evaluation_mode();
    assert!(load_bundle(&mut restored, BEST_AUC_TAG)?);
    let actual = restored.predict(&apta, &prot)?.to_vec1::<f32>()?;
    assert_eq!(expected, actual);
    Ok(())
}

#[test]
fn missing_bundle_is_reported_not_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut model = common::tiny_model(dir.path());
    assert!(!load_bundle(&mut model, BEST_AUC_TAG)?);
    Ok(())
}

#[test]
fn partial_bundle_leaves_parameters_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = common::tiny_model(dir.path());
    save_bundle(&model, BEST_AUC_TAG)?;

    // delete one component file; the bundle must then be treated as absent
    let victim = dir
        .path()
        .join("test")
        .join(format!("conv_{BEST_AUC_TAG}.safetensors"));
    std::fs::remove_file(&victim)?;

    let mut other = common::tiny_model(dir.path());
    other.set_evaluation_mode();
    let apta = other.tokenize_apta(APTAMER)?;
    let prot = other.tokenize_prot(PROTEIN)?;
    let before = other.predict(&apta, &prot)?.to_vec1::<f32>()?;
    assert!(!load_bundle(&mut other, BEST_AUC_TAG)?);
    let after = other.predict(&apta, &prot)?.to_vec1::<f32>()?;
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn pretrained_encoder_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = common::tiny_model(dir.path());
    save_pretrained_encoder(&source, EncoderFamily::Aptamer)?;

    let mut restored = common::tiny_model(dir.path());
    let (apta_loaded, prot_loaded) = load_pretrained_encoders(&mut restored)?;
    assert!(apta_loaded);
    assert!(!prot_loaded);
    // snapshots sit in the bundle directory, next to the tagged components
    assert!(dir
        .path()
        .join("test")
        .join("pretrained_encoder_rna.safetensors")
        .exists());
    Ok(())
}
