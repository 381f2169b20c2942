//! The end-to-end aptamer/protein interaction scorer.
//!
//! Two independently parameterized sequence encoders feed a pairwise
//! interaction mapper; a convolutional scorer reduces each map to one
//! interaction probability. Every sub-module keeps its parameters in its own
//! `VarMap` so the checkpoint bundle can be written and read per component.

use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{ops, Module, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::building_blocks::building_blocks::{
    ConvBlocks, InteractionMapper, PredictorHead, SeqEncoder, TokenPredictor,
};
use crate::vocab::{tokenize_protein, tokenize_rna, Vocabularies, APTA_MAX_LEN, PROT_MAX_LEN};

/// Model hyper-parameters. Defaults follow the published architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptaTransConfig {
    #[serde(default = "default_dim")]
    pub dim: usize,
    #[serde(default = "default_mult_ff")]
    pub mult_ff: usize,
    #[serde(default = "default_n_layers")]
    pub n_layers: usize,
    #[serde(default = "default_n_heads")]
    pub n_heads: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default = "default_apta_max_len")]
    pub apta_max_len: usize,
    #[serde(default = "default_prot_max_len")]
    pub prot_max_len: usize,
    /// Subdirectory of `model_dir` the checkpoint bundle lives in.
    #[serde(default = "default_save_name")]
    pub save_name: String,
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
}

fn default_dim() -> usize {
    128
}
fn default_mult_ff() -> usize {
    2
}
fn default_n_layers() -> usize {
    6
}
fn default_n_heads() -> usize {
    8
}
fn default_dropout() -> f32 {
    0.1
}
fn default_channel_size() -> usize {
    64
}
fn default_apta_max_len() -> usize {
    APTA_MAX_LEN
}
fn default_prot_max_len() -> usize {
    PROT_MAX_LEN
}
fn default_save_name() -> String {
    "default".to_string()
}
fn default_model_dir() -> PathBuf {
    PathBuf::from("./models")
}

impl Default for AptaTransConfig {
    fn default() -> Self {
        Self {
            dim: default_dim(),
            mult_ff: default_mult_ff(),
            n_layers: default_n_layers(),
            n_heads: default_n_heads(),
            dropout: default_dropout(),
            channel_size: default_channel_size(),
            apta_max_len: default_apta_max_len(),
            prot_max_len: default_prot_max_len(),
            save_name: default_save_name(),
            model_dir: default_model_dir(),
        }
    }
}

/// The five checkpointed sub-modules of the interaction scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    EncoderApta,
    EncoderProt,
    ToIm,
    Conv,
    Predictor,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::EncoderApta,
        Component::EncoderProt,
        Component::ToIm,
        Component::Conv,
        Component::Predictor,
    ];

    pub fn file_stem(&self) -> &'static str {
        match self {
            Component::EncoderApta => "encoder_apta",
            Component::EncoderProt => "encoder_prot",
            Component::ToIm => "to_im",
            Component::Conv => "conv",
            Component::Predictor => "predictor",
        }
    }
}

/// Sequence family selector for the pretraining side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderFamily {
    Aptamer,
    Protein,
}

impl EncoderFamily {
    pub fn pretrained_file_stem(&self) -> &'static str {
        match self {
            EncoderFamily::Aptamer => "pretrained_encoder_rna",
            EncoderFamily::Protein => "pretrained_encoder_protein",
        }
    }
}

struct ComponentVars {
    encoder_apta: VarMap,
    encoder_prot: VarMap,
    to_im: VarMap,
    conv: VarMap,
    predictor: VarMap,
    token_predictor_apta: VarMap,
    token_predictor_prot: VarMap,
}

/// One pipeline instance: the scorer sub-modules plus the pretraining heads.
///
/// Inference calls read the parameter sets; training and pretraining calls
/// write them. Callers serialize the two against the same instance, there is
/// no internal locking.
pub struct AptaTrans {
    pub config: AptaTransConfig,
    pub vocabs: Vocabularies,
    device: Device,
    vars: ComponentVars,
    encoder_apta: SeqEncoder,
    encoder_prot: SeqEncoder,
    to_im: InteractionMapper,
    conv: ConvBlocks,
    predictor: PredictorHead,
    token_predictor_apta: TokenPredictor,
    token_predictor_prot: TokenPredictor,
    is_training: bool,
}

impl AptaTrans {
    pub fn new(config: AptaTransConfig, vocabs: Vocabularies, device: Device) -> Result<Self> {
        let vars = ComponentVars {
            encoder_apta: VarMap::new(),
            encoder_prot: VarMap::new(),
            to_im: VarMap::new(),
            conv: VarMap::new(),
            predictor: VarMap::new(),
            token_predictor_apta: VarMap::new(),
            token_predictor_prot: VarMap::new(),
        };

        let vb = |m: &VarMap| VarBuilder::from_varmap(m, DType::F32, &device);

        let encoder_apta = SeqEncoder::new(
            vocabs.apta.size(),
            config.dim,
            config.n_layers,
            config.n_heads,
            config.mult_ff,
            config.dropout,
            config.apta_max_len,
            &vb(&vars.encoder_apta),
            &device,
        )?;
        let encoder_prot = SeqEncoder::new(
            vocabs.prot.size(),
            config.dim,
            config.n_layers,
            config.n_heads,
            config.mult_ff,
            config.dropout,
            config.prot_max_len,
            &vb(&vars.encoder_prot),
            &device,
        )?;
        let to_im = InteractionMapper::new(config.dim, &vb(&vars.to_im))?;
        let conv = ConvBlocks::new(config.channel_size, &vb(&vars.conv))?;
        let predictor = PredictorHead::new(config.channel_size, config.dropout, &vb(&vars.predictor))?;
        let token_predictor_apta = TokenPredictor::new(
            config.dim,
            vocabs.apta.size(),
            vocabs.apta_struct.size(),
            &vb(&vars.token_predictor_apta),
        )?;
        let token_predictor_prot = TokenPredictor::new(
            config.dim,
            vocabs.prot.size(),
            vocabs.prot_struct.size(),
            &vb(&vars.token_predictor_prot),
        )?;

        Ok(Self {
            config,
            vocabs,
            device,
            vars,
            encoder_apta,
            encoder_prot,
            to_im,
            conv,
            predictor,
            token_predictor_apta,
            token_predictor_prot,
            is_training: false,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn set_training_mode(&mut self) {
        self.is_training = true;
    }

    pub fn set_evaluation_mode(&mut self) {
        self.is_training = false;
    }

    /// Interaction logits for a token batch, `(batch,)`.
    pub fn forward_logits(&self, apta: &Tensor, prot: &Tensor) -> Result<Tensor> {
        let apta_encoded = self.encoder_apta.forward(apta, self.is_training)?;
        let prot_encoded = self.encoder_prot.forward(prot, self.is_training)?;
        let map = self.to_im.forward(&apta_encoded, &prot_encoded)?;
        let features = self.conv.forward(&map)?;
        let logits = self.predictor.forward(&features, self.is_training)?;
        Ok(logits.squeeze(1)?)
    }

    /// Interaction probabilities for a token batch, `(batch,)`, in `[0, 1]`.
    pub fn predict(&self, apta: &Tensor, prot: &Tensor) -> Result<Tensor> {
        Ok(ops::sigmoid(&self.forward_logits(apta, prot)?)?)
    }

    /// The pairwise interaction map for a token batch,
    /// `(batch, 1, apta_len, prot_len)`. Encode and combine only, no
    /// reduction. Dropout stays off regardless of the training flag, so the
    /// map is deterministic for fixed parameters.
    pub fn interaction_map(&self, apta: &Tensor, prot: &Tensor) -> Result<Tensor> {
        let apta_encoded = self.encoder_apta.forward(apta, false)?;
        let prot_encoded = self.encoder_prot.forward(prot, false)?;
        Ok(self.to_im.forward(&apta_encoded, &prot_encoded)?)
    }

    /// Scores a precomputed interaction map, skipping re-encoding.
    ///
    /// Accepts `(rows, cols)`, `(batch, rows, cols)`, a channel form
    /// `(batch, 1, rows, cols)`, or a raw saved map with an extra trailing
    /// dimension `(batch, rows, cols, k)` which is averaged out. Returns the
    /// two-class probability form `(batch, 2)` as `[1-p, p]`; every row sums
    /// to 1.
    pub fn score_from_map(&self, map: &Tensor) -> Result<Tensor> {
        let map = match map.dims() {
            [_, _] => map.unsqueeze(0)?.unsqueeze(0)?,
            [_, _, _] => map.unsqueeze(1)?,
            [_, 1, _, _] => map.clone(),
            [_, _, _, _] => map.mean(D::Minus1)?.unsqueeze(1)?,
            dims => anyhow::bail!("Unsupported interaction map rank: {:?}", dims),
        };
        let features = self.conv.forward(&map)?;
        let logits = self.predictor.forward(&features, false)?;
        let p = ops::sigmoid(&logits)?;
        let one_minus_p = p.affine(-1.0, 1.0)?;
        Ok(Tensor::cat(&[&one_minus_p, &p], 1)?)
    }

    /// Pretraining forward pass for one family: encoder output for the
    /// masked and the original views, fed through the family's token
    /// predictor.
    pub fn pretrain_forward(
        &self,
        family: EncoderFamily,
        masked: &Tensor,
        original: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let (encoder, head) = match family {
            EncoderFamily::Aptamer => (&self.encoder_apta, &self.token_predictor_apta),
            EncoderFamily::Protein => (&self.encoder_prot, &self.token_predictor_prot),
        };
        let masked_encoded = encoder.forward(masked, self.is_training)?;
        let encoded = encoder.forward(original, self.is_training)?;
        Ok(head.forward(&masked_encoded, &encoded)?)
    }

    /// Tokenizes one raw aptamer sequence to a `(1, apta_max_len)` batch.
    pub fn tokenize_apta(&self, seq: &str) -> Result<Tensor> {
        let ids = tokenize_rna(seq, &self.vocabs.apta, self.config.apta_max_len);
        Ok(Tensor::from_vec(ids, (1, self.config.apta_max_len), &self.device)?)
    }

    /// Tokenizes one raw protein sequence to a `(1, prot_max_len)` batch.
    pub fn tokenize_prot(&self, seq: &str) -> Result<Tensor> {
        let ids = tokenize_protein(seq, &self.vocabs.prot, self.config.prot_max_len);
        Ok(Tensor::from_vec(ids, (1, self.config.prot_max_len), &self.device)?)
    }

    /// All trainable parameters of the five scorer sub-modules, for the
    /// shared end-to-end optimizer.
    pub fn scorer_vars(&self) -> Vec<candle_core::Var> {
        let mut vars = Vec::new();
        for component in Component::ALL {
            vars.extend(self.varmap(component).all_vars());
        }
        vars
    }

    /// Encoder plus token-predictor parameters for one family's pretraining
    /// optimizer.
    pub fn pretrain_vars(&self, family: EncoderFamily) -> Vec<candle_core::Var> {
        let (encoder, head) = match family {
            EncoderFamily::Aptamer => (&self.vars.encoder_apta, &self.vars.token_predictor_apta),
            EncoderFamily::Protein => (&self.vars.encoder_prot, &self.vars.token_predictor_prot),
        };
        let mut vars = encoder.all_vars();
        vars.extend(head.all_vars());
        vars
    }

    pub fn varmap(&self, component: Component) -> &VarMap {
        match component {
            Component::EncoderApta => &self.vars.encoder_apta,
            Component::EncoderProt => &self.vars.encoder_prot,
            Component::ToIm => &self.vars.to_im,
            Component::Conv => &self.vars.conv,
            Component::Predictor => &self.vars.predictor,
        }
    }

    pub fn varmap_mut(&mut self, component: Component) -> &mut VarMap {
        match component {
            Component::EncoderApta => &mut self.vars.encoder_apta,
            Component::EncoderProt => &mut self.vars.encoder_prot,
            Component::ToIm => &mut self.vars.to_im,
            Component::Conv => &mut self.vars.conv,
            Component::Predictor => &mut self.vars.predictor,
        }
    }

    pub fn encoder_varmap_mut(&mut self, family: EncoderFamily) -> &mut VarMap {
        match family {
            EncoderFamily::Aptamer => &mut self.vars.encoder_apta,
            EncoderFamily::Protein => &mut self.vars.encoder_prot,
        }
    }
}
