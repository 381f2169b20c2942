//! Neural building blocks for the interaction scorer.
//!
//! Everything here works on `candle_core::Result` and takes parameters from a
//! `VarBuilder`, so sub-modules can be grouped under per-component `VarMap`s
//! and checkpointed independently.

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn as nn;
use candle_nn::{Module, VarBuilder};

/// Sinusoidal positional encoding, precomputed on the host.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    pe: Tensor,
}

impl PositionalEncoding {
    pub fn new(dim: usize, max_len: usize, device: &Device) -> Result<Self> {
        let mut pe = vec![0f32; max_len * dim];
        for pos in 0..max_len {
            for i in 0..dim / 2 {
                let angle =
                    pos as f32 / 10000f32.powf((2 * i) as f32 / dim as f32);
                pe[pos * dim + 2 * i] = angle.sin();
                pe[pos * dim + 2 * i + 1] = angle.cos();
            }
        }
        let pe = Tensor::from_vec(pe, (1, max_len, dim), device)?;
        Ok(Self { pe })
    }
}

impl Module for PositionalEncoding {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let seq_len = x.dim(1)?;
        x.broadcast_add(&self.pe.narrow(1, 0, seq_len)?)
    }
}

/// Multi-head scaled dot-product self-attention.
#[derive(Debug, Clone)]
struct MultiHeadSelfAttention {
    wq: nn::Linear,
    wk: nn::Linear,
    wv: nn::Linear,
    wo: nn::Linear,
    n_heads: usize,
    head_dim: usize,
}

impl MultiHeadSelfAttention {
    fn new(dim: usize, n_heads: usize, vb: &VarBuilder) -> Result<Self> {
        let head_dim = dim / n_heads;
        Ok(Self {
            wq: nn::linear(dim, dim, vb.pp("wq"))?,
            wk: nn::linear(dim, dim, vb.pp("wk"))?,
            wv: nn::linear(dim, dim, vb.pp("wv"))?,
            wo: nn::linear(dim, dim, vb.pp("wo"))?,
            n_heads,
            head_dim,
        })
    }

    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, l, _) = x.dims3()?;
        x.reshape((b, l, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }
}

impl Module for MultiHeadSelfAttention {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, l, d) = x.dims3()?;
        let q = self.split_heads(&self.wq.forward(x)?)?;
        let k = self.split_heads(&self.wk.forward(x)?)?;
        let v = self.split_heads(&self.wv.forward(x)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;
        let probs = nn::ops::softmax(&scores, D::Minus1)?;
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, l, d))?;
        self.wo.forward(&context)
    }
}

#[derive(Debug, Clone)]
struct FeedForward {
    lin1: nn::Linear,
    lin2: nn::Linear,
}

impl FeedForward {
    fn new(dim: usize, mult_ff: usize, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            lin1: nn::linear(dim, dim * mult_ff, vb.pp("lin1"))?,
            lin2: nn::linear(dim * mult_ff, dim, vb.pp("lin2"))?,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.lin2.forward(&self.lin1.forward(x)?.gelu()?)
    }
}

/// One post-norm transformer encoder layer.
#[derive(Debug, Clone)]
struct EncoderLayer {
    attn: MultiHeadSelfAttention,
    ff: FeedForward,
    ln1: nn::LayerNorm,
    ln2: nn::LayerNorm,
    dropout: nn::Dropout,
}

impl EncoderLayer {
    fn new(dim: usize, n_heads: usize, mult_ff: usize, dropout: f32, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            attn: MultiHeadSelfAttention::new(dim, n_heads, &vb.pp("attn"))?,
            ff: FeedForward::new(dim, mult_ff, &vb.pp("ff"))?,
            ln1: nn::layer_norm(dim, nn::LayerNormConfig::default(), vb.pp("ln1"))?,
            ln2: nn::layer_norm(dim, nn::LayerNormConfig::default(), vb.pp("ln2"))?,
            dropout: nn::Dropout::new(dropout),
        })
    }

    fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let attn_out = self.dropout.forward(&self.attn.forward(x)?, train)?;
        let x = self.ln1.forward(&(x + attn_out)?)?;
        let ff_out = self.dropout.forward(&self.ff.forward(&x)?, train)?;
        self.ln2.forward(&(&x + ff_out)?)
    }
}

/// Per-family sequence encoder: token embedding, positional encoding and a
/// stack of self-attention layers, mapping a `(batch, max_len)` id tensor to
/// `(batch, max_len, dim)` per-position embeddings.
#[derive(Debug, Clone)]
pub struct SeqEncoder {
    embedding: nn::Embedding,
    pos_encoder: PositionalEncoding,
    layers: Vec<EncoderLayer>,
    dropout: nn::Dropout,
    dim: usize,
}

impl SeqEncoder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n_vocabs: usize,
        dim: usize,
        n_layers: usize,
        n_heads: usize,
        mult_ff: usize,
        dropout: f32,
        max_len: usize,
        vb: &VarBuilder,
        device: &Device,
    ) -> Result<Self> {
        let embedding = nn::embedding(n_vocabs, dim, vb.pp("embedding"))?;
        let pos_encoder = PositionalEncoding::new(dim, max_len, device)?;
        let mut layers = Vec::with_capacity(n_layers);
        for i in 0..n_layers {
            layers.push(EncoderLayer::new(
                dim,
                n_heads,
                mult_ff,
                dropout,
                &vb.pp(format!("layers.{i}")),
            )?);
        }
        Ok(Self {
            embedding,
            pos_encoder,
            layers,
            dropout: nn::Dropout::new(dropout),
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn forward(&self, ids: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.embedding.forward(&ids.to_dtype(DType::U32)?)?;
        let x = (x * (self.dim as f64).sqrt())?;
        let x = self.pos_encoder.forward(&x)?;
        let mut x = self.dropout.forward(&x, train)?;
        for layer in &self.layers {
            x = layer.forward(&x, train)?;
        }
        Ok(x)
    }
}

/// Combines the two per-position embedding batches into one pairwise
/// interaction map per pair, `(batch, 1, apta_len, prot_len)`.
///
/// Each family is projected into a shared interaction space first, then the
/// map is the scaled dot product of every position pair.
#[derive(Debug, Clone)]
pub struct InteractionMapper {
    proj_apta: nn::Linear,
    proj_prot: nn::Linear,
    dim: usize,
}

impl InteractionMapper {
    pub fn new(dim: usize, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            proj_apta: nn::linear(dim, dim, vb.pp("proj_apta"))?,
            proj_prot: nn::linear(dim, dim, vb.pp("proj_prot"))?,
            dim,
        })
    }

    pub fn forward(&self, apta_encoded: &Tensor, prot_encoded: &Tensor) -> Result<Tensor> {
        let a = self.proj_apta.forward(apta_encoded)?;
        let p = self.proj_prot.forward(prot_encoded)?;
        let scale = 1.0 / (self.dim as f64).sqrt();
        let map = (a.matmul(&p.transpose(1, 2)?.contiguous()?)? * scale)?;
        map.unsqueeze(1)
    }
}

fn pool_if_possible(x: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    if h >= 2 && w >= 2 {
        x.max_pool2d(2)
    } else {
        Ok(x.clone())
    }
}

/// Convolutional reduction of the interaction map to a per-pair feature
/// vector `(batch, channels)`.
#[derive(Debug, Clone)]
pub struct ConvBlocks {
    conv1: nn::Conv2d,
    conv2: nn::Conv2d,
}

impl ConvBlocks {
    pub fn new(channels: usize, vb: &VarBuilder) -> Result<Self> {
        let cfg = nn::Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        Ok(Self {
            conv1: nn::conv2d(1, channels, 3, cfg, vb.pp("conv1"))?,
            conv2: nn::conv2d(channels, channels, 3, cfg, vb.pp("conv2"))?,
        })
    }
}

impl Module for ConvBlocks {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = pool_if_possible(&self.conv1.forward(x)?.gelu()?)?;
        let x = pool_if_possible(&self.conv2.forward(&x)?.gelu()?)?;
        // global average over both spatial axes
        x.mean(D::Minus1)?.mean(D::Minus1)
    }
}

/// Classifier head reducing the conv features to one interaction logit per
/// pair, `(batch, 1)`.
#[derive(Debug, Clone)]
pub struct PredictorHead {
    lin1: nn::Linear,
    lin2: nn::Linear,
    dropout: nn::Dropout,
}

impl PredictorHead {
    pub fn new(channels: usize, dropout: f32, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            lin1: nn::linear(channels, channels / 2, vb.pp("lin1"))?,
            lin2: nn::linear(channels / 2, 1, vb.pp("lin2"))?,
            dropout: nn::Dropout::new(dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.dropout.forward(&self.lin1.forward(x)?.gelu()?, train)?;
        self.lin2.forward(&x)
    }
}

/// Pretraining head: per-position masked-token reconstruction logits from
/// the masked view and structure-class logits from the original view.
#[derive(Debug, Clone)]
pub struct TokenPredictor {
    mlm: nn::Linear,
    ssp: nn::Linear,
}

impl TokenPredictor {
    pub fn new(dim: usize, n_vocabs: usize, n_target_vocabs: usize, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            mlm: nn::linear(dim, n_vocabs, vb.pp("mlm"))?,
            ssp: nn::linear(dim, n_target_vocabs, vb.pp("ssp"))?,
        })
    }

    /// Returns `(mlm_logits, ssp_logits)` with shapes
    /// `(batch, len, n_vocabs)` and `(batch, len, n_target_vocabs)`.
    pub fn forward(&self, masked_encoded: &Tensor, encoded: &Tensor) -> Result<(Tensor, Tensor)> {
        Ok((self.mlm.forward(masked_encoded)?, self.ssp.forward(encoded)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn builder(varmap: &VarMap, device: &Device) -> VarBuilder<'static> {
        VarBuilder::from_varmap(varmap, DType::F32, device)
    }

    #[test]
    fn encoder_output_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = builder(&varmap, &device);
        let encoder = SeqEncoder::new(32, 16, 2, 4, 2, 0.1, 12, &vb, &device)?;

        let ids = Tensor::zeros((3, 12), DType::U32, &device)?;
        let out = encoder.forward(&ids, false)?;
        assert_eq!(out.dims3()?, (3, 12, 16));
        Ok(())
    }

    #[test]
    fn interaction_map_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = builder(&varmap, &device);
        let mapper = InteractionMapper::new(16, &vb)?;

        let a = Tensor::randn(0f32, 1f32, (2, 10, 16), &device)?;
        let p = Tensor::randn(0f32, 1f32, (2, 24, 16), &device)?;
        let map = mapper.forward(&a, &p)?;
        assert_eq!(map.dims4()?, (2, 1, 10, 24));
        Ok(())
    }

    #[test]
    fn conv_reduces_small_maps_without_panicking() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = builder(&varmap, &device);
        let conv = ConvBlocks::new(8, &vb)?;

        for (h, w) in [(1usize, 1usize), (3, 2), (16, 24)] {
            let map = Tensor::randn(0f32, 1f32, (2, 1, h, w), &device)?;
            let out = conv.forward(&map)?;
            assert_eq!(out.dims2()?, (2, 8));
        }
        Ok(())
    }

    #[test]
    fn token_predictor_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = builder(&varmap, &device);
        let head = TokenPredictor::new(16, 127, 344, &vb)?;

        let encoded = Tensor::randn(0f32, 1f32, (2, 12, 16), &device)?;
        let (mlm, ssp) = head.forward(&encoded, &encoded)?;
        assert_eq!(mlm.dims3()?, (2, 12, 127));
        assert_eq!(ssp.dims3()?, (2, 12, 344));
        Ok(())
    }
}
