use candle_core::{Module, Result, Tensor};
use candle_nn::{LayerNorm, VarBuilder};
use serde::Deserialize;

/// Which normalization the layer applies to its output.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormKind {
    /// No normalization; the projected patches pass through unchanged.
    #[default]
    Identity,
    /// Learned LayerNorm over the trailing (embedding) axis, loaded from
    /// `norm.{weight,bias}`.
    LayerNorm { eps: f64 },
}

/// Output normalization for [`PatchEmbed`](crate::PatchEmbed).
///
/// `Identity` is an exact no-op so that a layer built without a norm produces
/// the raw projected patches bit-for-bit.
#[derive(Clone, Debug)]
pub enum PatchNorm {
    Identity,
    LayerNorm(LayerNorm),
}

impl PatchNorm {
    pub fn new(kind: NormKind, dim: usize, vb: VarBuilder) -> Result<Self> {
        match kind {
            NormKind::Identity => Ok(Self::Identity),
            NormKind::LayerNorm { eps } => {
                Ok(Self::LayerNorm(candle_nn::layer_norm(dim, eps, vb)?))
            }
        }
    }
}

impl Module for PatchNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Identity => Ok(xs.clone()),
            Self::LayerNorm(ln) => ln.forward(&xs.contiguous()?),
        }
    }
}
