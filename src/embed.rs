//! The patch embedding layer.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};
use tracing::debug;

use crate::config::{PatchEmbedConfig, Size2};
use crate::error::PatchEmbedError;
use crate::normalization::PatchNorm;

/// 2D image to patch embedding.
///
/// A Conv2d with kernel = stride = patch size and no padding slices the image
/// into a grid of non-overlapping patches and linearly projects each one with
/// shared weights. With `flatten` (the default) the grid is collapsed
/// row-major and transposed to `[B, num_patches, embed_dim]`; otherwise the
/// `[B, embed_dim, grid_h, grid_w]` feature map is returned as-is. An optional
/// normalization runs over the embedding axis last.
///
/// Weight paths: `proj.{weight,bias}`, plus `norm.{weight,bias}` when a
/// learned norm is configured.
pub struct PatchEmbed {
    proj: Conv2d,
    norm: PatchNorm,
    image_size: Size2,
    patch_size: Size2,
    grid_size: (usize, usize),
    num_patches: usize,
    embed_dim: usize,
    flatten: bool,
}

impl PatchEmbed {
    pub fn new(cfg: &PatchEmbedConfig, vb: VarBuilder) -> Result<Self> {
        let Size2(ph, pw) = cfg.patch_size;
        let vb_proj = vb.pp("proj");
        let weight = vb_proj.get((cfg.embed_dim, cfg.in_channels, ph, pw), "weight")?;
        let bias = vb_proj.get(cfg.embed_dim, "bias")?;
        // The stride only drives the conv fast path, which requires square
        // patches; rectangular patches go through `im2patches` instead.
        let conv_cfg = Conv2dConfig {
            stride: ph,
            ..Default::default()
        };
        let proj = Conv2d::new(weight, Some(bias), conv_cfg);
        let norm = PatchNorm::new(cfg.norm, cfg.embed_dim, vb.pp("norm"))?;

        let grid_size = cfg.grid_size();
        let num_patches = cfg.num_patches();
        debug!(
            image_size = ?cfg.image_size,
            patch_size = ?cfg.patch_size,
            grid = ?grid_size,
            num_patches,
            embed_dim = cfg.embed_dim,
            "initialized patch embedding"
        );

        Ok(Self {
            proj,
            norm,
            image_size: cfg.image_size,
            patch_size: cfg.patch_size,
            grid_size,
            num_patches,
            embed_dim: cfg.embed_dim,
            flatten: cfg.flatten,
        })
    }

    pub fn image_size(&self) -> Size2 {
        self.image_size
    }

    pub fn patch_size(&self) -> Size2 {
        self.patch_size
    }

    /// `(grid_h, grid_w)` patches per spatial dimension.
    pub fn grid_size(&self) -> (usize, usize) {
        self.grid_size
    }

    /// Output sequence length when flattening.
    pub fn num_patches(&self) -> usize {
        self.num_patches
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// `[B, C, H, W]` → `[B, embed_dim, grid_h, grid_w]`.
    fn project(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let Size2(ph, pw) = self.patch_size;
        if ph == pw {
            return self.proj.forward(pixel_values);
        }

        // candle's conv2d stride is a single scalar, so rectangular patches
        // cannot be expressed as a strided conv directly. Unfold the grid by
        // hand and apply the same projection as a matmul.
        let (b, _c, _h, _w) = pixel_values.dims4()?;
        let (gh, gw) = self.grid_size;
        let patches = im2patches(pixel_values, ph, pw)?; // [B, gh*gw, C*ph*pw]
        let weight = self.proj.weight().flatten_from(1)?; // [D, C*ph*pw]
        let mut out = patches.broadcast_matmul(&weight.t()?)?; // [B, gh*gw, D]
        if let Some(bias) = self.proj.bias() {
            out = out.broadcast_add(bias)?;
        }
        out.transpose(1, 2)?
            .contiguous()?
            .reshape((b, self.embed_dim, gh, gw))
    }
}

impl Module for PatchEmbed {
    /// `pixel_values`: `[B, C, H, W]` → `[B, num_patches, embed_dim]`
    /// (or `[B, embed_dim, grid_h, grid_w]` when `flatten` is off).
    ///
    /// Fails with [`PatchEmbedError::ShapeMismatch`] before any projection
    /// runs if `(H, W)` disagrees with the configured image size. The channel
    /// count is not checked here; a mismatch surfaces from the projection.
    fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let (_b, _c, h, w) = pixel_values.dims4()?;
        let Size2(ih, iw) = self.image_size;
        if (h, w) != (ih, iw) {
            return Err(candle_core::Error::wrap(PatchEmbedError::ShapeMismatch {
                expected_h: ih,
                expected_w: iw,
                actual_h: h,
                actual_w: w,
            }));
        }

        let x = self.project(pixel_values)?;
        let x = if self.flatten {
            // [B, D, gh, gw] → [B, D, gh*gw] → [B, gh*gw, D], row-major.
            x.flatten(2, 3)?.transpose(1, 2)?
        } else {
            x
        };
        self.norm.forward(&x)
    }
}

/// Unfold `[B, C, gh*ph, gw*pw]` into `[B, gh*gw, C*ph*pw]`, row-major over
/// the patch grid. Trailing rows/columns beyond the last full patch are
/// dropped, matching strided-conv output sizing.
fn im2patches(xs: &Tensor, ph: usize, pw: usize) -> Result<Tensor> {
    let (b, c, h, w) = xs.dims4()?;
    let (gh, gw) = (h / ph, w / pw);
    let xs = xs
        .narrow(2, 0, gh * ph)?
        .narrow(3, 0, gw * pw)?
        .contiguous()?;
    let xs = xs.reshape((b, c, gh, ph, gw, pw))?;
    let xs = xs.permute((0, 2, 4, 1, 3, 5))?; // [B, gh, gw, C, ph, pw]
    xs.contiguous()?.reshape((b, gh * gw, c * ph * pw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use crate::normalization::NormKind;

    #[test]
    fn flattened_output_shape() {
        let device = Device::Cpu;
        let cfg = PatchEmbedConfig::new(32, 8, 3, 96);
        let vb = VarBuilder::zeros(DType::F32, &device);
        let embed = PatchEmbed::new(&cfg, vb).unwrap();
        assert_eq!(embed.grid_size(), (4, 4));
        assert_eq!(embed.num_patches(), 16);

        let pixel_values = Tensor::randn(0.0f32, 1.0, (2, 3, 32, 32), &device).unwrap();
        let out = embed.forward(&pixel_values).unwrap();
        assert_eq!(out.dims(), &[2, 16, 96]);
    }

    #[test]
    fn unflattened_output_shape() {
        let device = Device::Cpu;
        let cfg = PatchEmbedConfig::new(32, 8, 3, 96).with_flatten(false);
        let vb = VarBuilder::zeros(DType::F32, &device);
        let embed = PatchEmbed::new(&cfg, vb).unwrap();

        let pixel_values = Tensor::randn(0.0f32, 1.0, (2, 3, 32, 32), &device).unwrap();
        let out = embed.forward(&pixel_values).unwrap();
        assert_eq!(out.dims(), &[2, 96, 4, 4]);
    }

    #[test]
    fn spatial_mismatch_fails_with_both_sizes() {
        let device = Device::Cpu;
        let cfg = PatchEmbedConfig::new(224, 16, 3, 64);
        let vb = VarBuilder::zeros(DType::F32, &device);
        let embed = PatchEmbed::new(&cfg, vb).unwrap();

        let pixel_values = Tensor::zeros((1, 3, 225, 224), DType::F32, &device).unwrap();
        let err = embed.forward(&pixel_values).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("225x224"), "missing actual size: {msg}");
        assert!(msg.contains("224x224"), "missing expected size: {msg}");
    }

    #[test]
    fn rank_mismatch_fails() {
        let device = Device::Cpu;
        let cfg = PatchEmbedConfig::new(16, 8, 3, 32);
        let vb = VarBuilder::zeros(DType::F32, &device);
        let embed = PatchEmbed::new(&cfg, vb).unwrap();

        let pixel_values = Tensor::zeros((3, 16, 16), DType::F32, &device).unwrap();
        assert!(embed.forward(&pixel_values).is_err());
    }

    #[test]
    fn rectangular_patch_output_shape() {
        let device = Device::Cpu;
        let cfg = PatchEmbedConfig::new((4, 6), (2, 3), 3, 10);
        let vb = VarBuilder::zeros(DType::F32, &device);
        let embed = PatchEmbed::new(&cfg, vb).unwrap();
        assert_eq!(embed.grid_size(), (2, 2));

        let pixel_values = Tensor::randn(0.0f32, 1.0, (1, 3, 4, 6), &device).unwrap();
        let out = embed.forward(&pixel_values).unwrap();
        assert_eq!(out.dims(), &[1, 4, 10]);
    }

    #[test]
    fn learned_norm_output_shape() {
        let device = Device::Cpu;
        let cfg = PatchEmbedConfig::new(16, 8, 3, 24)
            .with_norm(NormKind::LayerNorm { eps: 1e-6 });
        let vb = VarBuilder::zeros(DType::F32, &device);
        let embed = PatchEmbed::new(&cfg, vb).unwrap();

        let pixel_values = Tensor::randn(0.0f32, 1.0, (2, 3, 16, 16), &device).unwrap();
        let out = embed.forward(&pixel_values).unwrap();
        assert_eq!(out.dims(), &[2, 4, 24]);
    }

    #[test]
    fn im2patches_row_major_layout() {
        let device = Device::Cpu;
        // 1 channel, 4x4 image, 2x2 patches: values 0..16 row by row.
        let xs = Tensor::arange(0.0f32, 16.0, &device)
            .unwrap()
            .reshape((1, 1, 4, 4))
            .unwrap();
        let patches = im2patches(&xs, 2, 2).unwrap();
        assert_eq!(patches.dims(), &[1, 4, 4]);

        let rows: Vec<Vec<f32>> = patches.squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(rows[0], vec![0.0, 1.0, 4.0, 5.0]); // grid (0,0)
        assert_eq!(rows[1], vec![2.0, 3.0, 6.0, 7.0]); // grid (0,1)
        assert_eq!(rows[2], vec![8.0, 9.0, 12.0, 13.0]); // grid (1,0)
        assert_eq!(rows[3], vec![10.0, 11.0, 14.0, 15.0]); // grid (1,1)
    }
}
