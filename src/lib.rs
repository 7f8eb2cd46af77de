//! Image-to-patch embedding for vision transformers.
//!
//! Converts a batch of images `[B, C, H, W]` into a sequence of per-patch
//! embedding vectors `[B, num_patches, embed_dim]`, the input stage of a
//! ViT-style encoder:
//!
//! 1. A strided Conv2d (kernel = stride = patch size, no padding) projects
//!    each non-overlapping patch independently with shared weights.
//! 2. The spatial grid is optionally flattened row-major and transposed to
//!    put the patch axis before the embedding axis.
//! 3. An optional normalization is applied over the embedding axis.
//!
//! Weight paths follow the HF/timm convention: `proj.{weight,bias}` for the
//! projection, `norm.{weight,bias}` when a learned norm is selected.
//!
//! # Example
//!
//! ```ignore
//! use candle_core::{DType, Device, Module, Tensor};
//! use candle_nn::VarBuilder;
//! use patch_embed::{PatchEmbed, PatchEmbedConfig};
//!
//! let cfg = PatchEmbedConfig::new(224, 16, 3, 768);
//! let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
//! let embed = PatchEmbed::new(&cfg, vb)?;
//!
//! let pixel_values = Tensor::zeros((1, 3, 224, 224), DType::F32, &Device::Cpu)?;
//! let patches = embed.forward(&pixel_values)?; // [1, 196, 768]
//! ```

pub mod config;
pub mod embed;
pub mod error;
pub mod normalization;

pub use config::{PatchEmbedConfig, Size2};
pub use embed::PatchEmbed;
pub use error::PatchEmbedError;
pub use normalization::{NormKind, PatchNorm};
