//! Configuration for the patch embedding layer.

use serde::Deserialize;

use crate::normalization::NormKind;

/// A `(height, width)` pair.
///
/// Construction sites accept either a scalar (broadcast to a square) or an
/// explicit pair, matching the `int | (int, int)` convention of ViT configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size2(pub usize, pub usize);

impl Size2 {
    pub fn h(&self) -> usize {
        self.0
    }

    pub fn w(&self) -> usize {
        self.1
    }
}

impl From<usize> for Size2 {
    fn from(s: usize) -> Self {
        Size2(s, s)
    }
}

impl From<(usize, usize)> for Size2 {
    fn from((h, w): (usize, usize)) -> Self {
        Size2(h, w)
    }
}

impl<'de> Deserialize<'de> for Size2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // HF configs write sizes as either a bare int or a two-element list.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Square(usize),
            Pair(usize, usize),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Square(s) => Size2(s, s),
            Raw::Pair(h, w) => Size2(h, w),
        })
    }
}

/// Configuration for [`PatchEmbed`](crate::PatchEmbed).
///
/// Defaults are the ViT-Base ones: 224px images, 16px patches, RGB input,
/// 768-dim embeddings, flattened output, no normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchEmbedConfig {
    #[serde(default = "default_image_size")]
    pub image_size: Size2,
    #[serde(default = "default_patch_size")]
    pub patch_size: Size2,
    #[serde(default = "default_in_channels", alias = "num_channels", alias = "in_chans")]
    pub in_channels: usize,
    #[serde(default = "default_embed_dim", alias = "hidden_size")]
    pub embed_dim: usize,
    #[serde(default = "default_flatten")]
    pub flatten: bool,
    #[serde(default)]
    pub norm: NormKind,
}

fn default_image_size() -> Size2 {
    Size2(224, 224)
}

fn default_patch_size() -> Size2 {
    Size2(16, 16)
}

fn default_in_channels() -> usize {
    3
}

fn default_embed_dim() -> usize {
    768
}

fn default_flatten() -> bool {
    true
}

impl Default for PatchEmbedConfig {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
            patch_size: default_patch_size(),
            in_channels: default_in_channels(),
            embed_dim: default_embed_dim(),
            flatten: default_flatten(),
            norm: NormKind::default(),
        }
    }
}

impl PatchEmbedConfig {
    pub fn new(
        image_size: impl Into<Size2>,
        patch_size: impl Into<Size2>,
        in_channels: usize,
        embed_dim: usize,
    ) -> Self {
        Self {
            image_size: image_size.into(),
            patch_size: patch_size.into(),
            in_channels,
            embed_dim,
            ..Self::default()
        }
    }

    /// Keep the output as a `[B, embed_dim, grid_h, grid_w]` feature map
    /// instead of a flattened patch sequence.
    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    pub fn with_norm(mut self, norm: NormKind) -> Self {
        self.norm = norm;
        self
    }

    /// Tolerant parse of an HF-style `vision_config` JSON object; missing
    /// fields fall back to the ViT-Base defaults.
    pub fn from_json(v: &serde_json::Value) -> Self {
        let g = |keys: &[&str], default: usize| {
            keys.iter()
                .find_map(|key| v.get(key).and_then(|x| x.as_u64()))
                .unwrap_or(default as u64) as usize
        };
        let size = |key: &str, default: usize| {
            v.get(key)
                .and_then(|x| serde_json::from_value::<Size2>(x.clone()).ok())
                .unwrap_or(Size2(default, default))
        };
        Self {
            image_size: size("image_size", 224),
            patch_size: size("patch_size", 16),
            in_channels: g(&["num_channels", "in_chans"], 3),
            embed_dim: g(&["hidden_size", "embed_dim"], 768),
            ..Self::default()
        }
    }

    /// Patches per spatial dimension, `(grid_h, grid_w)`.
    ///
    /// Floor division: a non-divisible image/patch pairing silently truncates,
    /// matching strided-convolution output sizing. No validation happens here.
    pub fn grid_size(&self) -> (usize, usize) {
        (
            self.image_size.h() / self.patch_size.h(),
            self.image_size.w() / self.patch_size.w(),
        )
    }

    /// Total number of patches, i.e. the output sequence length when
    /// flattening.
    pub fn num_patches(&self) -> usize {
        let (gh, gw) = self.grid_size();
        gh * gw
    }
}
