//! The draw-call seam between the IBL renderer and a rasterizer.
//!
//! A [`DrawExecutor`] owns textures and executes full-screen passes into
//! offscreen targets. Every draw is synchronous: the returned texture holds
//! the finished result and may be read back immediately.

use crate::error::IblError;
use crate::panorama::FloatImage;

/// Size key for pooled textures and render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub width: u32,
    pub height: u32,
    /// HDR targets keep full float precision; others may be stored as 8-bit.
    pub hdr: bool,
}

impl TargetKey {
    pub fn new(width: u32, height: u32, hdr: bool) -> Self {
        Self { width, height, hdr }
    }
}

/// Handle to an executor-owned texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

/// How the packed specular map stores each texel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecularEncoding {
    /// HDR values in RGBD form.
    Rgbd,
    /// sRGB-encoded color with opaque alpha.
    Srgb,
}

/// A full-screen pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pass {
    /// Bilinear resample of one input to the target size.
    Resample,
    /// One separable Gaussian pass; horizontal taps wrap, vertical taps clamp.
    Blur {
        axis: BlurAxis,
        sigma: f32,
        radius: u32,
    },
    /// Resample, optionally ACES tone-map, and optionally sRGB-encode.
    Skybox { tone_map: bool, encode_srgb: bool },
    /// Pack `levels` inputs into a square mip cascade, see [`specular_regions`].
    Specular {
        encoding: SpecularEncoding,
        levels: u32,
    },
}

impl Pass {
    pub fn name(&self) -> &'static str {
        match self {
            Pass::Resample => "resample",
            Pass::Blur { .. } => "blur",
            Pass::Skybox { .. } => "skybox",
            Pass::Specular { .. } => "specular",
        }
    }

    /// Number of input textures the pass consumes.
    pub fn input_count(&self) -> usize {
        match self {
            Pass::Specular { levels, .. } => *levels as usize,
            _ => 1,
        }
    }
}

/// Executes the renderer's draw calls.
pub trait DrawExecutor {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Upload a linear float image as a sampleable texture.
    fn upload(&mut self, image: &FloatImage, key: TargetKey) -> Result<TextureId, IblError>;

    /// Run `pass` over `inputs` into a fresh target of size `target`.
    fn draw(
        &mut self,
        pass: &Pass,
        inputs: &[TextureId],
        target: TargetKey,
    ) -> Result<TextureId, IblError>;

    /// Read a texture back to host memory.
    fn read(&mut self, texture: TextureId) -> Result<FloatImage, IblError>;

    /// Return a texture to the executor's pool.
    fn release(&mut self, texture: TextureId);
}

/// Placement of one mip level inside the packed specular map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipRegion {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Regions of a `size` × `size` specular map holding `levels` mips.
///
/// Level `i` is `size / 2^i` wide and `size / 2^(i+1)` tall, left-aligned,
/// and stacked below level `i - 1`; mip 0 fills the top half. Levels that
/// would be empty are dropped.
pub fn specular_regions(size: u32, levels: u32) -> Vec<MipRegion> {
    let mut regions = Vec::new();
    let mut y = 0;
    for level in 0..levels.min(31) {
        let width = size >> level;
        let height = size >> (level + 1);
        if width == 0 || height == 0 {
            break;
        }
        regions.push(MipRegion {
            level,
            x: 0,
            y,
            width,
            height,
        });
        y += height;
    }
    regions
}

pub(crate) fn check_inputs(pass: &Pass, inputs: &[TextureId]) -> Result<(), IblError> {
    if inputs.len() != pass.input_count() {
        return Err(IblError::backend(format!(
            "{} pass expects {} inputs, got {}",
            pass.name(),
            pass.input_count(),
            inputs.len()
        )));
    }
    Ok(())
}

/// Normalized Gaussian weights for offsets `-radius..=radius`.
pub(crate) fn gaussian_weights(sigma: f32, radius: u32) -> Vec<f32> {
    let sigma = sigma.max(1e-3);
    let r = radius as i64;
    let raw: Vec<f32> = (-r..=r)
        .map(|k| (-((k * k) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = raw.iter().sum();
    raw.into_iter().map(|w| w / sum).collect()
}
