//! Panorama decoding.
//!
//! 8-bit sources (PNG, JPEG) are tagged sRGB; float sources (Radiance HDR,
//! OpenEXR) are tagged linear and marked HDR. Other sample types are
//! narrowed to 8 bits.

use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use xrbake_backend_ibl::{ColorSpace, PanoramaImage, PixelData};

/// Convert a decoded image into a panorama.
pub fn panorama_from_image(image: DynamicImage) -> Result<PanoramaImage> {
    let (width, height) = (image.width(), image.height());
    let (channels, pixels, space) = match image {
        DynamicImage::ImageRgb32F(buf) => (3, PixelData::F32(buf.into_raw()), ColorSpace::Linear),
        DynamicImage::ImageRgba32F(buf) => (4, PixelData::F32(buf.into_raw()), ColorSpace::Linear),
        other if other.color().has_alpha() => (
            4,
            PixelData::U8(other.to_rgba8().into_raw()),
            ColorSpace::Srgb,
        ),
        other => (3, PixelData::U8(other.to_rgb8().into_raw()), ColorSpace::Srgb),
    };
    Ok(PanoramaImage::new(width, height, channels, pixels, space)?)
}

/// Decode an in-memory panorama, guessing the format from its header.
pub fn decode_panorama(bytes: &[u8]) -> Result<PanoramaImage> {
    let image = image::load_from_memory(bytes).context("failed to decode panorama")?;
    panorama_from_image(image)
}

/// Load and decode the panorama at `path`.
pub fn load_panorama(path: &Path) -> Result<PanoramaImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode panorama: {}", path.display()))?;
    panorama_from_image(image)
        .with_context(|| format!("unusable panorama: {}", path.display()))
}
