//! Deterministic PNG and JPEG encoding of rendered maps.
//!
//! PNG output uses fixed compression settings so identical pixels always
//! produce identical bytes.

use std::io::Write;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use png::{BitDepth, ColorType, Compression, Encoder, FilterType};

use crate::error::IblError;
use crate::panorama::Rgba8Image;

/// PNG export configuration.
#[derive(Debug, Clone)]
pub struct PngConfig {
    pub compression: Compression,
    pub filter: FilterType,
}

impl Default for PngConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Default,
            filter: FilterType::NoFilter,
        }
    }
}

impl PngConfig {
    /// Smallest files, slowest encode.
    pub fn best_compression() -> Self {
        Self {
            compression: Compression::Best,
            filter: FilterType::Paeth,
        }
    }

    pub fn fast() -> Self {
        Self {
            compression: Compression::Fast,
            filter: FilterType::NoFilter,
        }
    }
}

/// Write 8-bit pixels of `color_type` as PNG to any writer.
pub fn write_raw_to_writer<W: Write>(
    data: &[u8],
    width: u32,
    height: u32,
    color_type: ColorType,
    writer: W,
    config: &PngConfig,
) -> Result<(), IblError> {
    let channels = match color_type {
        ColorType::Grayscale => 1,
        ColorType::GrayscaleAlpha => 2,
        ColorType::Rgb => 3,
        ColorType::Rgba => 4,
        ColorType::Indexed => {
            return Err(IblError::invalid("indexed color is not supported"));
        }
    };
    let expected = width as usize * height as usize * channels;
    if data.len() != expected {
        return Err(IblError::invalid(format!(
            "expected {} bytes for {}x{} {:?}, got {}",
            expected,
            width,
            height,
            color_type,
            data.len()
        )));
    }

    let mut encoder = Encoder::new(writer, width, height);
    encoder.set_color(color_type);
    encoder.set_depth(BitDepth::Eight);
    encoder.set_compression(config.compression);
    encoder.set_filter(config.filter);

    let mut png_writer = encoder.write_header()?;
    png_writer.write_image_data(data)?;
    Ok(())
}

/// Encode an RGBA image as PNG.
pub fn encode_rgba_png(image: &Rgba8Image, config: &PngConfig) -> Result<Vec<u8>, IblError> {
    let mut out = Vec::new();
    write_raw_to_writer(
        &image.pixels,
        image.width,
        image.height,
        ColorType::Rgba,
        &mut out,
        config,
    )?;
    Ok(out)
}

/// Encode an image as baseline JPEG, dropping alpha.
pub fn encode_jpeg(image: &Rgba8Image, quality: u8) -> Result<Vec<u8>, IblError> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder.encode(&rgb, image.width, image.height, ExtendedColorType::Rgb8)?;
    }
    Ok(out)
}

/// BLAKE3 hash of encoded output, hex encoded.
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Rgba8Image {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                pixels.extend([(x * 4) as u8, (y * 4) as u8, 128, 255]);
            }
        }
        Rgba8Image {
            width,
            height,
            pixels,
        }
    }

    #[test]
    fn test_png_deterministic() {
        let image = gradient(64, 32);
        let config = PngConfig::default();
        let a = encode_rgba_png(&image, &config).unwrap();
        let b = encode_rgba_png(&image, &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_bytes(&a), hash_bytes(&b));
        assert_eq!(&a[1..4], b"PNG");
    }

    #[test]
    fn test_png_decodes_back() {
        let image = gradient(16, 8);
        let bytes = encode_rgba_png(&image, &PngConfig::best_compression()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(decoded.into_raw(), image.pixels);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut out = Vec::new();
        let err = write_raw_to_writer(&[0; 5], 2, 1, ColorType::Rgb, &mut out, &PngConfig::fast())
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_jpeg_has_soi_marker_and_size() {
        let image = gradient(32, 16);
        let bytes = encode_jpeg(&image, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }
}
