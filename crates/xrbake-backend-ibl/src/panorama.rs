//! Decoded equirectangular panoramas and the float working image.

use crate::error::{IblError, Warning, WarningCode};
use crate::tonemap::{srgb_to_linear, unit_to_u8};

/// Color encoding of panorama pixel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Linear,
    Srgb,
    /// Untagged source; values are used as they are.
    Unknown,
}

/// Pixel storage of a panorama, one value per channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An equirectangular environment image as decoded from disk.
///
/// Rows run from the zenith (top) to the nadir; columns cover one full turn of
/// azimuth.
#[derive(Debug, Clone, PartialEq)]
pub struct PanoramaImage {
    pub width: u32,
    pub height: u32,
    /// 3 (RGB) or 4 (RGBA).
    pub channels: u8,
    /// True for floating-point sources with values above 1.
    pub hdr: bool,
    pub premultiplied_alpha: bool,
    pub color_space: ColorSpace,
    pub pixels: PixelData,
}

impl PanoramaImage {
    /// Build a validated panorama. `hdr` follows the pixel storage type.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        pixels: PixelData,
        color_space: ColorSpace,
    ) -> Result<Self, IblError> {
        let hdr = matches!(pixels, PixelData::F32(_));
        let image = Self {
            width,
            height,
            channels,
            hdr,
            premultiplied_alpha: false,
            color_space,
            pixels,
        };
        image.validate()?;
        Ok(image)
    }

    pub fn with_premultiplied_alpha(mut self, premultiplied: bool) -> Self {
        self.premultiplied_alpha = premultiplied;
        self
    }

    pub fn validate(&self) -> Result<(), IblError> {
        if self.width == 0 || self.height == 0 {
            return Err(IblError::invalid(format!(
                "panorama has zero dimension {}x{}",
                self.width, self.height
            )));
        }
        if self.channels != 3 && self.channels != 4 {
            return Err(IblError::invalid(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        let expected = (self.width as u64)
            .checked_mul(self.height as u64)
            .and_then(|n| n.checked_mul(self.channels as u64))
            .ok_or_else(|| IblError::invalid("panorama dimensions overflow"))?;
        if self.pixels.len() as u64 != expected {
            return Err(IblError::invalid(format!(
                "expected {} values for {}x{}x{}, got {}",
                expected,
                self.width,
                self.height,
                self.channels,
                self.pixels.len()
            )));
        }
        Ok(())
    }

    /// Raw stored value of the texel at (`x`, `y`) as RGB, without any
    /// normalization or color conversion.
    pub fn raw_rgb(&self, x: u32, y: u32) -> [f32; 3] {
        let i = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        match &self.pixels {
            PixelData::U8(v) => [v[i] as f32, v[i + 1] as f32, v[i + 2] as f32],
            PixelData::F32(v) => [v[i], v[i + 1], v[i + 2]],
        }
    }

    /// Convert to linear, straight-alpha RGBA floats.
    ///
    /// 8-bit values are normalized to `[0, 1]` and sRGB sources are decoded.
    /// An unknown color space is passed through with a warning.
    pub fn to_linear(&self, warnings: &mut Vec<Warning>) -> FloatImage {
        if self.color_space == ColorSpace::Unknown {
            warnings.push(Warning::new(
                WarningCode::UnknownColorSpace,
                "panorama color space unknown; values used without conversion",
            ));
        }
        let channels = self.channels as usize;
        let count = self.width as usize * self.height as usize;
        let mut data = Vec::with_capacity(count);
        for i in 0..count {
            let base = i * channels;
            let mut texel = [0.0f32, 0.0, 0.0, 1.0];
            for (c, slot) in texel.iter_mut().enumerate().take(channels) {
                *slot = match &self.pixels {
                    PixelData::U8(v) => v[base + c] as f32 / 255.0,
                    PixelData::F32(v) => v[base + c],
                };
            }
            if self.premultiplied_alpha && channels == 4 && texel[3] > 0.0 {
                for c in 0..3 {
                    texel[c] /= texel[3];
                }
            }
            if self.color_space == ColorSpace::Srgb {
                for c in texel.iter_mut().take(3) {
                    *c = srgb_to_linear(*c);
                }
            }
            data.push(texel);
        }
        FloatImage {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// Linear RGBA float image used between draw passes.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<[f32; 4]>,
}

impl FloatImage {
    pub fn new(width: u32, height: u32, fill: [f32; 4]) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, texel: [f32; 4]) {
        let i = y as usize * self.width as usize + x as usize;
        self.data[i] = texel;
    }

    /// Bilinear sample at normalized coordinates; `u` wraps around the
    /// panorama seam, `v` clamps at the poles.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let w = self.width as i64;
        let h = self.height as i64;
        let fx = u * self.width as f32 - 0.5;
        let fy = v * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let wrap = |x: i64| x.rem_euclid(w) as u32;
        let clamp = |y: i64| y.clamp(0, h - 1) as u32;
        let a = self.get(wrap(x0), clamp(y0));
        let b = self.get(wrap(x0 + 1), clamp(y0));
        let c = self.get(wrap(x0), clamp(y0 + 1));
        let d = self.get(wrap(x0 + 1), clamp(y0 + 1));

        let mut out = [0.0f32; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * tx;
            let bottom = c[i] + (d[i] - c[i]) * tx;
            out[i] = top + (bottom - top) * ty;
        }
        out
    }

    /// Quantize unit-range channels to 8-bit RGBA.
    pub fn to_rgba8(&self) -> Rgba8Image {
        let pixels = self
            .data
            .iter()
            .flat_map(|texel| texel.map(unit_to_u8))
            .collect();
        Rgba8Image {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

/// 8-bit RGBA pixels, row-major, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rgba8Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Rgba8Image {
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// Pixels with alpha dropped.
    pub fn to_rgb8(&self) -> Vec<u8> {
        self.pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_u8(width: u32, height: u32, value: u8, space: ColorSpace) -> PanoramaImage {
        let pixels = PixelData::U8(vec![value; (width * height * 3) as usize]);
        PanoramaImage::new(width, height, 3, pixels, space).unwrap()
    }

    #[test]
    fn test_validation() {
        let err = PanoramaImage::new(0, 4, 3, PixelData::U8(Vec::new()), ColorSpace::Srgb)
            .unwrap_err();
        assert!(err.is_invalid_input());

        let err = PanoramaImage::new(2, 1, 2, PixelData::U8(vec![0; 4]), ColorSpace::Srgb)
            .unwrap_err();
        assert!(err.is_invalid_input());

        let err = PanoramaImage::new(2, 1, 3, PixelData::U8(vec![0; 5]), ColorSpace::Srgb)
            .unwrap_err();
        assert!(err.is_invalid_input());

        let ok = PanoramaImage::new(2, 1, 4, PixelData::F32(vec![0.0; 8]), ColorSpace::Linear)
            .unwrap();
        assert!(ok.hdr);
    }

    #[test]
    fn test_to_linear_decodes_srgb() {
        let image = gray_u8(2, 1, 255, ColorSpace::Srgb);
        let mut warnings = Vec::new();
        let linear = image.to_linear(&mut warnings);
        assert!(warnings.is_empty());
        assert!((linear.get(0, 0)[0] - 1.0).abs() < 1e-6);
        assert_eq!(linear.get(1, 0)[3], 1.0);

        let image = gray_u8(2, 1, 128, ColorSpace::Srgb);
        let linear = image.to_linear(&mut warnings);
        assert!((linear.get(0, 0)[1] - 0.2158605).abs() < 1e-4);
    }

    #[test]
    fn test_unknown_color_space_warns_and_passes_through() {
        let image = gray_u8(2, 1, 51, ColorSpace::Unknown);
        let mut warnings = Vec::new();
        let linear = image.to_linear(&mut warnings);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WarningCode::UnknownColorSpace);
        assert!((linear.get(0, 0)[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_premultiplied_alpha_is_undone() {
        let pixels = PixelData::F32(vec![0.25, 0.5, 0.0, 0.5]);
        let image = PanoramaImage::new(1, 1, 4, pixels, ColorSpace::Linear)
            .unwrap()
            .with_premultiplied_alpha(true);
        let linear = image.to_linear(&mut Vec::new());
        assert_eq!(linear.get(0, 0), [0.5, 1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_sample_wraps_horizontally_and_clamps_vertically() {
        let mut image = FloatImage::new(4, 2, [0.0; 4]);
        image.set(0, 0, [1.0; 4]);
        image.set(3, 0, [3.0; 4]);
        // Halfway between the last and the first column.
        let seam = image.sample(1.0, 0.25);
        assert!((seam[0] - 2.0).abs() < 1e-6);
        // Above the top row clamps to it.
        let top = image.sample(0.125, 0.0);
        assert!((top[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_to_rgba8_and_rgb8() {
        let image = FloatImage::new(1, 1, [1.0, 0.5, 0.0, 1.0]);
        let rgba = image.to_rgba8();
        assert_eq!(rgba.texel(0, 0), [255, 128, 0, 255]);
        assert_eq!(rgba.to_rgb8(), vec![255, 128, 0]);
    }
}
