//! Spherical-harmonic projection (bands 0-2) of a panorama.
//!
//! Directions are z-up. Panorama rows map to polar angle (`v = acos(z) / π`),
//! columns to azimuth (`u = φ / 2π`).

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::IblError;
use crate::panorama::{PanoramaImage, PixelData};

/// Nine RGB coefficients, ordered l=0, l=1 (y, z, x), l=2 (xy, yz, 3z²-1, xz, x²-y²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShCoefficients(pub [[f32; 3]; 9]);

impl ShCoefficients {
    /// Evaluate the represented function in direction `dir` (unit length).
    pub fn evaluate(&self, dir: [f64; 3]) -> [f64; 3] {
        let basis = sh9_basis(dir);
        let mut out = [0.0f64; 3];
        for (k, coeff) in self.0.iter().enumerate() {
            for c in 0..3 {
                out[c] += coeff[c] as f64 * basis[k];
            }
        }
        out
    }
}

/// Real SH basis functions for bands 0-2 at unit direction `dir`.
pub fn sh9_basis(dir: [f64; 3]) -> [f64; 9] {
    let [x, y, z] = dir;
    [
        0.282_095,
        0.488_603 * y,
        0.488_603 * z,
        0.488_603 * x,
        1.092_548 * x * y,
        1.092_548 * y * z,
        0.315_392 * (3.0 * z * z - 1.0),
        1.092_548 * x * z,
        0.546_274 * (x * x - y * y),
    ]
}

/// Project `image` onto the first nine SH basis functions.
///
/// The sphere is sampled on an equal-area `size_x` × `size_y` grid (uniform
/// in `z` and in azimuth), so every cell carries the same solid angle
/// `4π / (size_x · size_y)`. Each cell takes the nearest source texel; 8-bit
/// sources are additionally scaled by `1/255`.
pub fn project_sh9(
    image: &PanoramaImage,
    size_x: u32,
    size_y: u32,
) -> Result<ShCoefficients, IblError> {
    image.validate()?;
    if size_x == 0 || size_y == 0 {
        return Err(IblError::invalid(format!(
            "SH sampling grid {}x{} is empty",
            size_x, size_y
        )));
    }

    let mut weight = 4.0 * PI / (size_x as f64 * size_y as f64);
    if matches!(image.pixels, PixelData::U8(_)) {
        weight /= 255.0;
    }

    let mut acc = [[0.0f64; 3]; 9];
    for j in 0..size_y {
        let z = 1.0 - 2.0 * (j as f64 + 0.5) / size_y as f64;
        let r = (1.0 - z * z).max(0.0).sqrt();
        let v = z.clamp(-1.0, 1.0).acos() / PI;
        let py = ((v * image.height as f64) as u32).min(image.height - 1);
        for i in 0..size_x {
            let u = (i as f64 + 0.5) / size_x as f64;
            let phi = 2.0 * PI * u;
            let dir = [r * phi.cos(), r * phi.sin(), z];
            let px = ((u * image.width as f64) as u32).min(image.width - 1);
            let color = image.raw_rgb(px, py);
            let basis = sh9_basis(dir);
            for (k, b) in basis.iter().enumerate() {
                for c in 0..3 {
                    acc[k][c] += b * weight * color[c] as f64;
                }
            }
        }
    }

    tracing::debug!(size_x, size_y, "projected SH9");
    Ok(ShCoefficients(acc.map(|rgb| rgb.map(|c| c as f32))))
}
