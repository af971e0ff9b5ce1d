//! Software rasterizer implementing every pass on the host.
//!
//! Released targets are kept in a pool keyed by [`TargetKey`] and handed out
//! again for draws of the same size.

use std::collections::HashMap;

use crate::error::IblError;
use crate::executor::{
    check_inputs, gaussian_weights, specular_regions, BlurAxis, DrawExecutor, Pass,
    SpecularEncoding, TargetKey, TextureId,
};
use crate::panorama::FloatImage;
use crate::rgbd;
use crate::tonemap::{aces_filmic, linear_to_srgb};

const WHITE: [f32; 4] = [1.0; 4];

/// Host-memory [`DrawExecutor`].
#[derive(Debug, Default)]
pub struct CpuExecutor {
    textures: HashMap<TextureId, (TargetKey, FloatImage)>,
    pool: HashMap<TargetKey, Vec<FloatImage>>,
    next_id: u64,
    pool_hits: usize,
}

impl CpuExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of draws served from a released target.
    pub fn pool_hits(&self) -> usize {
        self.pool_hits
    }

    /// Number of live textures.
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn acquire(&mut self, key: TargetKey, fill: [f32; 4]) -> FloatImage {
        match self.pool.get_mut(&key).and_then(Vec::pop) {
            Some(mut image) => {
                self.pool_hits += 1;
                image.data.fill(fill);
                image
            }
            None => FloatImage::new(key.width, key.height, fill),
        }
    }

    fn insert(&mut self, key: TargetKey, image: FloatImage) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, (key, image));
        id
    }

    fn texture(&self, id: TextureId) -> Result<&FloatImage, IblError> {
        self.textures
            .get(&id)
            .map(|(_, image)| image)
            .ok_or_else(|| IblError::backend(format!("unknown texture {}", id.0)))
    }
}

fn check_key(key: TargetKey) -> Result<(), IblError> {
    if key.width == 0 || key.height == 0 {
        return Err(IblError::invalid(format!(
            "empty render target {}x{}",
            key.width, key.height
        )));
    }
    Ok(())
}

fn pixel_uv(x: u32, y: u32, width: u32, height: u32) -> (f32, f32) {
    (
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

fn resample_into(src: &FloatImage, out: &mut FloatImage) {
    for y in 0..out.height {
        for x in 0..out.width {
            let (u, v) = pixel_uv(x, y, out.width, out.height);
            out.set(x, y, src.sample(u, v));
        }
    }
}

fn blur_into(src: &FloatImage, out: &mut FloatImage, axis: BlurAxis, weights: &[f32]) {
    let radius = (weights.len() / 2) as i64;
    let (w, h) = (src.width as i64, src.height as i64);
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (k, weight) in weights.iter().enumerate() {
                let offset = k as i64 - radius;
                let (sx, sy) = match axis {
                    BlurAxis::Horizontal => ((x + offset).rem_euclid(w), y),
                    BlurAxis::Vertical => (x, (y + offset).clamp(0, h - 1)),
                };
                let texel = src.get(sx as u32, sy as u32);
                for c in 0..4 {
                    acc[c] += texel[c] * weight;
                }
            }
            out.set(x as u32, y as u32, acc);
        }
    }
}

fn skybox_texel(texel: [f32; 4], tone_map: bool, encode_srgb: bool) -> [f32; 4] {
    let mut out = [0.0, 0.0, 0.0, 1.0];
    for c in 0..3 {
        let mut v = if tone_map {
            aces_filmic(texel[c])
        } else {
            texel[c].clamp(0.0, 1.0)
        };
        if encode_srgb {
            v = linear_to_srgb(v);
        }
        out[c] = v;
    }
    out
}

fn specular_texel(texel: [f32; 4], encoding: SpecularEncoding) -> [f32; 4] {
    let rgb = [texel[0], texel[1], texel[2]];
    match encoding {
        SpecularEncoding::Rgbd => rgbd::encode(rgb),
        SpecularEncoding::Srgb => {
            let [r, g, b] = rgb.map(linear_to_srgb);
            [r, g, b, 1.0]
        }
    }
}

impl DrawExecutor for CpuExecutor {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn upload(&mut self, image: &FloatImage, key: TargetKey) -> Result<TextureId, IblError> {
        check_key(key)?;
        if (image.width, image.height) != (key.width, key.height) {
            return Err(IblError::invalid(format!(
                "upload of {}x{} image into {}x{} texture",
                image.width, image.height, key.width, key.height
            )));
        }
        Ok(self.insert(key, image.clone()))
    }

    fn draw(
        &mut self,
        pass: &Pass,
        inputs: &[TextureId],
        target: TargetKey,
    ) -> Result<TextureId, IblError> {
        check_key(target)?;
        check_inputs(pass, inputs)?;
        let fill = match pass {
            Pass::Specular { .. } => WHITE,
            _ => [0.0; 4],
        };
        let mut out = self.acquire(target, fill);

        match *pass {
            Pass::Resample => resample_into(self.texture(inputs[0])?, &mut out),
            Pass::Blur {
                axis,
                sigma,
                radius,
            } => {
                let src = self.texture(inputs[0])?;
                if (src.width, src.height) != (target.width, target.height) {
                    return Err(IblError::backend("blur pass must preserve the target size"));
                }
                blur_into(src, &mut out, axis, &gaussian_weights(sigma, radius));
            }
            Pass::Skybox {
                tone_map,
                encode_srgb,
            } => {
                let src = self.texture(inputs[0])?;
                for y in 0..out.height {
                    for x in 0..out.width {
                        let (u, v) = pixel_uv(x, y, out.width, out.height);
                        out.set(x, y, skybox_texel(src.sample(u, v), tone_map, encode_srgb));
                    }
                }
            }
            Pass::Specular { encoding, levels } => {
                for region in specular_regions(target.width.min(target.height), levels) {
                    let src = self.texture(inputs[region.level as usize])?;
                    for ly in 0..region.height {
                        for lx in 0..region.width {
                            let (u, v) = pixel_uv(lx, ly, region.width, region.height);
                            let texel = specular_texel(src.sample(u, v), encoding);
                            out.set(region.x + lx, region.y + ly, texel);
                        }
                    }
                }
            }
        }

        tracing::trace!(pass = pass.name(), width = target.width, height = target.height, "cpu draw");
        Ok(self.insert(target, out))
    }

    fn read(&mut self, texture: TextureId) -> Result<FloatImage, IblError> {
        self.texture(texture).cloned()
    }

    fn release(&mut self, texture: TextureId) {
        if let Some((key, image)) = self.textures.remove(&texture) {
            self.pool.entry(key).or_default().push(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(width: u32, height: u32) -> TargetKey {
        TargetKey::new(width, height, true)
    }

    fn upload_fill(cpu: &mut CpuExecutor, width: u32, height: u32, fill: [f32; 4]) -> TextureId {
        cpu.upload(&FloatImage::new(width, height, fill), key(width, height))
            .unwrap()
    }

    #[test]
    fn test_resample_constant_image() {
        let mut cpu = CpuExecutor::new();
        let src = upload_fill(&mut cpu, 8, 4, [0.5, 0.25, 2.0, 1.0]);
        let out = cpu.draw(&Pass::Resample, &[src], key(4, 2)).unwrap();
        let image = cpu.read(out).unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert!(image.data.iter().all(|t| *t == [0.5, 0.25, 2.0, 1.0]));
    }

    #[test]
    fn test_horizontal_blur_wraps_across_seam() {
        let mut cpu = CpuExecutor::new();
        let mut image = FloatImage::new(8, 1, [0.0; 4]);
        image.set(0, 0, [1.0; 4]);
        let src = cpu.upload(&image, key(8, 1)).unwrap();
        let pass = Pass::Blur {
            axis: BlurAxis::Horizontal,
            sigma: 1.0,
            radius: 2,
        };
        let drawn = cpu.draw(&pass, &[src], key(8, 1)).unwrap();
        let out = cpu.read(drawn).unwrap();
        // Energy leaks to the last column through the seam.
        assert!(out.get(7, 0)[0] > 0.0);
        assert_eq!(out.get(7, 0)[0], out.get(1, 0)[0]);
        let total: f32 = out.data.iter().map(|t| t[0]).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_vertical_blur_clamps_at_poles() {
        let mut cpu = CpuExecutor::new();
        let src = upload_fill(&mut cpu, 2, 4, [3.0, 3.0, 3.0, 1.0]);
        let pass = Pass::Blur {
            axis: BlurAxis::Vertical,
            sigma: 2.0,
            radius: 4,
        };
        let drawn = cpu.draw(&pass, &[src], key(2, 4)).unwrap();
        let out = cpu.read(drawn).unwrap();
        for texel in &out.data {
            assert!((texel[0] - 3.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_skybox_tone_maps_and_encodes() {
        let mut cpu = CpuExecutor::new();
        let src = upload_fill(&mut cpu, 4, 2, [50.0, 0.0, 0.18, 1.0]);
        let pass = Pass::Skybox {
            tone_map: true,
            encode_srgb: true,
        };
        let drawn = cpu.draw(&pass, &[src], key(4, 2)).unwrap();
        let out = cpu.read(drawn).unwrap();
        let texel = out.get(0, 0);
        assert!(texel[0] > 0.99 && texel[0] <= 1.0);
        assert_eq!(texel[1], 0.0);
        assert!((texel[2] - linear_to_srgb(aces_filmic(0.18))).abs() < 1e-6);
        assert_eq!(texel[3], 1.0);
    }

    #[test]
    fn test_specular_packs_levels_and_whites_remainder() {
        let mut cpu = CpuExecutor::new();
        let levels: Vec<_> = (0..3)
            .map(|i| upload_fill(&mut cpu, 16, 8, [i as f32 + 1.0, 0.0, 0.0, 1.0]))
            .collect();
        let pass = Pass::Specular {
            encoding: SpecularEncoding::Rgbd,
            levels: 3,
        };
        let drawn = cpu.draw(&pass, &levels, key(16, 16)).unwrap();
        let out = cpu.read(drawn).unwrap();

        // Level 0: value 1 stays in range.
        assert_eq!(out.get(15, 0), [1.0, 0.0, 0.0, 1.0]);
        // Level 1 (rows 8..12, columns 0..8): value 2 stored with d = 0.5.
        assert_eq!(out.get(0, 8), [1.0, 0.0, 0.0, 0.5]);
        assert_eq!(out.get(8, 8), WHITE);
        // Level 2 (rows 12..14, columns 0..4).
        let d = out.get(3, 13)[3];
        assert!((d - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(out.get(4, 13), WHITE);
        // Rows below the last level.
        assert_eq!(out.get(0, 14), WHITE);
        assert_eq!(out.get(0, 15), WHITE);
    }

    #[test]
    fn test_released_targets_are_reused() {
        let mut cpu = CpuExecutor::new();
        let src = upload_fill(&mut cpu, 4, 2, [1.0; 4]);
        let a = cpu.draw(&Pass::Resample, &[src], key(4, 2)).unwrap();
        cpu.release(a);
        let b = cpu.draw(&Pass::Resample, &[src], key(4, 2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(cpu.pool_hits(), 1);
        assert_eq!(cpu.live_textures(), 2);
    }

    #[test]
    fn test_unknown_texture_is_backend_error() {
        let mut cpu = CpuExecutor::new();
        let err = cpu.draw(&Pass::Resample, &[TextureId(42)], key(2, 2)).unwrap_err();
        assert!(err.is_backend());
        assert!(cpu.read(TextureId(42)).unwrap_err().is_backend());
    }
}
