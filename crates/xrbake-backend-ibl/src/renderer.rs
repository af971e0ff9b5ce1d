//! The IBL renderer context.
//!
//! One [`IblRenderer`] is created per pipeline run and passed to every
//! panorama. It drives a [`DrawExecutor`] through a fixed stage sequence:
//!
//! `Idle → TextureUploaded → Blurred(0..N) → Mipmapped → SkyboxRendered → ShProjected → Done`
//!
//! Calling a stage out of order is an [`IblError::Stage`] error.

use crate::error::{IblError, Warning, WarningCode};
use crate::executor::{BlurAxis, DrawExecutor, Pass, SpecularEncoding, TargetKey, TextureId};
use crate::panorama::{PanoramaImage, Rgba8Image};
use crate::sh::{project_sh9, ShCoefficients};

/// Default number of specular mip levels.
pub const DEFAULT_MIP_LEVELS: u32 = 5;

/// Largest blur kernel half-width in texels.
pub const MAX_BLUR_RADIUS: u32 = 64;

/// Renderer progress for the current panorama.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    TextureUploaded,
    /// The given cascade level is the most recent one rendered.
    Blurred(u32),
    Mipmapped,
    SkyboxRendered,
    ShProjected,
    Done,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::TextureUploaded => "TextureUploaded",
            Stage::Blurred(_) => "Blurred",
            Stage::Mipmapped => "Mipmapped",
            Stage::SkyboxRendered => "SkyboxRendered",
            Stage::ShProjected => "ShProjected",
            Stage::Done => "Done",
        }
    }
}

/// Nearest power of two, rounding down unless `log2(size)` is at least 0.4
/// past an integer.
pub fn nearest_pot(size: u32) -> u32 {
    if size <= 1 {
        return 1;
    }
    let log = (size as f64).log2();
    let floor = log.floor();
    let exp = if log - floor < 0.4 { floor } else { floor + 1.0 };
    1u32 << (exp as u32).min(31)
}

/// Blur sigma (in texels) and kernel radius for cascade `level` of a map
/// `size` texels wide. Level 0 is unblurred.
pub fn blur_kernel(level: u32, size: u32) -> (f32, u32) {
    if level == 0 {
        return (0.0, 0);
    }
    let sigma = 2f32.powi(level as i32 - 1) * size as f32 / 256.0;
    let radius = ((2.0 * sigma).ceil() as u32).clamp(1, MAX_BLUR_RADIUS);
    (sigma, radius)
}

/// Output sizes for one panorama.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IblOptions {
    /// Skybox width; the height is half of it.
    pub skybox_size: u32,
    /// Side of the square specular map.
    pub specular_size: u32,
    pub mip_levels: u32,
}

impl Default for IblOptions {
    fn default() -> Self {
        Self {
            skybox_size: 2048,
            specular_size: 256,
            mip_levels: DEFAULT_MIP_LEVELS,
        }
    }
}

/// Everything precomputed from one panorama.
#[derive(Debug, Clone)]
pub struct IblOutput {
    /// Tone-mapped, sRGB-encoded skybox with 2:1 aspect.
    pub skybox: Rgba8Image,
    /// Square specular map with the packed mip cascade.
    pub specular: Rgba8Image,
    /// True when the specular map is RGBD encoded (HDR sources).
    pub rgbd: bool,
    pub mip_levels: u32,
    pub sh: ShCoefficients,
    pub warnings: Vec<Warning>,
}

/// Explicit renderer context owning an executor and its per-panorama state.
pub struct IblRenderer<E: DrawExecutor> {
    executor: E,
    stage: Stage,
    hdr: bool,
    source: Option<TextureId>,
    levels: Vec<TextureId>,
    level_key: Option<TargetKey>,
}

impl<E: DrawExecutor> IblRenderer<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            stage: Stage::Idle,
            hdr: false,
            source: None,
            levels: Vec::new(),
            level_key: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_executor(mut self) -> E {
        self.release_all();
        let Self { executor, .. } = self;
        executor
    }

    fn expect(&self, expected: Stage) -> Result<(), IblError> {
        if self.stage != expected {
            return Err(IblError::Stage {
                expected: expected.name(),
                found: self.stage.name(),
            });
        }
        Ok(())
    }

    fn release_all(&mut self) {
        if let Some(source) = self.source.take() {
            self.executor.release(source);
        }
        for level in self.levels.drain(..) {
            self.executor.release(level);
        }
        self.level_key = None;
    }

    /// Release all textures and return to [`Stage::Idle`].
    pub fn reset(&mut self) {
        self.release_all();
        self.stage = Stage::Idle;
    }

    /// Decode `panorama` to linear floats and upload it.
    ///
    /// Allowed from `Idle` or `Done`.
    pub fn upload(
        &mut self,
        panorama: &PanoramaImage,
        warnings: &mut Vec<Warning>,
    ) -> Result<(), IblError> {
        match self.stage {
            Stage::Idle => {}
            Stage::Done => self.reset(),
            other => {
                return Err(IblError::Stage {
                    expected: Stage::Idle.name(),
                    found: other.name(),
                })
            }
        }
        panorama.validate()?;
        let linear = panorama.to_linear(warnings);
        let key = TargetKey::new(panorama.width, panorama.height, panorama.hdr);
        self.source = Some(self.executor.upload(&linear, key)?);
        self.hdr = panorama.hdr;
        self.stage = Stage::TextureUploaded;
        tracing::debug!(
            executor = self.executor.name(),
            width = panorama.width,
            height = panorama.height,
            hdr = panorama.hdr,
            "uploaded panorama"
        );
        Ok(())
    }

    /// Render cascade `level` for a specular map of side `size`.
    ///
    /// Level 0 resamples the panorama to `size × size/2`; each later level
    /// applies one horizontal and one vertical Gaussian pass to the previous
    /// level, doubling the blur sigma.
    pub fn blur_level(&mut self, level: u32, size: u32) -> Result<(), IblError> {
        if level == 0 {
            self.expect(Stage::TextureUploaded)?;
        } else {
            self.expect(Stage::Blurred(level - 1))?;
        }

        let texture = if level == 0 {
            if size < 2 {
                return Err(IblError::invalid(format!("specular size {} too small", size)));
            }
            let source = self
                .source
                .ok_or_else(|| IblError::invalid("no panorama uploaded"))?;
            let key = TargetKey::new(size, size / 2, self.hdr);
            self.level_key = Some(key);
            self.executor.draw(&Pass::Resample, &[source], key)?
        } else {
            let key = self
                .level_key
                .ok_or_else(|| IblError::invalid("cascade has no base level"))?;
            let previous = *self
                .levels
                .last()
                .ok_or_else(|| IblError::invalid("cascade has no base level"))?;
            let (sigma, radius) = blur_kernel(level, key.width);
            let horizontal = self.executor.draw(
                &Pass::Blur {
                    axis: BlurAxis::Horizontal,
                    sigma,
                    radius,
                },
                &[previous],
                key,
            )?;
            let vertical = self.executor.draw(
                &Pass::Blur {
                    axis: BlurAxis::Vertical,
                    sigma,
                    radius,
                },
                &[horizontal],
                key,
            );
            self.executor.release(horizontal);
            tracing::trace!(level, sigma, radius, "blurred cascade level");
            vertical?
        };

        self.levels.push(texture);
        self.stage = Stage::Blurred(level);
        Ok(())
    }

    /// Pack the rendered cascade into the square specular map.
    ///
    /// HDR panoramas are stored RGBD encoded, others sRGB encoded.
    pub fn pack_specular(&mut self) -> Result<Rgba8Image, IblError> {
        let last = match self.stage {
            Stage::Blurred(level) => level,
            other => {
                return Err(IblError::Stage {
                    expected: "Blurred",
                    found: other.name(),
                })
            }
        };
        let key = self
            .level_key
            .ok_or_else(|| IblError::invalid("cascade has no base level"))?;
        let levels = last + 1;
        let encoding = if self.hdr {
            SpecularEncoding::Rgbd
        } else {
            SpecularEncoding::Srgb
        };
        let target = TargetKey::new(key.width, key.width, false);
        let packed = self
            .executor
            .draw(&Pass::Specular { encoding, levels }, &self.levels, target)?;
        let image = self.executor.read(packed);
        self.executor.release(packed);
        let image = image?.to_rgba8();
        self.stage = Stage::Mipmapped;
        tracing::debug!(size = key.width, levels, "packed specular cascade");
        Ok(image)
    }

    /// Render the skybox at `width × width/2`.
    ///
    /// HDR sources are ACES tone-mapped before sRGB encoding.
    pub fn render_skybox(&mut self, width: u32) -> Result<Rgba8Image, IblError> {
        self.expect(Stage::Mipmapped)?;
        if width < 2 {
            return Err(IblError::invalid(format!("skybox size {} too small", width)));
        }
        let source = self
            .source
            .ok_or_else(|| IblError::invalid("no panorama uploaded"))?;
        let pass = Pass::Skybox {
            tone_map: self.hdr,
            encode_srgb: true,
        };
        let target = TargetKey::new(width, width / 2, false);
        let skybox = self.executor.draw(&pass, &[source], target)?;
        let image = self.executor.read(skybox);
        self.executor.release(skybox);
        let image = image?.to_rgba8();
        self.stage = Stage::SkyboxRendered;
        tracing::debug!(width, height = width / 2, "rendered skybox");
        Ok(image)
    }

    /// Project the panorama onto SH9 on a `size_x × size_y` grid.
    pub fn project_sh(
        &mut self,
        panorama: &PanoramaImage,
        size_x: u32,
        size_y: u32,
    ) -> Result<ShCoefficients, IblError> {
        self.expect(Stage::SkyboxRendered)?;
        let sh = project_sh9(panorama, size_x, size_y)?;
        self.stage = Stage::ShProjected;
        Ok(sh)
    }

    /// Release the panorama's textures.
    pub fn finish(&mut self) -> Result<(), IblError> {
        self.expect(Stage::ShProjected)?;
        self.release_all();
        self.stage = Stage::Done;
        Ok(())
    }

    /// Run every stage for one panorama.
    ///
    /// Requested sizes are rounded to powers of two (with a warning when that
    /// changes them). On failure the renderer is reset so it can take the next
    /// panorama.
    pub fn render(
        &mut self,
        panorama: &PanoramaImage,
        options: &IblOptions,
    ) -> Result<IblOutput, IblError> {
        let result = self.render_stages(panorama, options);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn render_stages(
        &mut self,
        panorama: &PanoramaImage,
        options: &IblOptions,
    ) -> Result<IblOutput, IblError> {
        if options.mip_levels == 0 {
            return Err(IblError::invalid("at least one mip level is required"));
        }
        let mut warnings = Vec::new();
        let skybox_size = rounded_size("skybox", options.skybox_size, &mut warnings);
        let specular_size = rounded_size("specular", options.specular_size, &mut warnings);

        self.upload(panorama, &mut warnings)?;
        for level in 0..options.mip_levels {
            self.blur_level(level, specular_size)?;
        }
        let specular = self.pack_specular()?;
        let skybox = self.render_skybox(skybox_size)?;
        let sh = self.project_sh(panorama, specular_size, specular_size / 2)?;
        self.finish()?;

        Ok(IblOutput {
            skybox,
            specular,
            rgbd: panorama.hdr,
            mip_levels: options.mip_levels,
            sh,
            warnings,
        })
    }
}

fn rounded_size(what: &str, requested: u32, warnings: &mut Vec<Warning>) -> u32 {
    let size = nearest_pot(requested);
    if size != requested {
        warnings.push(Warning::new(
            WarningCode::SizeRounded,
            format!("{} size {} rounded to {}", what, requested, size),
        ));
    }
    size
}
