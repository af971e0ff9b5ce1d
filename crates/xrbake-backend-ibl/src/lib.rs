//! Image-based lighting precomputation for xrbake.
//!
//! An equirectangular panorama is turned into a tone-mapped skybox, a square
//! specular map holding a blurred mip cascade (RGBD encoded for HDR sources),
//! and nine spherical-harmonic coefficients for diffuse lighting.
//!
//! Draw passes go through the [`DrawExecutor`] trait. [`CpuExecutor`] runs
//! them on the host; with the `gpu` feature, `GpuExecutor` runs the same
//! passes through wgpu.
//!
//! ```no_run
//! use std::path::Path;
//! use xrbake_backend_ibl::{
//!     bake_env_data, ColorSpace, CpuExecutor, EnvDataOptions, IblRenderer, PanoramaImage,
//!     PixelData,
//! };
//!
//! let pixels = PixelData::U8(vec![128; 2048 * 1024 * 3]);
//! let panorama = PanoramaImage::new(2048, 1024, 3, pixels, ColorSpace::Srgb)?;
//! let mut renderer = IblRenderer::new(CpuExecutor::new());
//! let result = bake_env_data(&mut renderer, &panorama, &EnvDataOptions::default())?;
//! result.output.write_to(Path::new("out/env"))?;
//! # Ok::<(), xrbake_backend_ibl::IblError>(())
//! ```

pub mod cpu;
pub mod env_data;
pub mod error;
pub mod executor;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod panorama;
pub mod png;
pub mod renderer;
pub mod rgbd;
pub mod sh;
pub mod tonemap;

pub use cpu::CpuExecutor;
pub use env_data::{
    bake_env_data, build_env_data, pack_env_data, unpack_env_data, EnvDataOptions, EnvDataOutput,
    EnvDataResult, EnvDescriptor, MapRef, SkyboxFormat, ENV_MAGIC,
};
pub use error::{IblError, Warning, WarningCode};
pub use executor::{DrawExecutor, Pass, SpecularEncoding, TargetKey, TextureId};
#[cfg(feature = "gpu")]
pub use gpu::GpuExecutor;
pub use panorama::{ColorSpace, FloatImage, PanoramaImage, PixelData, Rgba8Image};
pub use renderer::{nearest_pot, IblOptions, IblOutput, IblRenderer, Stage, DEFAULT_MIP_LEVELS};
pub use sh::{project_sh9, ShCoefficients};
