//! Environment data descriptor and output packaging.
//!
//! Outputs are either three loose files (`skybox.jpg|png`, `specular.png`,
//! `data.json`) or one packed `data.bin`:
//!
//! | bytes | content |
//! |---|---|
//! | 0..8 | ASCII `wxxr-env` |
//! | 8..12 | JSON length (u32 LE, unpadded) |
//! | 12..16 | binary section start (u32 LE) |
//! | 16.. | JSON, space padded to 4 bytes |
//! | start.. | skybox bytes, zero padded to 4, then specular bytes, zero padded to 4 |
//!
//! In the packed form every `map` is an `{offset, length, type}` range
//! relative to the binary section start.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{IblError, Warning};
use crate::executor::DrawExecutor;
use crate::panorama::PanoramaImage;
use crate::png::{encode_jpeg, encode_rgba_png, PngConfig};
use crate::renderer::{IblOptions, IblOutput, IblRenderer, DEFAULT_MIP_LEVELS};
use crate::sh::ShCoefficients;

/// Magic prefix of a packed `data.bin`.
pub const ENV_MAGIC: &[u8; 8] = b"wxxr-env";

const HEADER_LEN: usize = 16;

/// Encoding of the skybox image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkyboxFormat {
    Jpeg,
    Png,
}

impl SkyboxFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SkyboxFormat::Jpeg => "jpg",
            SkyboxFormat::Png => "png",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            SkyboxFormat::Jpeg => "image/jpeg",
            SkyboxFormat::Png => "image/png",
        }
    }
}

/// Options for producing environment data from one panorama.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvDataOptions {
    pub skybox_size: u32,
    pub specular_size: u32,
    pub mip_levels: u32,
    /// Emit one `data.bin` instead of loose files.
    pub binary_pack: bool,
    pub skybox_format: SkyboxFormat,
    pub jpeg_quality: u8,
}

impl Default for EnvDataOptions {
    fn default() -> Self {
        Self {
            skybox_size: 2048,
            specular_size: 256,
            mip_levels: DEFAULT_MIP_LEVELS,
            binary_pack: false,
            skybox_format: SkyboxFormat::Jpeg,
            jpeg_quality: 90,
        }
    }
}

impl EnvDataOptions {
    pub fn ibl_options(&self) -> IblOptions {
        IblOptions {
            skybox_size: self.skybox_size,
            specular_size: self.specular_size,
            mip_levels: self.mip_levels,
        }
    }
}

/// Location of an image referenced by the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapRef {
    /// File name next to `data.json`.
    Path(String),
    /// Byte range within the binary section of `data.bin`.
    Range {
        offset: u32,
        length: u32,
        #[serde(rename = "type")]
        mime: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyboxEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub half: bool,
    pub map: MapRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecularEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub rgbd: bool,
    pub mipmaps: bool,
    pub mipmap_count: u32,
    pub map: MapRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffuseEntry {
    pub coefficients: ShCoefficients,
}

/// Contents of `data.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvDescriptor {
    pub skybox: SkyboxEntry,
    pub specular: SpecularEntry,
    pub diffuse: DiffuseEntry,
}

impl EnvDescriptor {
    pub fn new(output: &IblOutput, skybox: MapRef, specular: MapRef) -> Self {
        Self {
            skybox: SkyboxEntry {
                kind: "2D".to_string(),
                half: false,
                map: skybox,
            },
            specular: SpecularEntry {
                kind: "2D".to_string(),
                rgbd: output.rgbd,
                mipmaps: true,
                mipmap_count: output.mip_levels,
                map: specular,
            },
            diffuse: DiffuseEntry {
                coefficients: output.sh,
            },
        }
    }
}

/// Rendered environment data files.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvDataOutput {
    Files {
        descriptor: EnvDescriptor,
        skybox_name: String,
        skybox: Vec<u8>,
        specular: Vec<u8>,
    },
    Packed(Vec<u8>),
}

impl EnvDataOutput {
    /// Write the files into `dir`, creating it as needed.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, IblError> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        match self {
            EnvDataOutput::Packed(bytes) => {
                let path = dir.join("data.bin");
                fs::write(&path, bytes)?;
                written.push(path);
            }
            EnvDataOutput::Files {
                descriptor,
                skybox_name,
                skybox,
                specular,
            } => {
                let path = dir.join(skybox_name);
                fs::write(&path, skybox)?;
                written.push(path);
                let path = dir.join("specular.png");
                fs::write(&path, specular)?;
                written.push(path);
                let path = dir.join("data.json");
                fs::write(&path, serde_json::to_vec_pretty(descriptor)?)?;
                written.push(path);
            }
        }
        Ok(written)
    }
}

/// Result of baking one panorama.
#[derive(Debug, Clone)]
pub struct EnvDataResult {
    pub output: EnvDataOutput,
    pub sh: ShCoefficients,
    pub warnings: Vec<Warning>,
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn to_u32(n: usize, what: &str) -> Result<u32, IblError> {
    u32::try_from(n).map_err(|_| IblError::invalid(format!("{} exceeds 4 GiB", what)))
}

/// Pack a descriptor and both images into `data.bin` form.
///
/// The descriptor's maps are replaced by byte ranges.
pub fn pack_env_data(
    descriptor: &EnvDescriptor,
    skybox: &[u8],
    skybox_mime: &str,
    specular: &[u8],
) -> Result<Vec<u8>, IblError> {
    let specular_offset = align4(skybox.len());
    let mut descriptor = descriptor.clone();
    descriptor.skybox.map = MapRef::Range {
        offset: 0,
        length: to_u32(skybox.len(), "skybox")?,
        mime: skybox_mime.to_string(),
    };
    descriptor.specular.map = MapRef::Range {
        offset: to_u32(specular_offset, "skybox")?,
        length: to_u32(specular.len(), "specular")?,
        mime: "image/png".to_string(),
    };

    let json = serde_json::to_vec(&descriptor)?;
    let binary_start = HEADER_LEN + align4(json.len());

    let mut out = Vec::with_capacity(binary_start + specular_offset + align4(specular.len()));
    out.write_all(ENV_MAGIC)?;
    out.write_u32::<LittleEndian>(to_u32(json.len(), "descriptor")?)?;
    out.write_u32::<LittleEndian>(to_u32(binary_start, "descriptor")?)?;
    out.extend_from_slice(&json);
    out.resize(binary_start, b' ');
    out.extend_from_slice(skybox);
    out.resize(binary_start + specular_offset, 0);
    out.extend_from_slice(specular);
    out.resize(binary_start + specular_offset + align4(specular.len()), 0);
    Ok(out)
}

/// Parsed view of a packed `data.bin`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedEnvData<'a> {
    pub descriptor: EnvDescriptor,
    pub binary: &'a [u8],
}

impl<'a> PackedEnvData<'a> {
    /// Bytes of a map range.
    pub fn map_bytes(&self, map: &MapRef) -> Result<&'a [u8], IblError> {
        match map {
            MapRef::Range { offset, length, .. } => {
                let start = *offset as usize;
                let end = start + *length as usize;
                self.binary
                    .get(start..end)
                    .ok_or_else(|| IblError::invalid("map range outside binary section"))
            }
            MapRef::Path(path) => Err(IblError::invalid(format!(
                "map '{}' is a path, not a packed range",
                path
            ))),
        }
    }
}

/// Parse a packed `data.bin`.
pub fn unpack_env_data(bytes: &[u8]) -> Result<PackedEnvData<'_>, IblError> {
    if bytes.len() < HEADER_LEN || &bytes[..8] != ENV_MAGIC {
        return Err(IblError::invalid("missing wxxr-env header"));
    }
    let mut header = &bytes[8..HEADER_LEN];
    let json_len = header.read_u32::<LittleEndian>()? as usize;
    let binary_start = header.read_u32::<LittleEndian>()? as usize;
    let json = bytes
        .get(HEADER_LEN..HEADER_LEN + json_len)
        .ok_or_else(|| IblError::invalid("descriptor length exceeds file"))?;
    let binary = bytes
        .get(binary_start..)
        .ok_or_else(|| IblError::invalid("binary section start exceeds file"))?;
    Ok(PackedEnvData {
        descriptor: serde_json::from_slice(json)?,
        binary,
    })
}

/// Encode rendered maps into output files.
pub fn build_env_data(
    output: &IblOutput,
    options: &EnvDataOptions,
) -> Result<EnvDataOutput, IblError> {
    let skybox = match options.skybox_format {
        SkyboxFormat::Jpeg => encode_jpeg(&output.skybox, options.jpeg_quality)?,
        SkyboxFormat::Png => encode_rgba_png(&output.skybox, &PngConfig::default())?,
    };
    let specular = encode_rgba_png(&output.specular, &PngConfig::default())?;
    let skybox_name = format!("skybox.{}", options.skybox_format.extension());

    let descriptor = EnvDescriptor::new(
        output,
        MapRef::Path(skybox_name.clone()),
        MapRef::Path("specular.png".to_string()),
    );
    if options.binary_pack {
        let packed = pack_env_data(&descriptor, &skybox, options.skybox_format.mime(), &specular)?;
        return Ok(EnvDataOutput::Packed(packed));
    }
    Ok(EnvDataOutput::Files {
        descriptor,
        skybox_name,
        skybox,
        specular,
    })
}

/// Render and encode the environment data of one panorama.
pub fn bake_env_data<E: DrawExecutor>(
    renderer: &mut IblRenderer<E>,
    panorama: &PanoramaImage,
    options: &EnvDataOptions,
) -> Result<EnvDataResult, IblError> {
    let rendered = renderer.render(panorama, &options.ibl_options())?;
    let output = build_env_data(&rendered, options)?;
    Ok(EnvDataResult {
        output,
        sh: rendered.sh,
        warnings: rendered.warnings,
    })
}
