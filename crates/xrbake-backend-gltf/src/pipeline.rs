//! Per-model repacking pipeline.
//!
//! Grouping, synthesis, interleaving and assembly run in sequence over one
//! [`Document`]; the result is rendered either as `index.gltf` + `buffer.bin`
//! + assets or as a single `index.glb`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::assemble::{assemble_buffers, AssemblyStats};
use crate::document::Document;
use crate::error::{GltfError, Warning, WarningCode};
use crate::glb::{embed_assets, write_glb};
use crate::grouper::{apply_geometries, group_primitives, split_shared_accessors};
use crate::interleave::interleave_geometry;
use crate::source::{load_model, uri_to_path, ModelSource};
use crate::synth::synthesize_attributes;
use crate::textures::convert_repeat_textures;

/// Buffer file name written next to `index.gltf`.
pub const BUFFER_FILE: &str = "buffer.bin";

/// Output subdirectory for assets referenced from outside the model directory.
pub const EXTERNAL_ASSET_DIR: &str = "external";

/// Options for repacking one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepackOptions {
    /// Emit a single GLB container (always done for GLB inputs).
    pub glb: bool,
    /// Resize repeat-wrapped textures to power-of-two dimensions.
    pub convert_repeat_textures: bool,
}

impl Default for RepackOptions {
    fn default() -> Self {
        Self {
            glb: false,
            convert_repeat_textures: true,
        }
    }
}

/// Counters describing one repacking run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepackStats {
    pub geometries: usize,
    pub blocks: usize,
    pub cloned_accessors: usize,
    pub generated_normals: usize,
    pub generated_tangents: usize,
    pub converted_textures: usize,
    pub assembly: AssemblyStats,
}

/// Rendered output files of a repacked model.
#[derive(Debug, Clone, PartialEq)]
pub enum RepackOutput {
    Gltf {
        json: Value,
        buffer: Vec<u8>,
        assets: BTreeMap<String, Vec<u8>>,
    },
    Glb(Vec<u8>),
}

impl RepackOutput {
    /// Write the output files into `dir`, creating it as needed.
    ///
    /// Returns the written paths, the model file first.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, GltfError> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        match self {
            RepackOutput::Glb(bytes) => {
                let path = dir.join("index.glb");
                fs::write(&path, bytes)?;
                written.push(path);
            }
            RepackOutput::Gltf {
                json,
                buffer,
                assets,
            } => {
                let path = dir.join("index.gltf");
                fs::write(&path, serde_json::to_vec_pretty(json)?)?;
                written.push(path);
                if !buffer.is_empty() {
                    let path = dir.join(BUFFER_FILE);
                    fs::write(&path, buffer)?;
                    written.push(path);
                }
                for (uri, data) in assets {
                    let Some(relative) = contained_path(uri)? else {
                        return Err(GltfError::invalid(format!(
                            "asset '{}' would be written outside {}",
                            uri,
                            dir.display()
                        )));
                    };
                    let path = dir.join(relative);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, data)?;
                    written.push(path);
                }
            }
        }
        Ok(written)
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            RepackOutput::Glb(_) => "index.glb",
            RepackOutput::Gltf { .. } => "index.gltf",
        }
    }
}

/// Outcome of repacking one model.
#[derive(Debug, Clone)]
pub struct RepackResult {
    pub output: RepackOutput,
    /// True when the input already carried the processed marker.
    pub skipped: bool,
    pub warnings: Vec<Warning>,
    pub stats: RepackStats,
}

/// Decoded output-relative path of an asset `uri`, or `None` if the path is
/// absolute or climbs out of the output directory.
fn contained_path(uri: &str) -> Result<Option<PathBuf>, GltfError> {
    let path = uri_to_path(uri)?;
    let contained = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    Ok(contained.then_some(path))
}

/// Move assets whose `uri` leaves the model directory under
/// [`EXTERNAL_ASSET_DIR`] and point the referencing images at the new URI.
fn relocate_external_assets(
    doc: &mut Document,
    assets: BTreeMap<String, Vec<u8>>,
    warnings: &mut Vec<Warning>,
) -> Result<BTreeMap<String, Vec<u8>>, GltfError> {
    let mut renamed: BTreeMap<String, String> = BTreeMap::new();
    let mut out = BTreeMap::new();
    for (uri, data) in assets {
        let key = if contained_path(&uri)?.is_some() {
            uri
        } else {
            let segments: Vec<&str> = uri
                .split(['/', '\\'])
                .filter(|s| !s.is_empty() && *s != "." && *s != "..")
                .collect();
            let relocated = format!("{}/{}", EXTERNAL_ASSET_DIR, segments.join("/"));
            if segments.is_empty() || contained_path(&relocated)?.is_none() {
                return Err(GltfError::invalid(format!(
                    "asset uri '{}' cannot be placed inside the output directory",
                    uri
                )));
            }
            warnings.push(Warning::new(
                WarningCode::AssetRelocated,
                format!("asset '{}' written as '{}'", uri, relocated),
            ));
            renamed.insert(uri, relocated.clone());
            relocated
        };
        if out.contains_key(&key) {
            return Err(GltfError::invalid(format!(
                "two assets would be written to '{}'",
                key
            )));
        }
        out.insert(key, data);
    }

    if let Some(Value::Array(images)) = doc.root.get_mut("images") {
        for image in images {
            let Some(new_uri) = image
                .get("uri")
                .and_then(Value::as_str)
                .and_then(|uri| renamed.get(uri))
            else {
                continue;
            };
            image["uri"] = Value::String(new_uri.clone());
        }
    }
    Ok(out)
}

/// Output directory for a model: `<root>/<stem>` for GLB inputs,
/// `<root>/<parent dir name>` for glTF inputs.
pub fn output_dir_for(input: &Path, root: &Path) -> PathBuf {
    let is_glb = input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("glb"));
    let name = if is_glb {
        input.file_stem()
    } else {
        input.parent().and_then(Path::file_name)
    };
    match name {
        Some(name) => root.join(name),
        None => root.to_path_buf(),
    }
}

/// Repack the geometry of `doc` in place and tag it as processed.
pub fn repack_document(
    doc: &mut Document,
    warnings: &mut Vec<Warning>,
) -> Result<RepackStats, GltfError> {
    let mut stats = RepackStats::default();

    let mut grouping = group_primitives(&doc.meshes);
    warnings.append(&mut grouping.warnings);
    stats.geometries = grouping.geometries.len();
    stats.cloned_accessors = split_shared_accessors(doc, &mut grouping);

    let synthesized = synthesize_attributes(doc, &mut grouping, warnings)?;
    stats.generated_normals = synthesized.normals.len();
    stats.generated_tangents = synthesized.tangents.len();
    apply_geometries(doc, &grouping);

    let mut blocks = Vec::new();
    for geometry in &grouping.geometries {
        blocks.extend(interleave_geometry(doc, geometry)?);
    }
    stats.blocks = blocks.len();
    stats.assembly = assemble_buffers(doc, &blocks)?;

    doc.mark_processed();
    tracing::debug!(
        geometries = stats.geometries,
        blocks = stats.blocks,
        "repacked document"
    );
    Ok(stats)
}

/// Repack a loaded model and render its output files.
///
/// Documents already carrying the processed marker keep their geometry; their
/// buffers are still merged into one.
pub fn repack_source(
    source: ModelSource,
    options: &RepackOptions,
) -> Result<RepackResult, GltfError> {
    let ModelSource {
        mut document,
        mut assets,
        is_glb,
    } = source;
    let mut warnings = Vec::new();

    let skipped = document.is_processed();
    let mut stats = if skipped {
        warnings.push(Warning::new(
            WarningCode::AlreadyProcessed,
            "model was already processed; geometry left unchanged",
        ));
        RepackStats {
            assembly: assemble_buffers(&mut document, &[])?,
            ..RepackStats::default()
        }
    } else {
        repack_document(&mut document, &mut warnings)?
    };

    if options.convert_repeat_textures {
        stats.converted_textures = convert_repeat_textures(&document, &mut assets, &mut warnings);
    }

    let output = if options.glb || is_glb {
        embed_assets(&mut document, &assets)?;
        let bin = document.buffers.first().cloned().unwrap_or_default();
        RepackOutput::Glb(write_glb(&document.to_json(None), &bin)?)
    } else {
        let assets = relocate_external_assets(&mut document, assets, &mut warnings)?;
        RepackOutput::Gltf {
            json: document.to_json(Some(BUFFER_FILE)),
            buffer: document.buffers.first().cloned().unwrap_or_default(),
            assets,
        }
    };

    Ok(RepackResult {
        output,
        skipped,
        warnings,
        stats,
    })
}

/// Load and repack the model at `path`.
pub fn repack_model(path: &Path, options: &RepackOptions) -> Result<RepackResult, GltfError> {
    let source = load_model(path)?;
    repack_source(source, options)
}
