//! Input discovery for batch runs.
//!
//! A file argument is processed as is when its extension matches; a
//! directory argument is walked to a fixed depth per input kind.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use walkdir::WalkDir;

/// Recognized model extensions.
pub const MODEL_EXTENSIONS: &[&str] = &["gltf", "glb"];

/// Recognized panorama extensions.
pub const PANORAMA_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "hdr", "exr"];

/// Kind of input a subcommand consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Model,
    Panorama,
}

impl InputKind {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            InputKind::Model => MODEL_EXTENSIONS,
            InputKind::Panorama => PANORAMA_EXTENSIONS,
        }
    }

    /// Directory depth searched below the input directory.
    pub fn max_depth(&self) -> usize {
        match self {
            InputKind::Model => 2,
            InputKind::Panorama => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Model => "model",
            InputKind::Panorama => "panorama",
        }
    }
}

/// Files found for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    /// Inputs to process, in path order.
    pub items: Vec<PathBuf>,
    /// Files given directly whose extension does not match.
    pub skipped: Vec<PathBuf>,
}

/// Returns true if `path` has one of `extensions` (case-insensitive).
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Collect the inputs of `kind` under `path`.
pub fn discover_inputs(path: &Path, kind: InputKind) -> Result<Discovered> {
    if !path.exists() {
        bail!("input path does not exist: {}", path.display());
    }

    let mut found = Discovered::default();
    if path.is_file() {
        if has_extension(path, kind.extensions()) {
            found.items.push(path.to_path_buf());
        } else {
            found.skipped.push(path.to_path_buf());
        }
        return Ok(found);
    }

    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(kind.max_depth())
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let entry_path = entry.path();
        if entry.file_type().is_file() && has_extension(entry_path, kind.extensions()) {
            found.items.push(entry_path.to_path_buf());
        }
    }
    tracing::debug!(
        kind = kind.as_str(),
        count = found.items.len(),
        "discovered inputs"
    );
    Ok(found)
}
