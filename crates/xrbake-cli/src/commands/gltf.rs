//! `gltf` command implementation
//!
//! Repacks every glTF/GLB model found at the input path. Models are processed
//! one at a time and the run stops at the first model that fails.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use xrbake_backend_gltf::{output_dir_for, repack_model, RepackOptions};

use super::reporting;
use crate::input::{discover_inputs, InputKind};

/// Run the gltf command
///
/// # Arguments
/// * `input` - Model file or directory of models
/// * `output` - Output root directory
/// * `options` - Repacking options
pub fn run(input: &str, output: &str, options: &RepackOptions) -> Result<ExitCode> {
    let start = Instant::now();
    let found = discover_inputs(Path::new(input), InputKind::Model)?;
    reporting::print_skipped(&found.skipped, InputKind::Model.as_str());
    if found.items.is_empty() {
        bail!("no glTF or GLB files found at {}", input);
    }

    let root = Path::new(output);
    for path in &found.items {
        println!("{} {}", "Processing:".cyan().bold(), path.display());
        let result = repack_model(path, options)
            .with_context(|| format!("failed to repack model: {}", path.display()))?;
        reporting::print_warnings(&result.warnings);

        if result.skipped {
            println!("{} already processed", "Geometry:".dimmed());
        } else {
            let stats = &result.stats;
            println!(
                "{} {} geometries, {} vertex buffers, {} normals / {} tangents generated",
                "Geometry:".dimmed(),
                stats.geometries,
                stats.blocks,
                stats.generated_normals,
                stats.generated_tangents
            );
        }
        if result.stats.converted_textures > 0 {
            println!(
                "{} {} resized to power of two",
                "Textures:".dimmed(),
                result.stats.converted_textures
            );
        }

        let dir = output_dir_for(path, root);
        let written = result
            .output
            .write_to(&dir)
            .with_context(|| format!("failed to write outputs to {}", dir.display()))?;
        reporting::print_written(&written);
    }

    reporting::print_summary(found.items.len(), InputKind::Model.as_str());
    println!("{} {}ms", "Time:".dimmed(), start.elapsed().as_millis());
    Ok(ExitCode::SUCCESS)
}
