//! `env-data` command implementation
//!
//! Bakes skybox, specular cascade and SH9 coefficients for every panorama
//! found at the input path. Each panorama `<stem>.<ext>` is written to
//! `<output>/<stem>/`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use xrbake_backend_ibl::{bake_env_data, DrawExecutor, EnvDataOptions, IblRenderer};

use super::reporting;
use crate::decode::load_panorama;
use crate::input::{discover_inputs, InputKind};

/// Output directory of one panorama.
pub fn env_output_dir(input: &Path, root: &Path) -> PathBuf {
    match input.file_stem() {
        Some(stem) => root.join(stem),
        None => root.to_path_buf(),
    }
}

/// Run the env-data command
///
/// # Arguments
/// * `input` - Panorama file or directory of panoramas
/// * `output` - Output root directory
/// * `options` - Sizes and packaging options
/// * `gpu` - Run the passes on the GPU (requires the `gpu` feature)
pub fn run(input: &str, output: &str, options: &EnvDataOptions, gpu: bool) -> Result<ExitCode> {
    if gpu {
        #[cfg(feature = "gpu")]
        {
            let executor = xrbake_backend_ibl::GpuExecutor::new()
                .context("failed to initialize the GPU executor")?;
            return run_with(&mut IblRenderer::new(executor), input, output, options);
        }
        #[cfg(not(feature = "gpu"))]
        bail!("this build of xrbake has no GPU support; rebuild with the `gpu` feature");
    }
    let mut renderer = IblRenderer::new(xrbake_backend_ibl::CpuExecutor::new());
    run_with(&mut renderer, input, output, options)
}

/// Run the env-data command with an existing renderer context.
pub fn run_with<E: DrawExecutor>(
    renderer: &mut IblRenderer<E>,
    input: &str,
    output: &str,
    options: &EnvDataOptions,
) -> Result<ExitCode> {
    let start = Instant::now();
    let found = discover_inputs(Path::new(input), InputKind::Panorama)?;
    reporting::print_skipped(&found.skipped, InputKind::Panorama.as_str());
    if found.items.is_empty() {
        bail!("no panorama files found at {}", input);
    }

    let root = Path::new(output);
    for path in &found.items {
        println!("{} {}", "Processing:".cyan().bold(), path.display());
        let panorama = load_panorama(path)?;
        println!(
            "{} {}x{} {}",
            "Panorama:".dimmed(),
            panorama.width,
            panorama.height,
            if panorama.hdr { "HDR" } else { "LDR" }
        );

        let result = bake_env_data(renderer, &panorama, options)
            .with_context(|| format!("failed to bake environment data: {}", path.display()))?;
        reporting::print_warnings(&result.warnings);

        let dir = env_output_dir(path, root);
        let written = result
            .output
            .write_to(&dir)
            .with_context(|| format!("failed to write outputs to {}", dir.display()))?;
        reporting::print_written(&written);
    }

    reporting::print_summary(found.items.len(), InputKind::Panorama.as_str());
    println!("{} {}ms", "Time:".dimmed(), start.elapsed().as_millis());
    Ok(ExitCode::SUCCESS)
}
