//! xrbake CLI - Asset preprocessing for WebXR delivery
//!
//! This binary bakes image-based lighting data from equirectangular
//! panoramas and repacks glTF/GLB models into interleaved vertex buffers.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use xrbake_backend_gltf::RepackOptions;
use xrbake_backend_ibl::{EnvDataOptions, SkyboxFormat};
use xrbake_cli::commands;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "XRBAKE_LOG";

/// xrbake - WebXR asset preprocessing
#[derive(Parser)]
#[command(name = "xrbake")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bake skybox, specular cascade and SH9 lighting from panoramas
    EnvData {
        /// Panorama file or directory of panoramas
        #[arg(short, long)]
        input: String,

        /// Output root directory
        #[arg(short, long, default_value = "xrbake-out")]
        output: String,

        /// Skybox width in pixels
        #[arg(long, default_value_t = 2048)]
        size: u32,

        /// Width of the specular level-0 image
        #[arg(long, default_value_t = 256)]
        specular_size: u32,

        /// Write a single packed data.bin instead of loose files
        #[arg(long)]
        binary: bool,

        /// Encode the skybox as PNG instead of JPEG
        #[arg(long)]
        png_skybox: bool,

        /// JPEG quality of the skybox (1-100)
        #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
        jpeg_quality: u8,

        /// Run the render passes on the GPU
        #[arg(long)]
        gpu: bool,
    },

    /// Repack glTF/GLB models into interleaved vertex buffers
    Gltf {
        /// Model file or directory of models
        #[arg(short, long)]
        input: String,

        /// Output root directory
        #[arg(short, long, default_value = "xrbake-out")]
        output: String,

        /// Write a single GLB container
        #[arg(long)]
        glb: bool,

        /// Keep repeat-wrapped textures at their original size
        #[arg(long)]
        no_texture_resize: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::EnvData {
            input,
            output,
            size,
            specular_size,
            binary,
            png_skybox,
            jpeg_quality,
            gpu,
        } => {
            let options = EnvDataOptions {
                skybox_size: size,
                specular_size,
                binary_pack: binary,
                skybox_format: if png_skybox {
                    SkyboxFormat::Png
                } else {
                    SkyboxFormat::Jpeg
                },
                jpeg_quality,
                ..EnvDataOptions::default()
            };
            commands::env_data::run(&input, &output, &options, gpu)
        }
        Commands::Gltf {
            input,
            output,
            glb,
            no_texture_resize,
        } => {
            let options = RepackOptions {
                glb,
                convert_repeat_textures: !no_texture_resize,
            };
            commands::gltf::run(&input, &output, &options)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", colored::Colorize::red("error"), e);
            ExitCode::from(1)
        }
    }
}
