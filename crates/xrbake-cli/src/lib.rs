//! xrbake CLI library.
//!
//! This crate provides the pipeline drivers behind the `xrbake` binary:
//! input discovery, panorama decoding and the `env-data` and `gltf` commands.

pub mod commands;
pub mod decode;
pub mod input;
