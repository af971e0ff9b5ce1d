//! CLI command implementations

pub mod env_data;
pub mod gltf;

mod reporting;
