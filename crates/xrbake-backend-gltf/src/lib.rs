//! glTF geometry repacking for xrbake.
//!
//! Primitives that agree on their attribute accessors are grouped into
//! geometries, missing normals and tangents are synthesized, each geometry's
//! attributes are interleaved into at most two vertex buffers of stride
//! ≤ 252 bytes, and everything is reassembled into one binary buffer,
//! optionally inside a GLB container.
//!
//! ```no_run
//! use std::path::Path;
//! use xrbake_backend_gltf::{repack_model, RepackOptions};
//!
//! let result = repack_model(Path::new("scene/scene.gltf"), &RepackOptions::default())?;
//! result.output.write_to(Path::new("out/scene"))?;
//! # Ok::<(), xrbake_backend_gltf::GltfError>(())
//! ```

pub mod accessor;
pub mod assemble;
pub mod document;
pub mod error;
pub mod glb;
pub mod grouper;
pub mod interleave;
pub mod math;
pub mod pipeline;
pub mod source;
pub mod synth;
pub mod textures;

pub use accessor::{AccessorShape, AttributeView, ComponentType, ElementFormat};
pub use document::{Document, PROCESSED_EXTENSION};
pub use error::{GltfError, Warning, WarningCode};
pub use grouper::{group_primitives, Geometry, Grouping};
pub use interleave::{plan_layout, InterleavedBlock, MAX_STRIDE};
pub use pipeline::{
    output_dir_for, repack_document, repack_model, repack_source, RepackOptions, RepackOutput,
    RepackResult, RepackStats,
};
pub use source::{is_model_file, load_model, ModelSource};
