//! xrbake End-to-End Test Infrastructure
//!
//! This crate holds integration tests that drive the backends and the CLI
//! library the way the `xrbake` binary does:
//!
//! - Model repacking: glTF/GLB in, interleaved glTF/GLB out
//! - Environment baking: panorama in, skybox + specular + SH9 out
//! - Property tests for grouping, layout and RGBD invariants
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p xrbake-tests
//! ```

pub mod fixtures;
