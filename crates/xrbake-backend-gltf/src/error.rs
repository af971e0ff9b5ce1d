//! Error and warning types for model repacking.

use thiserror::Error;

/// Errors from glTF repacking.
#[derive(Debug, Error)]
pub enum GltfError {
    /// The document or its binary payloads are malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The model needs a vertex layout the interleaver cannot express.
    #[error("Unsupported geometry: {reason} (stride: {stride}, diff: {diff})")]
    UnsupportedGeometry {
        reason: String,
        stride: usize,
        diff: usize,
    },

    /// Grouper/interleaver contract violation. Reaching this is a bug.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GLB container error: {0}")]
    Glb(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GltfError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        GltfError::InvalidInput(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        GltfError::Internal(message.into())
    }

    /// Returns true for malformed input data (including codec and IO failures).
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            GltfError::InvalidInput(_)
                | GltfError::Json(_)
                | GltfError::Glb(_)
                | GltfError::Image(_)
                | GltfError::Io(_)
        )
    }

    /// Returns true when the model shape is beyond what the interleaver supports.
    pub fn is_unsupported_geometry(&self) -> bool {
        matches!(self, GltfError::UnsupportedGeometry { .. })
    }

    /// Returns true for invariant violations inside the repacking pipeline.
    pub fn is_internal(&self) -> bool {
        matches!(self, GltfError::Internal(_))
    }
}

/// Warning codes for recoverable conditions during repacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCode {
    /// W101: Primitive topology is not triangles; it is left out of grouping
    NonTriangleTopology,
    /// W102: Normal/tangent synthesis needs TEXCOORD_0
    MissingTexcoord,
    /// W103: Normal/tangent synthesis needs an index accessor
    MissingIndices,
    /// W104: Model already carries the processed marker; geometry left untouched
    AlreadyProcessed,
    /// W105: Image asset could not be resized to power-of-two dimensions
    TextureNotConverted,
    /// W106: Asset referenced from outside the model directory was moved under `external/`
    AssetRelocated,
}

impl WarningCode {
    /// Returns the warning code string (e.g., "W101").
    pub fn code(&self) -> &'static str {
        match self {
            WarningCode::NonTriangleTopology => "W101",
            WarningCode::MissingTexcoord => "W102",
            WarningCode::MissingIndices => "W103",
            WarningCode::AlreadyProcessed => "W104",
            WarningCode::TextureNotConverted => "W105",
            WarningCode::AssetRelocated => "W106",
        }
    }
}

impl std::fmt::Display for WarningCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A recoverable condition reported alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
}

impl Warning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(code = code.code(), "{}", message);
        Self { code, message }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
