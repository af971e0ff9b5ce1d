//! Error and warning types for IBL precomputation.

use thiserror::Error;

/// Errors from IBL precomputation.
#[derive(Debug, Error)]
pub enum IblError {
    /// Bad dimensions, pixel buffer sizes or channel counts.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The draw executor failed (adapter/device acquisition, pass execution, readback).
    #[error("Executor error: {0}")]
    Backend(String),

    /// The renderer was driven through its stages out of order.
    #[error("Stage error: expected {expected}, found {found}")]
    Stage {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IblError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        IblError::InvalidInput(message.into())
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        IblError::Backend(message.into())
    }

    /// Returns true for malformed panorama data or options.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, IblError::InvalidInput(_))
    }

    /// Returns true when the draw executor failed.
    pub fn is_backend(&self) -> bool {
        matches!(self, IblError::Backend(_))
    }

    /// Returns true for renderer state machine violations.
    pub fn is_internal(&self) -> bool {
        matches!(self, IblError::Stage { .. })
    }
}

impl From<png::EncodingError> for IblError {
    fn from(e: png::EncodingError) -> Self {
        IblError::Encode(e.to_string())
    }
}

impl From<image::ImageError> for IblError {
    fn from(e: image::ImageError) -> Self {
        IblError::Encode(e.to_string())
    }
}

/// Warning codes for recoverable conditions during IBL precomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCode {
    /// W201: Panorama color space is unknown; values pass through unconverted
    UnknownColorSpace,
    /// W202: Requested output size was rounded to a power of two
    SizeRounded,
}

impl WarningCode {
    /// Returns the warning code string (e.g., "W201").
    pub fn code(&self) -> &'static str {
        match self {
            WarningCode::UnknownColorSpace => "W201",
            WarningCode::SizeRounded => "W202",
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(IblError::invalid("zero width").is_invalid_input());
        assert!(IblError::backend("no adapter").is_backend());
        let stage = IblError::Stage {
            expected: "Idle",
            found: "Blurred",
        };
        assert!(stage.is_internal());
        assert_eq!(stage.to_string(), "Stage error: expected Idle, found Blurred");
    }

    #[test]
    fn test_warning_display() {
        let w = Warning::new(WarningCode::UnknownColorSpace, "pass-through");
        assert_eq!(w.to_string(), "[W201] pass-through");
    }
}
