//! Error types for the viewer library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for scene, environment and GPU setup operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// glTF document could not be parsed or imported
    #[error("glTF import failed: {0}")]
    Gltf(#[from] gltf::Error),

    /// Image decoding failed (HDR environment, textures)
    #[error("Image decode failed: {0}")]
    Image(#[from] image::ImageError),

    /// File extension not handled by any loader
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Scene violates an index or layout invariant
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// WGSL failed validation; diagnostics come from naga
    #[error("Shader compilation failed for '{label}': {diagnostics}")]
    ShaderCompile { label: String, diagnostics: String },

    /// Adapter lacks a feature or limit a backend needs
    #[error("Missing GPU capability: {0}")]
    MissingCapability(String),

    /// External denoiser runtime could not be initialized
    #[error("Denoiser unavailable: {0}")]
    DenoiserUnavailable(String),

    /// Settings file is malformed
    #[error("Settings error: {0}")]
    Settings(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid scene error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidScene(msg.into())
    }
}

/// Result type alias for viewer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::ShaderCompile {
            label: "pathtrace".into(),
            diagnostics: "unknown identifier".into(),
        };
        assert!(e.to_string().contains("pathtrace"));
        assert!(e.to_string().contains("unknown identifier"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
