use std::path::PathBuf;

use thiserror::Error;

/// Library error type for the recoverable I/O seams of a session.
///
/// None of these are fatal: callers log them and degrade to an absent
/// image or default settings.
#[derive(Debug, Error)]
pub enum Error {
    /// An image file could not be read.
    #[error("failed to read image {path}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted settings file exists but could not be read.
    #[error("failed to read settings from {path}: {source}")]
    SettingsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings snapshot could not be written back to disk.
    #[error("failed to write settings to {path}: {source}")]
    SettingsWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The platform exposes no per-user configuration directory.
    #[error("no per-user configuration directory available")]
    NoConfigDir,
}
