//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings file could not be turned into [`crate::BazaarSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The merged document has a field of the wrong type.
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A field parsed but its value is out of range.
    #[error("{key} {reason}")]
    OutOfRange {
        key: &'static str,
        reason: &'static str,
    },
}

impl SettingsError {
    /// Wire name of the offending field, for range errors.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::OutOfRange { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
