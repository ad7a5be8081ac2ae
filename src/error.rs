//! Error types for envforge
//!
//! All modules use `ForgeResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::StageId;

/// Result type alias for envforge operations
pub type ForgeResult<T> = Result<T, ForgeError>;

/// All errors that can occur while compiling a build plan
#[derive(Error, Debug)]
pub enum ForgeError {
    // Configuration errors
    #[error("Invalid SSH key material: {0}")]
    SshKeyInvalid(String),

    #[error("Invalid environment definition: {0}")]
    GraphInvalid(String),

    #[error("Environment definition not found: {0}")]
    GraphNotFound(PathBuf),

    // Collaborator failures
    #[error("{name} failed")]
    Collaborator {
        name: &'static str,
        #[source]
        source: Box<ForgeError>,
    },

    #[error("Download failed: {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Local cache unavailable: {0}")]
    CacheUnavailable(String),

    // Backend operation errors
    #[error("Stage {0} is not known to this backend")]
    UnknownStage(StageId),

    #[error("Diff against non-ancestor: {ancestor} does not dominate {descendant}")]
    DiffNonAncestor {
        ancestor: StageId,
        descendant: StageId,
    },

    #[error("Merge overlay {overlay} was not diffed against an ancestor reachable from {base}")]
    MergeLineage { base: StageId, overlay: StageId },

    #[error("Backend rejected {operation}: {reason}")]
    BackendOperation {
        operation: &'static str,
        reason: String,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl ForgeError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap a failure with the identity of the failing collaborator
    pub fn collaborator(name: &'static str, source: ForgeError) -> Self {
        Self::Collaborator {
            name,
            source: Box::new(source),
        }
    }

    /// Create a download error
    pub fn download(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Download {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ForgeError::SshKeyInvalid("empty key material".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid SSH key material: empty key material"
        );
    }

    #[test]
    fn collaborator_wraps_source() {
        let inner = ForgeError::download("https://example.com", "timed out");
        let err = ForgeError::collaborator("shell framework", inner);
        assert_eq!(err.to_string(), "shell framework failed");

        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("timed out"));
    }
}
