//! Domain-level error taxonomy for vibecode.
//!
//! Code-quality failures are never errors: they are [`Diagnosis`] values
//! routed through the correction loop. Only configuration violations and
//! infrastructure faults reach the caller through [`VibeError`].
//!
//! [`Diagnosis`]: crate::domain::Diagnosis

/// Errors produced while validating an artifact's structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact has no source files")]
    Empty,

    #[error("source file path must not be empty")]
    EmptyPath,

    #[error("source file path escapes the project root: {path}")]
    PathEscape { path: String },

    #[error("duplicate source file path: {path}")]
    DuplicatePath { path: String },
}

/// vibecode domain errors.
#[derive(Debug, thiserror::Error)]
pub enum VibeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid artifact: {0}")]
    InvalidArtifact(#[from] ArtifactError),

    #[error("collaborator failure after {attempts} attempt(s): {reason}")]
    Collaborator { attempts: u32, reason: String },

    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("session task failed: {0}")]
    Task(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for vibecode domain operations.
pub type Result<T> = std::result::Result<T, VibeError>;
