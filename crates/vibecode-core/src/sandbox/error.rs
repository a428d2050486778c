//! Error types for the sandbox module.
//!
//! These never escape [`Executor::execute`]; the executor folds them into
//! [`SandboxFailure::Internal`] so the correction loop can still terminate.
//!
//! [`Executor::execute`]: super::Executor::execute
//! [`SandboxFailure::Internal`]: super::SandboxFailure::Internal

/// Internal faults of the sandbox layer.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to provision sandbox workspace: {0}")]
    Workspace(std::io::Error),

    #[error("failed to write {path} into sandbox: {source}")]
    Materialize {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for sandboxed process: {0}")]
    Wait(std::io::Error),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
