//! Generative-AI collaborators and the helpers they share.
//!
//! - [`prompt`]  : `Persona` selection and prompt builders
//! - [`response`]: turning model text into project files
//! - [`gemini`]  : `GeminiClient`, a `CodeGenerator` over the Gemini REST API

pub mod gemini;
pub mod prompt;
pub mod response;

pub use gemini::{GeminiClient, GeminiConfig};
pub use prompt::Persona;

use thiserror::Error;

/// Infrastructure failures of a code-generation collaborator.
///
/// None of these describe the quality of generated code; the orchestrator
/// retries them and ends the session `Fatal` when retries run out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport failure (connection refused, TLS, DNS).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered with a non-success status.
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The call did not finish within its timeout.
    #[error("request timed out after {ms} ms")]
    Timeout { ms: u64 },

    /// The response was empty, blocked, or could not be turned into files.
    #[error("unusable response: {0}")]
    Unusable(String),

    /// Required credentials are not configured.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(err.to_string())
    }
}
