//! Contracts for the collaborators around a correction session.
//!
//! - [`CodeGenerator`]: produces and corrects projects (an AI backend)
//! - [`DeliverySink`]: receives the terminal [`SessionReport`]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::correction::{AttemptRecord, TransitionRecord, Verdict};
use crate::domain::{Artifact, Diagnosis, Language, SourceFile, Strategy};
use crate::providers::{Persona, ProviderError};

/// Request for a brand-new project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub language: Option<Language>,
    pub context: Option<String>,
    pub persona: Persona,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            language: None,
            context: None,
            persona: Persona::SeniorDeveloper,
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }
}

/// Request to repair the failing artifact of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub artifact: Artifact,
    pub diagnosis: Diagnosis,
    pub strategy: Strategy,
    /// Intrusiveness directive from the configured strategy table.
    pub directive: String,
    /// Best prior attempt, supplied for `Hybrid` corrections.
    pub reference: Option<Artifact>,
    pub persona: Persona,
    /// Attempt number that produced `diagnosis`.
    pub attempt: u32,
    /// Original user request, when the session started from one.
    pub prompt: Option<String>,
    /// Tail of the failing run's stderr.
    pub stderr_excerpt: String,
}

/// Files returned by a collaborator. The orchestrator wraps them in a new
/// [`Artifact`] version; collaborators never mint artifact identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedProject {
    pub name: Option<String>,
    pub description: Option<String>,
    pub files: Vec<SourceFile>,
}

impl GeneratedProject {
    pub fn from_files(files: Vec<SourceFile>) -> Self {
        Self {
            name: None,
            description: None,
            files,
        }
    }

    /// `true` when there is no file content worth executing.
    pub fn is_unusable(&self) -> bool {
        self.files.iter().all(|f| f.content.trim().is_empty())
    }
}

/// AI generation collaborator.
///
/// Errors are infrastructure faults. Broken code is not an error: it is
/// returned as a normal project and caught by the sandbox.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedProject, ProviderError>;

    async fn correct(
        &self,
        request: &CorrectionRequest,
    ) -> Result<GeneratedProject, ProviderError>;
}

/// Everything delivered when a session reaches a terminal verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub verdict: Verdict,
    pub attempts_used: u32,
    /// Set only when the verdict is `Accepted`.
    pub final_artifact: Option<Artifact>,
    /// Human-readable account of the session.
    pub summary: String,
    pub history: Vec<AttemptRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub duration_ms: u64,
}

impl SessionReport {
    pub fn is_accepted(&self) -> bool {
        matches!(self.verdict, Verdict::Accepted)
    }
}

/// Delivery collaborator (chat front end, directory writer, ...).
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, report: &SessionReport) -> crate::Result<()>;
}

/// Sink that drops every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

#[async_trait]
impl DeliverySink for DiscardSink {
    async fn deliver(&self, _report: &SessionReport) -> crate::Result<()> {
        Ok(())
    }
}
