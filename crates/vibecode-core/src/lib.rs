//! vibecode Core Library
//!
//! Validate-and-correct loop for AI-generated code: run a candidate project in
//! a scoped sandbox, classify what happened, and drive bounded correction
//! rounds until the project runs cleanly or the session gives up.

pub mod analyzer;
pub mod collaborator;
pub mod config;
pub mod correction;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod providers;
pub mod sandbox;
pub mod telemetry;

pub use domain::{
    Artifact, ArtifactError, ArtifactId, ContentDigest, Diagnosis, DiagnosisKind, Language,
    ResourceKind, Result, SourceFile, Strategy, StrategyEntry, StrategyTable, VibeError,
};

pub use analyzer::{Expectations, ResultAnalyzer};

pub use collaborator::{
    CodeGenerator, CorrectionRequest, DeliverySink, DiscardSink, GeneratedProject,
    GenerationRequest, SessionReport,
};

pub use config::{ConfigError, CorrectionConfig, LoopSettings, StagnationSettings};

pub use correction::{
    read_session_audit, run_sessions, select, write_session_audit, AttemptRecord,
    CorrectionOrchestrator, CorrectionSession, SessionRequest, SessionState, StagnationDetector,
    StagnationScore, TransitionRecord, Verdict,
};

pub use sandbox::{
    ExecutionLimits, ExecutionResult, Executor, ProcessExecutor, SandboxFailure, SandboxPolicy,
};

pub use providers::{GeminiClient, GeminiConfig, Persona, ProviderError};

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
