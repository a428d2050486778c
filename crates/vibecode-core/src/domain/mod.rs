//! Domain models for vibecode.
//!
//! Canonical definitions for the core entities:
//! - `Artifact`: one immutable version of a candidate code project
//! - `Diagnosis`: classified root cause of an execution outcome
//! - `Strategy`: correction intrusiveness, ordered by `StrategyTable`

pub mod artifact;
pub mod diagnosis;
pub mod digest;
pub mod error;
pub mod strategy;

pub use artifact::{Artifact, ArtifactId, Language, SourceFile};
pub use diagnosis::{Diagnosis, DiagnosisKind, ResourceKind};
pub use digest::ContentDigest;
pub use error::{ArtifactError, Result, VibeError};
pub use strategy::{Strategy, StrategyEntry, StrategyTable};
