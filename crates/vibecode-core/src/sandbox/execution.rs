//! Execution limits, results, and the executor contract.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Artifact, Diagnosis, ResourceKind};

use super::capability::Capability;
use super::error::{SandboxError, SandboxResult};

/// Resource bounds for one sandboxed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Maximum wall-clock time for one run (milliseconds).
    pub timeout_ms: u64,
    /// Peak resident memory before the run is killed (MiB).
    pub memory_limit_mb: u64,
    /// Bytes kept per output stream; exceeding it kills the run.
    pub max_output_bytes: usize,
    /// Capabilities the artifact may use. Everything else is denied.
    pub allowed: Vec<Capability>,
    /// Parent directory for scoped workspaces (system temp dir if unset).
    pub workspace_root: Option<PathBuf>,
    /// Interpreter overrides keyed by language tag (`python`, `javascript`, `shell`).
    pub interpreters: BTreeMap<String, String>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            memory_limit_mb: 256,
            max_output_bytes: 64 * 1024,
            allowed: Capability::default_allowed(),
            workspace_root: None,
            interpreters: BTreeMap::new(),
        }
    }
}

impl ExecutionLimits {
    pub fn check(&self) -> SandboxResult<()> {
        if self.timeout_ms == 0 {
            return Err(SandboxError::InvalidConfig(
                "timeout_ms must be greater than 0".into(),
            ));
        }
        if self.memory_limit_mb == 0 {
            return Err(SandboxError::InvalidConfig(
                "memory_limit_mb must be greater than 0".into(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::InvalidConfig(
                "max_output_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Why a run did not complete cleanly, as observed by the sandbox itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxFailure {
    /// Killed at the wall-clock ceiling.
    TimedOut { limit_ms: u64 },
    /// Killed for exceeding a resource bound.
    ResourceLimit { kind: ResourceKind, detail: String },
    /// A denied operation, found before the run or post hoc in its logs.
    PolicyViolation {
        operation: String,
        location: String,
        post_hoc: bool,
    },
    /// The artifact could not be turned into a runnable project.
    Malformed { detail: String },
    /// No runner exists for the artifact's language.
    Unsupported { detail: String },
    /// The sandbox itself failed.
    Internal { detail: String },
}

/// Outcome of one sandboxed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `None` when the process was killed or never started.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed_ms: u64,
    /// Peak resident set size, when the platform exposes it.
    pub peak_memory_kb: Option<u64>,
    /// Relative path of the file that was run.
    pub entry_point: Option<String>,
    pub failure: Option<SandboxFailure>,
    /// Filled in by the orchestrator after analysis.
    #[serde(default)]
    pub diagnosis: Option<Diagnosis>,
}

impl ExecutionResult {
    /// A run that ended before any process was started.
    pub fn not_started(failure: SandboxFailure, elapsed_ms: u64) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            elapsed_ms,
            peak_memory_kb: None,
            entry_point: None,
            failure: Some(failure),
            diagnosis: None,
        }
    }

    /// A process that ran to completion with the given status and output.
    pub fn exited(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            stdout_truncated: false,
            stderr_truncated: false,
            elapsed_ms: 0,
            peak_memory_kb: None,
            entry_point: None,
            failure: None,
            diagnosis: None,
        }
    }

    /// `true` when the process exited on its own.
    pub fn completed(&self) -> bool {
        self.exit_code.is_some()
            && !matches!(
                self.failure,
                Some(SandboxFailure::TimedOut { .. }) | Some(SandboxFailure::ResourceLimit { .. })
            )
    }
}

/// Runs one artifact under bounded time and memory.
///
/// Implementations never fail past their own boundary: every outcome,
/// including internal faults, is encoded in the returned [`ExecutionResult`].
/// Dropping the returned future must release the sandbox (kill the process
/// and discard the working directory).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, artifact: &Artifact, limits: &ExecutionLimits) -> ExecutionResult;
}
