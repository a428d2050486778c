//! Sandbox: bounded, isolated execution of generated projects.
//!
//! A run is default-deny: the artifact is scanned against the capability
//! policy before anything starts, then executed in a throwaway working
//! directory under wall-clock, memory, and output bounds. Every outcome,
//! including sandbox faults, comes back as an [`ExecutionResult`].
//!
//! # Modules
//!
//! - [`capability`]: `Capability` enum (Network, Subprocess, …)
//! - [`policy`]    : `SandboxPolicy` static scan and post-hoc log check
//! - [`entry`]     : entry-point resolution per language
//! - [`workspace`] : `ScopedWorkspace` (temp dir removed on drop)
//! - [`execution`] : `ExecutionLimits`, `ExecutionResult`, `Executor` trait
//! - [`process`]   : `ProcessExecutor` backed by `tokio::process`
//! - [`error`]     : `SandboxError` / `SandboxResult`

pub mod capability;
pub mod entry;
pub mod error;
pub mod execution;
pub mod policy;
pub mod process;
pub mod workspace;

pub use capability::Capability;
pub use entry::{resolve as resolve_entry_point, EntryError, EntryPoint};
pub use error::{SandboxError, SandboxResult};
pub use execution::{ExecutionLimits, ExecutionResult, Executor, SandboxFailure};
pub use policy::{PolicyViolation, SandboxPolicy};
pub use process::ProcessExecutor;
pub use workspace::ScopedWorkspace;
