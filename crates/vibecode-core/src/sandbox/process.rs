//! Process-backed sandbox executor.
//!
//! Each run gets a fresh [`ScopedWorkspace`], a cleared environment, a closed
//! stdin and (on Unix) its own process group. The run is supervised for
//! wall-clock time, output volume and (on Linux) the resident memory of the
//! whole group; any breach kills every process in the group. The group is
//! also killed once the entry process exits, so background jobs never outlive
//! the run. Dropping the execution future kills the group and removes the
//! workspace.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::domain::{Artifact, ArtifactError, ResourceKind};

use super::entry::{self, EntryError, EntryPoint};
use super::error::{SandboxError, SandboxResult};
use super::execution::{ExecutionLimits, ExecutionResult, Executor, SandboxFailure};
use super::policy::SandboxPolicy;
use super::workspace::ScopedWorkspace;

const MEMORY_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READER_GRACE: Duration = Duration::from_secs(1);
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs artifacts as child processes of the current process.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Checks that need no process: structure, policy scan, entry point.
    fn preflight(
        &self,
        artifact: &Artifact,
        limits: &ExecutionLimits,
    ) -> Result<EntryPoint, SandboxFailure> {
        if let Err(err) = artifact.validate() {
            return Err(match err {
                ArtifactError::PathEscape { path } => SandboxFailure::PolicyViolation {
                    operation: "write outside working directory".to_string(),
                    location: path,
                    post_hoc: false,
                },
                other => SandboxFailure::Malformed {
                    detail: other.to_string(),
                },
            });
        }

        let policy = SandboxPolicy::new(limits.allowed.clone());
        let violations = policy.scan(artifact);
        if let Some(first) = violations.first() {
            debug!(count = violations.len(), first = %first, "policy scan denied artifact");
            return Err(SandboxFailure::PolicyViolation {
                operation: format!("{} ({})", first.capability, first.operation),
                location: first.location.clone(),
                post_hoc: false,
            });
        }

        entry::resolve(artifact, &limits.interpreters).map_err(|err| match err {
            EntryError::Unsupported(detail) => SandboxFailure::Unsupported { detail },
            EntryError::Missing(detail) => SandboxFailure::Malformed { detail },
        })
    }

    async fn run(
        &self,
        artifact: &Artifact,
        entry: EntryPoint,
        limits: &ExecutionLimits,
        started: Instant,
    ) -> SandboxResult<ExecutionResult> {
        let workspace = ScopedWorkspace::provision(limits.workspace_root.as_deref())?;
        workspace.materialize(artifact)?;

        let mut child = spawn(&entry, workspace.path())?;
        let group = ProcessGroup::of(&child);
        let overflow = Arc::new(Notify::new());
        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(capture(out, limits.max_output_bytes, overflow.clone()))
        });
        let stderr_task = child.stderr.take().map(|err| {
            tokio::spawn(capture(err, limits.max_output_bytes, overflow.clone()))
        });

        let supervised = supervise(&mut child, &group, limits, &overflow).await;
        // Stragglers keep the pipes open; they go before output is collected.
        group.kill();
        let (exit_code, peak_memory_kb, failure) = supervised?;

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;

        let mut failure = failure;
        if failure.is_none() && (stdout.truncated || stderr.truncated) {
            failure = Some(SandboxFailure::ResourceLimit {
                kind: ResourceKind::Output,
                detail: format!("output exceeded {} bytes", limits.max_output_bytes),
            });
        }
        let stderr_text = workspace.scrub(&stderr.text);
        if failure.is_none() {
            let policy = SandboxPolicy::new(limits.allowed.clone());
            if let Some(violation) = policy.inspect_output(&stderr_text) {
                failure = Some(SandboxFailure::PolicyViolation {
                    operation: format!("{} ({})", violation.capability, violation.operation),
                    location: violation.location,
                    post_hoc: true,
                });
            }
        }

        Ok(ExecutionResult {
            exit_code,
            stdout: workspace.scrub(&stdout.text),
            stderr: stderr_text,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            elapsed_ms: started.elapsed().as_millis() as u64,
            peak_memory_kb,
            entry_point: Some(entry.path),
            failure,
            diagnosis: None,
        })
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, artifact: &Artifact, limits: &ExecutionLimits) -> ExecutionResult {
        let started = Instant::now();
        let entry = match self.preflight(artifact, limits) {
            Ok(entry) => entry,
            Err(failure) => {
                return ExecutionResult::not_started(failure, started.elapsed().as_millis() as u64)
            }
        };
        match self.run(artifact, entry, limits, started).await {
            Ok(result) => result,
            Err(err) => {
                warn!(artifact = %artifact.id, error = %err, "sandbox fault");
                ExecutionResult::not_started(
                    SandboxFailure::Internal {
                        detail: err.to_string(),
                    },
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }
}

fn spawn(entry: &EntryPoint, workdir: &Path) -> SandboxResult<Child> {
    let mut cmd = Command::new(&entry.program);
    cmd.args(&entry.args)
        .current_dir(workdir)
        .env_clear()
        .env("PATH", SANDBOX_PATH)
        .env("HOME", workdir)
        .env("TMPDIR", workdir)
        .env("LANG", "C.UTF-8")
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .env("PYTHONUNBUFFERED", "1")
        .env("NODE_OPTIONS", "--no-warnings")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.spawn().map_err(|source| SandboxError::Spawn {
        program: entry.program.clone(),
        source,
    })
}

/// The process group led by a sandboxed child. Dropping it kills the group.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&self) {
        if let Some(pgid) = self.pgid {
            kill_group(pgid);
        }
    }

    fn resident_kb(&self) -> Option<u64> {
        self.pgid.and_then(group_rss_kb)
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid, error = %err, "failed to kill sandbox process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Wait for the child while enforcing the time, output, and memory bounds.
async fn supervise(
    child: &mut Child,
    group: &ProcessGroup,
    limits: &ExecutionLimits,
    overflow: &Notify,
) -> SandboxResult<(Option<i32>, Option<u64>, Option<SandboxFailure>)> {
    let deadline = tokio::time::sleep(Duration::from_millis(limits.timeout_ms));
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(MEMORY_POLL_INTERVAL);
    let memory_limit_kb = limits.memory_limit_mb.saturating_mul(1024);
    let mut peak: Option<u64> = None;

    let failure = loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(SandboxError::Wait)?;
                return Ok((status.code(), peak, None));
            }
            _ = &mut deadline => {
                break SandboxFailure::TimedOut { limit_ms: limits.timeout_ms };
            }
            _ = overflow.notified() => {
                break SandboxFailure::ResourceLimit {
                    kind: ResourceKind::Output,
                    detail: format!("output exceeded {} bytes", limits.max_output_bytes),
                };
            }
            _ = ticker.tick() => {
                if let Some(kb) = group.resident_kb() {
                    peak = Some(peak.map_or(kb, |p| p.max(kb)));
                    if kb > memory_limit_kb {
                        break SandboxFailure::ResourceLimit {
                            kind: ResourceKind::Memory,
                            detail: format!("group rss {kb} KiB over {memory_limit_kb} KiB"),
                        };
                    }
                }
            }
        }
    };

    debug!(?failure, "killing sandboxed process group");
    group.kill();
    if let Err(err) = child.start_kill() {
        warn!(error = %err, "failed to signal sandboxed process");
    }
    // Reap so the pid is not left behind; the status is irrelevant now.
    let _ = child.wait().await;
    Ok((None, peak, Some(failure)))
}

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

/// Read a stream to EOF, keeping at most `cap` bytes.
///
/// The rest is drained and discarded so the child never blocks on a full pipe.
async fn capture<R>(mut reader: R, cap: usize, overflow: Arc<Notify>) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(buf.len());
                if n > room {
                    buf.extend_from_slice(&chunk[..room]);
                    if !truncated {
                        truncated = true;
                        overflow.notify_one();
                    }
                } else {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
    Captured {
        text: String::from_utf8_lossy(&buf).into_owned(),
        truncated,
    }
}

/// Join a capture task; grandchildren holding the pipe open are not waited for.
async fn collect(task: Option<tokio::task::JoinHandle<Captured>>) -> Captured {
    let Some(mut task) = task else {
        return Captured::default();
    };
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(err)) => {
            warn!(error = %err, "output capture task failed");
            Captured::default()
        }
        Err(_) => {
            task.abort();
            Captured::default()
        }
    }
}

/// Summed resident memory of every live process in the group.
#[cfg(target_os = "linux")]
fn group_rss_kb(pgid: u32) -> Option<u64> {
    let mut total = None;
    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if process_group_of(pid) != Some(pgid) {
            continue;
        }
        if let Some(kb) = resident_kb(pid) {
            total = Some(total.unwrap_or(0) + kb);
        }
    }
    total
}

#[cfg(target_os = "linux")]
fn process_group_of(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm may hold spaces and parens; state, ppid, pgrp follow the last ')'.
    let rest = stat.get(stat.rfind(')')? + 1..)?;
    rest.split_whitespace().nth(2)?.parse().ok()
}

#[cfg(target_os = "linux")]
fn resident_kb(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn group_rss_kb(_pgid: u32) -> Option<u64> {
    None
}
