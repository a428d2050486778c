//! Scoped working directory for one sandboxed run.
//!
//! The directory lives exactly as long as the [`ScopedWorkspace`] value and is
//! removed on drop, so every exit path (normal, timeout, violation, or a
//! dropped future on cancellation) tears it down.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::domain::Artifact;

use super::error::{SandboxError, SandboxResult};

pub struct ScopedWorkspace {
    dir: TempDir,
}

impl ScopedWorkspace {
    /// Create a fresh directory under `root` (or the system temp dir).
    pub fn provision(root: Option<&Path>) -> SandboxResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vibecode-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(SandboxError::Workspace)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Workspace)?;
        debug!(path = %dir.path().display(), "sandbox workspace provisioned");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write every artifact file below the workspace root.
    ///
    /// Paths must already be validated as relative and contained.
    pub fn materialize(&self, artifact: &Artifact) -> SandboxResult<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(artifact.files.len());
        for file in &artifact.files {
            let target = self.dir.path().join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| SandboxError::Materialize {
                    path: file.path.clone(),
                    source,
                })?;
            }
            std::fs::write(&target, &file.content).map_err(|source| {
                SandboxError::Materialize {
                    path: file.path.clone(),
                    source,
                }
            })?;
            written.push(target);
        }
        Ok(written)
    }

    /// Replace absolute workspace paths in captured output with `.`.
    ///
    /// Each run gets a different directory; without this, identical failures
    /// would look different to the stagnation detector.
    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        let mut roots = vec![self.dir.path().to_path_buf()];
        if let Ok(canonical) = self.dir.path().canonicalize() {
            if canonical != roots[0] {
                roots.push(canonical);
            }
        }
        for root in roots {
            let root = root.display().to_string();
            out = out.replace(&format!("{root}/"), "./").replace(&root, ".");
        }
        out
    }
}

impl Drop for ScopedWorkspace {
    fn drop(&mut self) {
        debug!(path = %self.dir.path().display(), "sandbox workspace released");
    }
}
