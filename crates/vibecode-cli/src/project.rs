//! Project directories on disk: loading them as artifacts and delivering
//! session results back into them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use vibecode_core::{Artifact, DeliverySink, Language, SessionReport, SourceFile};

/// Directories never read into an artifact.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".venv",
    "venv",
    "node_modules",
    "__pycache__",
    "target",
];

/// Files larger than this are left out of the artifact.
const MAX_FILE_BYTES: u64 = 512 * 1024;

pub const SUMMARY_FILE: &str = "SUMMARY.md";

/// Read every UTF-8 text file under `dir` into a first-version artifact.
///
/// Paths are stored relative to `dir` with `/` separators. Hidden entries,
/// dependency folders and binary files are skipped.
pub fn load_project(dir: &Path, language: Option<Language>) -> Result<Artifact> {
    let root = dir
        .canonicalize()
        .with_context(|| format!("Failed to open project directory {:?}", dir))?;

    let mut files = Vec::new();
    collect_files(&root, &root, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));

    if files.is_empty() {
        anyhow::bail!("No source files found in {:?}", dir);
    }

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    let artifact = match language {
        Some(lang) => Artifact::new(name, lang, files),
        None => Artifact::from_files(name, files),
    };
    debug!(
        files = artifact.files.len(),
        bytes = artifact.total_bytes(),
        language = ?artifact.language,
        "loaded project"
    );
    Ok(artifact)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<SourceFile>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if !SKIPPED_DIRS.contains(&name.as_str()) {
                collect_files(root, &path, out)?;
            }
            continue;
        }
        if !file_type.is_file() || name == SUMMARY_FILE {
            continue;
        }
        if entry.metadata()?.len() > MAX_FILE_BYTES {
            warn!(path = ?path, "skipping oversized file");
            continue;
        }

        let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let Ok(content) = String::from_utf8(bytes) else {
            debug!(path = ?path, "skipping non-UTF-8 file");
            continue;
        };

        let relative = path
            .strip_prefix(root)
            .with_context(|| format!("{:?} is outside {:?}", path, root))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push(SourceFile::new(relative, content));
    }
    Ok(())
}

/// Delivers session results into a directory.
///
/// An accepted session writes its final files; every session writes
/// `SUMMARY.md` with the verdict and attempt history.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    out: PathBuf,
}

impl DirectorySink {
    pub fn new(out: impl Into<PathBuf>) -> Self {
        Self { out: out.into() }
    }

    fn write_report(&self, report: &SessionReport) -> vibecode_core::Result<()> {
        std::fs::create_dir_all(&self.out)?;

        if let Some(artifact) = &report.final_artifact {
            artifact.validate()?;
            for file in &artifact.files {
                let target = self.out.join(&file.path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, &file.content)?;
            }
        }

        std::fs::write(self.out.join(SUMMARY_FILE), render_summary(report))?;
        Ok(())
    }
}

#[async_trait]
impl DeliverySink for DirectorySink {
    async fn deliver(&self, report: &SessionReport) -> vibecode_core::Result<()> {
        self.write_report(report)?;
        info!(out = ?self.out, verdict = report.verdict.label(), "session delivered");
        Ok(())
    }
}

fn render_summary(report: &SessionReport) -> String {
    let mut text = String::new();
    let title = report
        .final_artifact
        .as_ref()
        .map(|a| a.name.as_str())
        .unwrap_or("vibecode session");
    text.push_str(&format!("# {title}\n\n"));
    text.push_str(&format!("- Session: `{}`\n", report.session_id));
    text.push_str(&format!("- Verdict: {}\n", report.verdict));
    text.push_str(&format!("- Attempts: {}\n", report.attempts_used));
    text.push_str(&format!("- Duration: {} ms\n", report.duration_ms));
    if let Some(artifact) = &report.final_artifact {
        text.push_str("\n## Files\n\n");
        for file in &artifact.files {
            text.push_str(&format!("- `{}`\n", file.path));
        }
    }
    text.push_str("\n## History\n\n```text\n");
    text.push_str(&report.summary);
    text.push_str("\n```\n");
    text
}
