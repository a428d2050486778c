//! Entry-point resolution: which file to run and with what interpreter.

use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::{Artifact, Language};

const PYTHON_CANDIDATES: &[&str] = &[
    "main.py",
    "app.py",
    "run.py",
    "start.py",
    "__main__.py",
    "index.py",
    "server.py",
    "bot.py",
    "client.py",
];
const JAVASCRIPT_CANDIDATES: &[&str] = &["index.js", "main.js", "app.js", "server.js"];
const SHELL_CANDIDATES: &[&str] = &["main.sh", "run.sh", "start.sh"];

/// A resolved command line for an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Relative path of the file that is run.
    pub path: String,
    pub program: String,
    pub args: Vec<String>,
}

/// Why no entry point could be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    /// The language has no runner.
    Unsupported(String),
    /// The language is supported but no runnable file exists.
    Missing(String),
}

fn default_program(language: &Language) -> Option<&'static str> {
    match language {
        Language::Python => Some("python3"),
        Language::JavaScript => Some("node"),
        Language::Shell => Some("sh"),
        Language::Other(_) => None,
    }
}

fn has_extension(path: &str, ext: &str) -> bool {
    Path::new(path).extension().and_then(|e| e.to_str()) == Some(ext)
}

fn pick_file(artifact: &Artifact, candidates: &[&str], ext: &str) -> Option<String> {
    // Root-level well-known names first, in priority order.
    for candidate in candidates {
        if artifact.file(candidate).is_some() {
            return Some((*candidate).to_string());
        }
    }
    if ext == "py" {
        let guarded = artifact.files.iter().find(|f| {
            has_extension(&f.path, ext)
                && (f.content.contains("if __name__ == \"__main__\"")
                    || f.content.contains("if __name__ == '__main__'"))
        });
        if let Some(file) = guarded {
            return Some(file.path.clone());
        }
    }
    artifact
        .files
        .iter()
        .find(|f| has_extension(&f.path, ext))
        .map(|f| f.path.clone())
}

/// Resolve the entry point of an artifact.
///
/// `interpreters` overrides the default program per language tag.
pub fn resolve(
    artifact: &Artifact,
    interpreters: &BTreeMap<String, String>,
) -> Result<EntryPoint, EntryError> {
    let (candidates, ext) = match &artifact.language {
        Language::Python => (PYTHON_CANDIDATES, "py"),
        Language::JavaScript => (JAVASCRIPT_CANDIDATES, "js"),
        Language::Shell => (SHELL_CANDIDATES, "sh"),
        Language::Other(tag) => {
            return Err(EntryError::Unsupported(format!(
                "no runner for language '{tag}'"
            )))
        }
    };
    let program = interpreters
        .get(&artifact.language.to_string())
        .cloned()
        .or_else(|| default_program(&artifact.language).map(str::to_string))
        .ok_or_else(|| EntryError::Unsupported(artifact.language.to_string()))?;

    let path = pick_file(artifact, candidates, ext).ok_or_else(|| {
        EntryError::Missing(format!(
            "no executable entry point: expected one of {} or any .{ext} file",
            candidates.join(", ")
        ))
    })?;

    let mut args = Vec::new();
    if artifact.language == Language::Python {
        // -B: no bytecode files in the workspace
        args.push("-B".to_string());
    }
    args.push(path.clone());
    Ok(EntryPoint {
        path,
        program,
        args,
    })
}
