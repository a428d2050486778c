//! Versioned candidate code projects.
//!
//! An [`Artifact`] is immutable once created. A correction never edits an
//! artifact in place; [`Artifact::revise`] produces the next version and keeps
//! a pointer to its parent so the audit trail can be replayed.

use std::collections::HashSet;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::digest::ContentDigest;
use super::error::ArtifactError;

/// Unique identity of one artifact version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target language of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    Shell,
    Other(String),
}

impl Language {
    /// Parse a user-supplied language tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Language::Python,
            "javascript" | "js" | "node" | "nodejs" => Language::JavaScript,
            "shell" | "sh" | "bash" => Language::Shell,
            other => Language::Other(other.to_string()),
        }
    }

    /// File extension used by this language's sources.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Language::Python => Some("py"),
            Language::JavaScript => Some("js"),
            Language::Shell => Some("sh"),
            Language::Other(_) => None,
        }
    }

    /// Infer the dominant language from a set of file paths.
    ///
    /// Counts recognised extensions and picks the most frequent one; ties are
    /// broken in favour of Python, then JavaScript, then Shell.
    pub fn infer<'a, I>(paths: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts = [0usize; 3];
        for path in paths {
            match Path::new(path).extension().and_then(|e| e.to_str()) {
                Some("py") => counts[0] += 1,
                Some("js") | Some("mjs") | Some("cjs") => counts[1] += 1,
                Some("sh") => counts[2] += 1,
                _ => {}
            }
        }
        let best = counts.iter().copied().max().unwrap_or(0);
        if best == 0 {
            return Language::Other("unknown".to_string());
        }
        if counts[0] == best {
            Language::Python
        } else if counts[1] == best {
            Language::JavaScript
        } else {
            Language::Shell
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
            Language::Shell => write!(f, "shell"),
            Language::Other(s) => write!(f, "{s}"),
        }
    }
}

/// One source file inside an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the project root.
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// One candidate code project under validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    /// 1 for the generated project, incremented by every correction.
    pub version: u32,
    pub parent: Option<ArtifactId>,
    pub name: String,
    pub language: Language,
    pub files: Vec<SourceFile>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create the first version of an artifact.
    pub fn new(name: impl Into<String>, language: Language, files: Vec<SourceFile>) -> Self {
        Self {
            id: ArtifactId::new(),
            version: 1,
            parent: None,
            name: name.into(),
            language,
            files,
            created_at: Utc::now(),
        }
    }

    /// Create an artifact whose language is inferred from file extensions.
    pub fn from_files(name: impl Into<String>, files: Vec<SourceFile>) -> Self {
        let language = Language::infer(files.iter().map(|f| f.path.as_str()));
        Self::new(name, language, files)
    }

    /// Produce the next version of this artifact with new file contents.
    pub fn revise(&self, files: Vec<SourceFile>) -> Self {
        Self {
            id: ArtifactId::new(),
            version: self.version + 1,
            parent: Some(self.id),
            name: self.name.clone(),
            language: self.language.clone(),
            files,
            created_at: Utc::now(),
        }
    }

    /// Look up a file by its relative path.
    pub fn file(&self, path: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Content digest over files sorted by path.
    pub fn digest(&self) -> ContentDigest {
        let mut entries: Vec<(&str, &str)> = self
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.content.as_str()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        ContentDigest::from_entries(entries)
    }

    /// Total size of all file contents in bytes.
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }

    /// `true` when every file is blank; such a response is unusable.
    pub fn is_blank(&self) -> bool {
        self.files.iter().all(|f| f.content.trim().is_empty())
    }

    /// Check structural invariants: non-empty, unique, contained relative paths.
    pub fn validate(&self) -> std::result::Result<(), ArtifactError> {
        if self.files.is_empty() {
            return Err(ArtifactError::Empty);
        }
        let mut seen = HashSet::new();
        for file in &self.files {
            validate_relative_path(&file.path)?;
            if !seen.insert(file.path.as_str()) {
                return Err(ArtifactError::DuplicatePath {
                    path: file.path.clone(),
                });
            }
        }
        Ok(())
    }
}

fn validate_relative_path(path: &str) -> std::result::Result<(), ArtifactError> {
    if path.trim().is_empty() {
        return Err(ArtifactError::EmptyPath);
    }
    let escapes = Path::new(path).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ArtifactError::PathEscape {
            path: path.to_string(),
        });
    }
    Ok(())
}
