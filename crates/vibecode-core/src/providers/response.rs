//! Turning raw model text into project files.
//!
//! The preferred answer is a JSON project object, bare or inside a fenced
//! block. A single-file project may also be answered with a plain fenced code
//! block, which then replaces that one file.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::collaborator::GeneratedProject;
use crate::domain::SourceFile;

use super::ProviderError;

#[derive(Debug, Deserialize)]
struct ProjectPayload {
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    files: BTreeMap<String, String>,
}

fn fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:[\w+-]+)?[ \t]*\n?(.*?)\s*```").ok())
        .as_ref()
}

/// Parse a model answer into a project.
///
/// `single_file` names the file a bare code block replaces; without it only
/// JSON answers are accepted.
pub fn parse_project(
    text: &str,
    single_file: Option<&str>,
) -> Result<GeneratedProject, ProviderError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::Unusable("empty response".into()));
    }

    if let Some(project) = json_candidates(text)
        .into_iter()
        .find_map(|candidate| serde_json::from_str::<ProjectPayload>(candidate).ok())
    {
        return into_project(project);
    }

    let Some(path) = single_file else {
        return Err(ProviderError::Unusable(
            "response is not a JSON project object".into(),
        ));
    };
    let code = fence()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);
    if code.trim().is_empty() {
        return Err(ProviderError::Unusable("empty code block".into()));
    }
    Ok(GeneratedProject {
        name: None,
        description: None,
        files: vec![SourceFile::new(path, format!("{}\n", code.trim_end()))],
    })
}

fn json_candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text];
    if let Some(re) = fence() {
        out.extend(
            re.captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str()),
        );
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            out.push(&text[start..=end]);
        }
    }
    out
}

fn into_project(payload: ProjectPayload) -> Result<GeneratedProject, ProviderError> {
    let files: Vec<SourceFile> = payload
        .files
        .into_iter()
        .map(|(path, content)| SourceFile::new(path, content))
        .collect();
    if files.iter().all(|f| f.content.trim().is_empty()) {
        return Err(ProviderError::Unusable("project has no file content".into()));
    }
    Ok(GeneratedProject {
        name: payload.project_name.filter(|n| !n.trim().is_empty()),
        description: payload.description,
        files,
    })
}
