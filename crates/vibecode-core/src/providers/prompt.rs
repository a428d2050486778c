//! Persona selection and prompt construction.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::collaborator::{CorrectionRequest, GenerationRequest};
use crate::domain::{Artifact, Diagnosis, DiagnosisKind, Strategy};

/// Role the model is asked to play for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    SeniorDeveloper,
    Debugger,
    Optimizer,
    SecurityExpert,
    Architect,
}

impl Persona {
    /// Pick the persona for a correction.
    ///
    /// Security findings always go to the security persona. Otherwise the
    /// regenerating strategies pick a design-level persona, and the remaining
    /// cases follow the failure class.
    pub fn for_correction(diagnosis: &Diagnosis, strategy: Strategy) -> Self {
        let kind = diagnosis.kind();
        if kind == DiagnosisKind::SecurityViolation {
            return Persona::SecurityExpert;
        }
        match strategy {
            Strategy::Rewrite => return Persona::SeniorDeveloper,
            Strategy::Hybrid => return Persona::Architect,
            _ => {}
        }
        match kind {
            DiagnosisKind::SyntaxError | DiagnosisKind::RuntimeError => Persona::Debugger,
            DiagnosisKind::Timeout | DiagnosisKind::ResourceLimitExceeded => Persona::Optimizer,
            _ => Persona::SeniorDeveloper,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Persona::SeniorDeveloper => {
                "You are a senior software developer. You write complete, working, \
                 well-structured programs with proper error handling. Never leave \
                 placeholders or partial files."
            }
            Persona::Debugger => {
                "You are an expert debugger. You locate the exact cause of syntax and \
                 runtime errors and fix it precisely, checking edge cases as you go."
            }
            Persona::Optimizer => {
                "You are a performance engineer. You remove unbounded loops, excessive \
                 recursion and wasteful memory use while keeping behaviour intact."
            }
            Persona::SecurityExpert => {
                "You are a secure-coding specialist. Programs you write run in a sandbox \
                 with no network, no subprocesses, no dynamic code evaluation and no \
                 access outside the working directory; you remove any such use."
            }
            Persona::Architect => {
                "You are a software architect. You restructure projects into clean \
                 modules, keeping the parts that already work."
            }
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Persona::SeniorDeveloper => "senior_developer",
            Persona::Debugger => "debugger",
            Persona::Optimizer => "optimizer",
            Persona::SecurityExpert => "security_expert",
            Persona::Architect => "architect",
        };
        write!(f, "{s}")
    }
}

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "project_name": "short_snake_case_name",
  "description": "one paragraph",
  "files": {
    "main.py": "complete file content"
  }
}
Every file must be complete. The project must run with no arguments, no network access and no user input."#;

pub fn generation_prompt(request: &GenerationRequest) -> String {
    let mut out = String::new();
    let language = request
        .language
        .as_ref()
        .map(|l| l.to_string())
        .unwrap_or_else(|| "python".to_string());
    let _ = writeln!(out, "Generate a complete {language} project for this request:");
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", request.prompt.trim());
    if let Some(context) = &request.context {
        let _ = writeln!(out);
        let _ = writeln!(out, "Additional context:\n{}", context.trim());
    }
    let _ = writeln!(out);
    out.push_str(RESPONSE_FORMAT);
    out
}

pub fn correction_prompt(request: &CorrectionRequest) -> String {
    let mut out = String::new();
    if let Some(prompt) = &request.prompt {
        let _ = writeln!(out, "The project was generated for this request:\n{}\n", prompt.trim());
    }
    let _ = writeln!(
        out,
        "Attempt {} of this project failed: {}",
        request.attempt,
        request.diagnosis.summary()
    );
    if let Diagnosis::RuntimeError { stack, .. } = &request.diagnosis {
        if !stack.is_empty() {
            let _ = writeln!(out, "Stack (innermost last):");
            for frame in stack {
                let _ = writeln!(out, "  {frame}");
            }
        }
    }
    if !request.stderr_excerpt.trim().is_empty() {
        let _ = writeln!(out, "\nstderr:\n```\n{}\n```", request.stderr_excerpt.trim_end());
    }
    let _ = writeln!(
        out,
        "\nCorrection strategy ({}): {}\n",
        request.strategy, request.directive
    );
    let _ = writeln!(out, "Current files:");
    push_files(&mut out, &request.artifact);
    if let Some(reference) = &request.reference {
        let _ = writeln!(
            out,
            "\nReference attempt (version {}); keep the parts of it that worked:",
            reference.version
        );
        push_files(&mut out, reference);
    }
    let _ = writeln!(out);
    out.push_str(RESPONSE_FORMAT);
    out
}

fn push_files(out: &mut String, artifact: &Artifact) {
    for file in &artifact.files {
        let _ = writeln!(out, "--- {} ---\n```\n{}\n```", file.path, file.content.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Language, SourceFile};

    #[test]
    fn test_persona_follows_failure_class() {
        let syntax = Diagnosis::SyntaxError { detail: "x".into() };
        assert_eq!(
            Persona::for_correction(&syntax, Strategy::Conservative),
            Persona::Debugger
        );
        assert_eq!(
            Persona::for_correction(&Diagnosis::Timeout, Strategy::Standard),
            Persona::Optimizer
        );
        assert_eq!(
            Persona::for_correction(&syntax, Strategy::Hybrid),
            Persona::Architect
        );
        let sec = Diagnosis::SecurityViolation {
            operation: "network".into(),
        };
        assert_eq!(
            Persona::for_correction(&sec, Strategy::Rewrite),
            Persona::SecurityExpert
        );
    }

    #[test]
    fn test_correction_prompt_carries_directive_and_files() {
        let artifact = Artifact::new(
            "demo",
            Language::Python,
            vec![SourceFile::new("main.py", "print(1/0)")],
        );
        let request = CorrectionRequest {
            artifact: artifact.clone(),
            diagnosis: Diagnosis::RuntimeError {
                detail: "ZeroDivisionError: division by zero".into(),
                stack: vec!["main.py:1 in <module>".into()],
            },
            strategy: Strategy::Conservative,
            directive: "Make minimal changes.".into(),
            reference: Some(artifact),
            persona: Persona::Debugger,
            attempt: 1,
            prompt: Some("divide numbers".into()),
            stderr_excerpt: String::new(),
        };
        let text = correction_prompt(&request);
        assert!(text.contains("Make minimal changes."));
        assert!(text.contains("--- main.py ---"));
        assert!(text.contains("main.py:1 in <module>"));
        assert!(text.contains("Reference attempt"));
        assert!(text.contains("\"files\""));
    }

    #[test]
    fn test_generation_prompt_defaults_to_python() {
        let request = GenerationRequest::new("print a greeting");
        let text = generation_prompt(&request);
        assert!(text.starts_with("Generate a complete python project"));
    }
}
