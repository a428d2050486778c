//! Result analyzer: classifies an [`ExecutionResult`] into a [`Diagnosis`].
//!
//! Detectors run in a fixed priority order and the first match wins:
//!
//! 1. syntax / parse failures
//! 2. runtime exceptions (only for processes that exited on their own)
//! 3. timeout and resource-limit kills
//! 4. policy violations
//! 5. output mismatch against declared [`Expectations`] (clean exit only)
//! 6. success (clean exit)
//! 7. anything else is `Unknown`
//!
//! Because runtime detection only looks at processes that exited on their own,
//! a run that was killed at the wall-clock ceiling reports `Timeout` even when
//! its partial stderr already shows an exception. A denial marker found in
//! stderr after the process exited on its own does not count as a kill: the
//! syntax and runtime detectors still see that run first.
//!
//! Analysis is pure: the stored `diagnosis` field of the input is ignored, so
//! re-analyzing a stored result always yields the same value.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{Diagnosis, ResourceKind};
use crate::sandbox::{ExecutionResult, SandboxFailure};

/// Maximum stack frames kept on a `RuntimeError`.
const MAX_STACK_FRAMES: usize = 20;

/// Maximum characters of raw output kept on an `Unknown`.
const MAX_RAW_CHARS: usize = 500;

/// Declared expectations about a clean run's stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expectations {
    /// Exact stdout after trimming trailing whitespace.
    pub expected_stdout: Option<String>,
    /// Substrings that must all appear in stdout.
    pub stdout_contains: Vec<String>,
}

impl Expectations {
    pub fn is_empty(&self) -> bool {
        self.expected_stdout.is_none() && self.stdout_contains.is_empty()
    }

    /// Returns `(expected, actual)` for the first unmet expectation.
    pub fn check(&self, stdout: &str) -> Option<(String, String)> {
        let actual = stdout.trim_end();
        if let Some(expected) = &self.expected_stdout {
            if actual != expected.trim_end() {
                return Some((expected.trim_end().to_string(), actual.to_string()));
            }
        }
        self.stdout_contains
            .iter()
            .find(|needle| !stdout.contains(needle.as_str()))
            .map(|needle| (format!("output containing {needle:?}"), actual.to_string()))
    }
}

struct Patterns {
    syntax: Regex,
    syntax_location: Regex,
    shell_syntax: Regex,
    traceback: Regex,
    exception_line: Regex,
    python_frame: Regex,
    js_frame: Regex,
    shell_error: Regex,
    address: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                syntax: Regex::new(r"(?m)^\s*(SyntaxError|IndentationError|TabError):\s*(.*)$").ok()?,
                syntax_location: Regex::new(r#"(?m)^\s*File "([^"]+)", line (\d+)"#).ok()?,
                shell_syntax: Regex::new(r"(?mi)^(.*\bsyntax error\b.*)$").ok()?,
                traceback: Regex::new(r"(?m)^Traceback \(most recent call last\):").ok()?,
                exception_line: Regex::new(
                    r"^([A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt|Warning))(?::\s*(.*))?$",
                )
                .ok()?,
                python_frame: Regex::new(r#"^\s*File "([^"]+)", line (\d+), in (.+)$"#).ok()?,
                js_frame: Regex::new(r"^\s+at (.+)$").ok()?,
                shell_error: Regex::new(
                    r"(?m)^(.*(?:command not found|No such file or directory|unbound variable|bad substitution|integer expression expected|not found).*)$",
                )
                .ok()?,
                address: Regex::new(r"0x[0-9a-fA-F]+").ok()?,
            })
        })
        .as_ref()
}

/// Stateless classifier over execution outcomes.
#[derive(Debug, Clone, Default)]
pub struct ResultAnalyzer {
    expectations: Expectations,
}

impl ResultAnalyzer {
    pub fn new(expectations: Expectations) -> Self {
        Self { expectations }
    }

    pub fn expectations(&self) -> &Expectations {
        &self.expectations
    }

    pub fn analyze(&self, result: &ExecutionResult) -> Diagnosis {
        detect_syntax(result)
            .or_else(|| detect_runtime(result))
            .or_else(|| detect_resource(result))
            .or_else(|| detect_security(result))
            .or_else(|| self.detect_mismatch(result))
            .unwrap_or_else(|| classify_remaining(result))
    }

    fn detect_mismatch(&self, result: &ExecutionResult) -> Option<Diagnosis> {
        if result.exit_code != Some(0) || result.failure.is_some() {
            return None;
        }
        self.expectations
            .check(&result.stdout)
            .map(|(expected, actual)| Diagnosis::LogicalMismatch { expected, actual })
    }
}

/// The process ran to completion and failed, with at most a post-hoc denial attached.
fn exited_nonzero(result: &ExecutionResult) -> bool {
    let ran_to_exit = matches!(
        result.failure,
        None | Some(SandboxFailure::PolicyViolation { post_hoc: true, .. })
    );
    ran_to_exit && matches!(result.exit_code, Some(code) if code != 0)
}

fn detect_syntax(result: &ExecutionResult) -> Option<Diagnosis> {
    if let Some(SandboxFailure::Malformed { detail }) = &result.failure {
        return Some(Diagnosis::SyntaxError {
            detail: detail.clone(),
        });
    }
    if !exited_nonzero(result) {
        return None;
    }
    let p = patterns()?;
    let stderr = &result.stderr;
    // A traceback ending in SyntaxError is raised at runtime (e.g. by compile()).
    if let Some(caps) = p.syntax.captures(stderr) {
        let kind = &caps[1];
        let message = caps[2].trim();
        let detail = match p.syntax_location.captures_iter(stderr).last() {
            Some(loc) => format!("{kind}: {message} at {}:{}", strip_dot(&loc[1]), &loc[2]),
            None => format!("{kind}: {message}"),
        };
        return Some(Diagnosis::SyntaxError {
            detail: normalize(&detail),
        });
    }
    p.shell_syntax.captures(stderr).map(|caps| Diagnosis::SyntaxError {
        detail: normalize(caps[1].trim()),
    })
}

fn detect_runtime(result: &ExecutionResult) -> Option<Diagnosis> {
    if !exited_nonzero(result) {
        return None;
    }
    let p = patterns()?;
    let stderr = &result.stderr;

    let exception = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| p.exception_line.is_match(line));

    if let Some(line) = exception {
        let name = p
            .exception_line
            .captures(line)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        match name.as_str() {
            "MemoryError" => {
                return Some(Diagnosis::ResourceLimitExceeded {
                    kind: ResourceKind::Memory,
                })
            }
            "RecursionError" => {
                return Some(Diagnosis::ResourceLimitExceeded {
                    kind: ResourceKind::Recursion,
                })
            }
            "RangeError" if line.contains("Maximum call stack size exceeded") => {
                return Some(Diagnosis::ResourceLimitExceeded {
                    kind: ResourceKind::Recursion,
                })
            }
            _ => {}
        }
        return Some(Diagnosis::RuntimeError {
            detail: normalize(line),
            stack: stack_frames(stderr),
        });
    }

    if stderr.contains("JavaScript heap out of memory") {
        return Some(Diagnosis::ResourceLimitExceeded {
            kind: ResourceKind::Memory,
        });
    }

    if let Some(caps) = p.shell_error.captures(stderr) {
        return Some(Diagnosis::RuntimeError {
            detail: normalize(caps[1].trim()),
            stack: Vec::new(),
        });
    }

    // Nonzero exit with a message but no recognisable exception.
    let last = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    let code = result.exit_code.unwrap_or_default();
    Some(Diagnosis::RuntimeError {
        detail: normalize(&format!("exit status {code}: {last}")),
        stack: Vec::new(),
    })
}

fn stack_frames(stderr: &str) -> Vec<String> {
    let Some(p) = patterns() else {
        return Vec::new();
    };
    let python = p.traceback.is_match(stderr);
    stderr
        .lines()
        .filter_map(|line| {
            if python {
                p.python_frame
                    .captures(line)
                    .map(|c| format!("{}:{} in {}", strip_dot(&c[1]), &c[2], c[3].trim()))
            } else {
                p.js_frame.captures(line).map(|c| c[1].trim().to_string())
            }
        })
        .filter(|frame| !frame.starts_with("node:"))
        .take(MAX_STACK_FRAMES)
        .collect()
}

fn detect_resource(result: &ExecutionResult) -> Option<Diagnosis> {
    match &result.failure {
        Some(SandboxFailure::TimedOut { .. }) => Some(Diagnosis::Timeout),
        Some(SandboxFailure::ResourceLimit { kind, .. }) => {
            Some(Diagnosis::ResourceLimitExceeded { kind: *kind })
        }
        _ => None,
    }
}

fn detect_security(result: &ExecutionResult) -> Option<Diagnosis> {
    match &result.failure {
        Some(SandboxFailure::PolicyViolation { operation, .. }) => {
            Some(Diagnosis::SecurityViolation {
                operation: operation.clone(),
            })
        }
        _ => None,
    }
}

fn classify_remaining(result: &ExecutionResult) -> Diagnosis {
    match (&result.failure, result.exit_code) {
        (None, Some(0)) => Diagnosis::Success,
        (Some(SandboxFailure::Unsupported { detail }), _)
        | (Some(SandboxFailure::Internal { detail }), _) => Diagnosis::Unknown {
            raw: truncate(detail),
        },
        (_, Some(code)) => Diagnosis::Unknown {
            raw: format!("exit status {code} with no diagnostic output"),
        },
        (_, None) => Diagnosis::Unknown {
            raw: truncate(result.stderr.trim()),
        },
    }
}

fn strip_dot(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

/// Remove run-specific noise so that repeated failures compare equal.
fn normalize(detail: &str) -> String {
    match patterns() {
        Some(p) => p.address.replace_all(detail, "0x?").into_owned(),
        None => detail.to_string(),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_RAW_CHARS).collect()
}
