//! Classified root cause of one execution outcome.

use serde::{Deserialize, Serialize};

/// Which resource limit a run exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Memory,
    Output,
    Recursion,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::Output => write!(f, "output"),
            ResourceKind::Recursion => write!(f, "recursion"),
        }
    }
}

/// Closed set of failure classes. Exactly one is active per result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnosis {
    Success,
    SyntaxError { detail: String },
    RuntimeError { detail: String, stack: Vec<String> },
    Timeout,
    ResourceLimitExceeded { kind: ResourceKind },
    SecurityViolation { operation: String },
    LogicalMismatch { expected: String, actual: String },
    Unknown { raw: String },
}

/// Payload-free tag of a [`Diagnosis`], used for kind comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisKind {
    Success,
    SyntaxError,
    RuntimeError,
    Timeout,
    ResourceLimitExceeded,
    SecurityViolation,
    LogicalMismatch,
    Unknown,
}

impl std::fmt::Display for DiagnosisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagnosisKind::Success => "success",
            DiagnosisKind::SyntaxError => "syntax_error",
            DiagnosisKind::RuntimeError => "runtime_error",
            DiagnosisKind::Timeout => "timeout",
            DiagnosisKind::ResourceLimitExceeded => "resource_limit_exceeded",
            DiagnosisKind::SecurityViolation => "security_violation",
            DiagnosisKind::LogicalMismatch => "logical_mismatch",
            DiagnosisKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl Diagnosis {
    pub fn kind(&self) -> DiagnosisKind {
        match self {
            Diagnosis::Success => DiagnosisKind::Success,
            Diagnosis::SyntaxError { .. } => DiagnosisKind::SyntaxError,
            Diagnosis::RuntimeError { .. } => DiagnosisKind::RuntimeError,
            Diagnosis::Timeout => DiagnosisKind::Timeout,
            Diagnosis::ResourceLimitExceeded { .. } => DiagnosisKind::ResourceLimitExceeded,
            Diagnosis::SecurityViolation { .. } => DiagnosisKind::SecurityViolation,
            Diagnosis::LogicalMismatch { .. } => DiagnosisKind::LogicalMismatch,
            Diagnosis::Unknown { .. } => DiagnosisKind::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Diagnosis::Success)
    }

    /// Text payload compared for near-duplicate detection.
    ///
    /// Variants without text return `None` and compare equal by kind alone.
    pub fn detail(&self) -> Option<String> {
        match self {
            Diagnosis::SyntaxError { detail } | Diagnosis::RuntimeError { detail, .. } => {
                Some(detail.clone())
            }
            Diagnosis::SecurityViolation { operation } => Some(operation.clone()),
            Diagnosis::LogicalMismatch { expected, actual } => {
                Some(format!("expected {expected} got {actual}"))
            }
            Diagnosis::Unknown { raw } => Some(raw.clone()),
            Diagnosis::ResourceLimitExceeded { kind } => Some(kind.to_string()),
            Diagnosis::Success | Diagnosis::Timeout => None,
        }
    }

    /// Progress score in `[0, 100]`; higher means closer to accepted.
    pub fn progress_score(&self) -> u8 {
        match self {
            Diagnosis::Success => 100,
            Diagnosis::LogicalMismatch { .. } => 80,
            Diagnosis::RuntimeError { .. } => 60,
            Diagnosis::Timeout | Diagnosis::ResourceLimitExceeded { .. } => 40,
            Diagnosis::SecurityViolation { .. } => 30,
            Diagnosis::SyntaxError { .. } => 20,
            Diagnosis::Unknown { .. } => 0,
        }
    }

    /// One-line human summary for delivery and prompts.
    pub fn summary(&self) -> String {
        match self {
            Diagnosis::Success => "success".to_string(),
            Diagnosis::SyntaxError { detail } => format!("syntax error: {detail}"),
            Diagnosis::RuntimeError { detail, .. } => format!("runtime error: {detail}"),
            Diagnosis::Timeout => "execution timed out".to_string(),
            Diagnosis::ResourceLimitExceeded { kind } => {
                format!("{kind} limit exceeded")
            }
            Diagnosis::SecurityViolation { operation } => {
                format!("security violation: {operation}")
            }
            Diagnosis::LogicalMismatch { expected, actual } => {
                format!("output mismatch: expected {expected:?}, got {actual:?}")
            }
            Diagnosis::Unknown { raw } => format!("unclassified failure: {raw}"),
        }
    }
}
