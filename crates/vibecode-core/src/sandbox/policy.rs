//! Allow-list policy: static capability scan and post-hoc log inspection.
//!
//! Every source file is scanned line by line with the detection rules of its
//! language. A detected capability that is not on the allow-list is a
//! violation and the artifact is never started. Shell redirections and file
//! utility arguments are checked for paths that leave the working directory.
//! Operations that slip past the scan are caught after the run by looking for
//! denial markers in stderr.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::Artifact;

use super::capability::Capability;

/// A detected use of a capability that the policy does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub capability: Capability,
    /// What matched, e.g. `socket module`.
    pub operation: String,
    /// `path:line` of the match, or `stderr` for post-hoc findings.
    pub location: String,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) at {}",
            self.capability, self.operation, self.location
        )
    }
}

#[derive(Clone, Copy)]
enum SourceFamily {
    Python,
    JavaScript,
    Shell,
}

impl SourceFamily {
    fn of(path: &str) -> Option<Self> {
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("py") => Some(SourceFamily::Python),
            Some("js") | Some("mjs") | Some("cjs") => Some(SourceFamily::JavaScript),
            Some("sh") => Some(SourceFamily::Shell),
            _ => None,
        }
    }

    fn comment_prefix(&self) -> &'static str {
        match self {
            SourceFamily::Python | SourceFamily::Shell => "#",
            SourceFamily::JavaScript => "//",
        }
    }
}

struct DetectionRule {
    capability: Capability,
    operation: &'static str,
    regex: Regex,
    /// Group 1 holds path operands; the rule fires only if one leaves the workspace.
    path_operands: bool,
}

impl DetectionRule {
    fn matches(&self, line: &str) -> bool {
        if !self.path_operands {
            return self.regex.is_match(line);
        }
        self.regex.captures_iter(line).any(|caps| {
            caps.get(1).is_some_and(|operands| {
                operands
                    .as_str()
                    .split_whitespace()
                    .filter(|operand| !operand.starts_with('-'))
                    .any(escapes_workspace)
            })
        })
    }
}

fn compile(specs: &[(Capability, &'static str, &'static str)]) -> Vec<DetectionRule> {
    compile_with(specs, false)
}

fn compile_with(
    specs: &[(Capability, &'static str, &'static str)],
    path_operands: bool,
) -> Vec<DetectionRule> {
    specs
        .iter()
        .filter_map(|(capability, operation, pattern)| {
            Regex::new(pattern).ok().map(|regex| DetectionRule {
                capability: *capability,
                operation: *operation,
                regex,
                path_operands,
            })
        })
        .collect()
}

/// Absolute paths a script may always name.
const DEVICE_PATHS: &[&str] = &["/dev/null", "/dev/stdin", "/dev/stdout", "/dev/stderr"];

/// Variables the executor points at the workspace.
const WORKSPACE_VARS: &[&str] = &["HOME", "TMPDIR", "PWD"];

/// Whether a shell operand can resolve outside the working directory.
///
/// Expansions of other variables used as a path prefix are treated as
/// escaping, since the executor clears the environment and an unset prefix
/// turns `$X/file` into `/file`.
fn escapes_workspace(operand: &str) -> bool {
    let operand = operand.trim_matches(&['"', '\''][..]);
    let rest = match strip_workspace_var(operand) {
        Some(rest) => rest,
        None if operand.starts_with('$') => return operand.contains('/'),
        None => operand,
    };
    if rest.starts_with('~') {
        return true;
    }
    if rest.starts_with('/') && !DEVICE_PATHS.contains(&rest) {
        return true;
    }
    rest.split('/').any(|part| part == "..")
}

/// `$HOME/x` and `${HOME}/x` become `x`.
fn strip_workspace_var(operand: &str) -> Option<&str> {
    let body = operand.strip_prefix('$')?;
    WORKSPACE_VARS.iter().find_map(|var| {
        let rest = body
            .strip_prefix('{')
            .and_then(|b| b.strip_prefix(*var))
            .and_then(|b| b.strip_prefix('}'))
            .or_else(|| body.strip_prefix(*var))?;
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix('/').map(|r| r.trim_start_matches('/'))
        }
    })
}

fn python_rules() -> &'static [DetectionRule] {
    static RULES: OnceLock<Vec<DetectionRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile(&[
            (
                Capability::Network,
                "network module",
                r"^\s*(import|from)\s+(socket|urllib\d?|urllib3|requests|http|httpx|aiohttp|ftplib|smtplib|telnetlib)\b",
            ),
            (Capability::Network, "socket call", r"\bsocket\s*\.\s*socket\s*\("),
            (
                Capability::Subprocess,
                "subprocess module",
                r"^\s*(import|from)\s+subprocess\b|\bsubprocess\s*\.",
            ),
            (
                Capability::Subprocess,
                "os process call",
                r"\bos\s*\.\s*(system|popen|exec\w*|spawn\w*|fork)\s*\(",
            ),
            (Capability::DynamicCode, "eval/exec", r"(^|[^.\w])(eval|exec)\s*\("),
            (Capability::DynamicCode, "dynamic import", r"__import__\s*\(|\bimportlib\b"),
            (
                Capability::DynamicCode,
                "unsafe deserialization",
                r"\b(pickle|marshal)\s*\.\s*loads?\s*\(",
            ),
            (Capability::NativeCode, "native bindings", r"\b(ctypes|cffi)\b"),
            (
                Capability::HostFilesystem,
                "path outside working directory",
                r#"\bopen\s*\(\s*[rbf]*["'](/|\.\./|~)"#,
            ),
            (
                Capability::HostFilesystem,
                "destructive filesystem call",
                r"\bshutil\s*\.\s*rmtree\s*\(\s*['\x22]/",
            ),
            (Capability::InteractiveInput, "input()", r"(^|[^.\w])(raw_)?input\s*\("),
            (Capability::EnvironmentAccess, "os.environ", r"\bos\s*\.\s*(environ|getenv)\b"),
            (
                Capability::ProcessExit,
                "explicit exit",
                r"\bsys\s*\.\s*exit\s*\(|\bos\s*\.\s*_exit\s*\(",
            ),
        ])
    })
}

fn javascript_rules() -> &'static [DetectionRule] {
    static RULES: OnceLock<Vec<DetectionRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile(&[
            (
                Capability::Network,
                "network module",
                r#"(require\s*\(\s*|from\s+)["'](node:)?(net|http|https|http2|dgram|tls|dns)["']"#,
            ),
            (Capability::Network, "fetch()", r"(^|[^.\w])fetch\s*\("),
            (
                Capability::Subprocess,
                "child_process module",
                r#"["'](node:)?child_process["']"#,
            ),
            (Capability::DynamicCode, "eval", r"(^|[^.\w])eval\s*\("),
            (Capability::DynamicCode, "Function constructor", r"\bnew\s+Function\s*\("),
            (
                Capability::NativeCode,
                "native addon",
                r#"["'](ffi-napi|node-gyp-build|bindings)["']"#,
            ),
            (
                Capability::HostFilesystem,
                "path outside working directory",
                r#"\bfs\s*\.\s*\w+(Sync)?\s*\(\s*["'](/|\.\./|~)"#,
            ),
            (
                Capability::InteractiveInput,
                "stdin reader",
                r#"["'](node:)?readline["']|process\.stdin"#,
            ),
            (Capability::EnvironmentAccess, "process.env", r"\bprocess\s*\.\s*env\b"),
            (Capability::ProcessExit, "process.exit", r"\bprocess\s*\.\s*exit\s*\("),
        ])
    })
}

fn shell_rules() -> &'static [DetectionRule] {
    static RULES: OnceLock<Vec<DetectionRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let mut rules = compile(&[
            (
                Capability::Network,
                "network client",
                r"(^|[\s;|&(])(curl|wget|nc|ncat|ssh|scp|telnet|ftp)(\s|$)",
            ),
            (
                Capability::Subprocess,
                "nested interpreter",
                r"(^|[\s;|&(])(bash|sh|zsh|python3?|node)\s+-c\b",
            ),
            (Capability::DynamicCode, "eval", r"(^|[\s;|&(])eval(\s|$)"),
            (
                Capability::HostFilesystem,
                "privileged or host path operation",
                r"(^|[\s;|&(])(sudo|chmod\s+-R\s+/|rm\s+-rf?\s+/)",
            ),
            (
                Capability::InteractiveInput,
                "read -p prompt",
                r"(^|[\s;|&(])read\s+(-\w+\s+)*-p\b",
            ),
            (Capability::ProcessExit, "exit", r"(^|[\s;|&(])exit(\s|$)"),
        ]);
        rules.extend(compile_with(
            &[
                (
                    Capability::HostFilesystem,
                    "redirect outside working directory",
                    r"(?:>>?|<)\|?\s*([^\s;|&<>()]+)",
                ),
                (
                    Capability::HostFilesystem,
                    "path outside working directory",
                    r"(?:^|[\s;|&(])(?:cd|pushd|cp|mv|rm|rmdir|touch|mkdir|tee|chmod|chown|ln|cat|head|tail|ls|find|truncate|source)((?:\s+[^\s;|&<>()]+)*)",
                ),
            ],
            true,
        ));
        rules
    })
}

fn rules_for(family: SourceFamily) -> &'static [DetectionRule] {
    match family {
        SourceFamily::Python => python_rules(),
        SourceFamily::JavaScript => javascript_rules(),
        SourceFamily::Shell => shell_rules(),
    }
}

/// stderr markers that reveal a denied operation after the fact.
///
/// Filesystem denials only count when the same line names an absolute path;
/// workspace paths have already been scrubbed to `./...` by then.
fn denial_markers() -> &'static [DetectionRule] {
    static RULES: OnceLock<Vec<DetectionRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile(&[
            (
                Capability::Network,
                "network unreachable",
                r"Network is unreachable|\bENETUNREACH\b",
            ),
            (
                Capability::Network,
                "name resolution",
                r"Temporary failure in name resolution|getaddrinfo (ENOTFOUND|EAI_AGAIN)",
            ),
            (
                Capability::Network,
                "socket call denied",
                r"\b(connect|bind|listen|sendto)\s+(EPERM|EACCES)\b",
            ),
            (
                Capability::HostFilesystem,
                "host path denied",
                r#"(?i)(operation not permitted|permission denied|read-only file system).*(^|[\s'"(=:,])/[\w.]"#,
            ),
            (
                Capability::HostFilesystem,
                "host path denied",
                r#"(?i)(^|[\s'"(=:,])/[\w.][^\s'"]*.*(operation not permitted|permission denied|read-only file system)"#,
            ),
        ])
    })
}

/// An allow-list of capabilities; everything else is denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub allowed: Vec<Capability>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allowed: Capability::default_allowed(),
        }
    }
}

impl SandboxPolicy {
    pub fn new(allowed: Vec<Capability>) -> Self {
        Self { allowed }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.allowed.contains(&capability)
    }

    /// Scan every recognised source file; returns all violations found.
    ///
    /// Files with unrecognised extensions (data, docs) are not scanned.
    /// Comment-only lines are skipped.
    pub fn scan(&self, artifact: &Artifact) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        for file in &artifact.files {
            let Some(family) = SourceFamily::of(&file.path) else {
                continue;
            };
            let rules = rules_for(family);
            for (idx, line) in file.content.lines().enumerate() {
                if line.trim_start().starts_with(family.comment_prefix()) {
                    continue;
                }
                for rule in rules {
                    if self.allows(rule.capability) || !rule.matches(line) {
                        continue;
                    }
                    violations.push(PolicyViolation {
                        capability: rule.capability,
                        operation: rule.operation.to_string(),
                        location: format!("{}:{}", file.path, idx + 1),
                    });
                }
            }
        }
        violations
    }

    /// Look for denial markers in captured stderr.
    pub fn inspect_output(&self, stderr: &str) -> Option<PolicyViolation> {
        stderr.lines().find_map(|line| {
            denial_markers()
                .iter()
                .find(|rule| !self.allows(rule.capability) && rule.regex.is_match(line))
                .map(|rule| PolicyViolation {
                    capability: rule.capability,
                    operation: rule.operation.to_string(),
                    location: "stderr".to_string(),
                })
        })
    }
}
