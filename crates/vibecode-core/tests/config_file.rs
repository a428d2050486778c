//! Loading configuration files and reading audit trails from disk.

use tempfile::tempdir;

use vibecode_core::{read_session_audit, ConfigError, CorrectionConfig, Strategy, VibeError};

#[test]
fn full_config_file_round_trips_through_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vibecode.toml");
    std::fs::write(
        &path,
        r#"
[sandbox]
timeout_ms = 2000
memory_limit_mb = 128
allowed = ["file_read", "file_write", "network"]

[sandbox.interpreters]
python = "/usr/bin/python3"

[correction]
max_attempts = 4
collaborator_attempts = 2

[stagnation]
window = 2
threshold = 3
similarity = 0.9

[[strategies]]
strategy = "conservative"
directive = "touch as little as possible"

[[strategies]]
strategy = "rewrite"
directive = "start again"

[[strategies]]
strategy = "hybrid"
directive = "merge the best attempt"
"#,
    )
    .unwrap();

    let config = CorrectionConfig::load(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.sandbox.timeout_ms, 2000);
    assert_eq!(config.sandbox.allowed.len(), 3);
    assert_eq!(
        config.sandbox.interpreters.get("python").map(String::as_str),
        Some("/usr/bin/python3")
    );
    assert_eq!(config.correction.max_attempts, 4);
    assert_eq!(config.correction.collaborator_backoff_ms, 500);
    assert_eq!(config.stagnation.threshold, 3);
    assert_eq!(config.strategies.first(), Strategy::Conservative);
    assert_eq!(config.strategies.directive(Strategy::Rewrite), "start again");
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempdir().unwrap();
    let err = CorrectionConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[correction\nmax_attempts = ").unwrap();
    let err = CorrectionConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("bad.toml"));
}

#[test]
fn resolve_rejects_an_invalid_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zero.toml");
    std::fs::write(&path, "[correction]\nmax_attempts = 0\n").unwrap();
    let err = CorrectionConfig::resolve(Some(&path)).unwrap_err();
    let err: VibeError = err.into();
    assert!(matches!(err, VibeError::InvalidConfig(ref msg) if msg.contains("max_attempts")));
}

#[test]
fn unknown_session_audit_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = read_session_audit("no-such-session", dir.path()).unwrap_err();
    assert!(matches!(err, VibeError::Io(_)));
}
