//! Persisted, digest-verified session audit trails.
//!
//! Layout: `<dir>/<session_id>/session.json` plus `session.digest`, the
//! SHA-256 of the JSON bytes.

use std::path::{Path, PathBuf};

use crate::collaborator::SessionReport;
use crate::domain::{ContentDigest, Result, VibeError};

const REPORT_FILE: &str = "session.json";
const DIGEST_FILE: &str = "session.digest";

/// Persist a report; returns the path of the JSON file.
pub fn write_session_audit(report: &SessionReport, dir: &Path) -> Result<PathBuf> {
    let session_dir = dir.join(&report.session_id);
    std::fs::create_dir_all(&session_dir)?;

    let report_path = session_dir.join(REPORT_FILE);
    let digest_path = session_dir.join(DIGEST_FILE);
    let json = serde_json::to_vec_pretty(report)?;
    let digest = ContentDigest::from_bytes(&json);

    std::fs::write(&report_path, &json)?;
    std::fs::write(&digest_path, digest.as_str().as_bytes())?;

    Ok(report_path)
}

/// Read a report back, refusing it if the digest does not match.
pub fn read_session_audit(session_id: &str, dir: &Path) -> Result<SessionReport> {
    let session_dir = dir.join(session_id);
    let json = std::fs::read(session_dir.join(REPORT_FILE))?;
    let expected = std::fs::read_to_string(session_dir.join(DIGEST_FILE))?;
    let actual = ContentDigest::from_bytes(&json);
    if expected.trim() != actual.as_str() {
        return Err(VibeError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.as_str().to_string(),
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
