//! Structured observability hooks for correction session lifecycle events.
//!
//! - Session-scoped tracing spans via the [`SessionSpan`] RAII guard
//! - Emission functions for key lifecycle events
//!
//! Events are emitted at `info!` level and carry an `event` field so they can
//! be filtered out of JSON logs (`vibecode --json`).

use tracing::{info, warn};

use crate::domain::{Diagnosis, Strategy};

/// RAII guard that enters a session-scoped span for the duration of a session.
///
/// ```ignore
/// let _span = SessionSpan::enter("5f0c...");
/// // all tracing calls now carry session_id = "5f0c..."
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        let span = tracing::info_span!("vibecode.session", session_id = %session_id);
        Self {
            _span: span.entered(),
        }
    }

    /// The span without entering it, for instrumenting futures.
    pub fn span(session_id: &str) -> tracing::Span {
        tracing::info_span!("vibecode.session", session_id = %session_id)
    }
}

pub fn emit_session_started(session_id: &str, origin: &str, max_attempts: u32) {
    info!(
        event = "session.started",
        session_id = %session_id,
        origin = %origin,
        max_attempts = max_attempts,
    );
}

pub fn emit_attempt_executed(
    attempt: u32,
    artifact_version: u32,
    elapsed_ms: u64,
    exit_code: Option<i32>,
) {
    info!(
        event = "attempt.executed",
        attempt = attempt,
        artifact_version = artifact_version,
        elapsed_ms = elapsed_ms,
        exit_code = ?exit_code,
    );
}

pub fn emit_attempt_diagnosed(attempt: u32, diagnosis: &Diagnosis, score: u8) {
    info!(
        event = "attempt.diagnosed",
        attempt = attempt,
        kind = %diagnosis.kind(),
        score = score,
        summary = %diagnosis.summary(),
    );
}

pub fn emit_strategy_selected(attempt: u32, strategy: Strategy, stagnant: bool) {
    info!(
        event = "strategy.selected",
        attempt = attempt,
        strategy = %strategy,
        stagnant = stagnant,
    );
}

pub fn emit_stagnation_flagged(attempt: u32, run_length: usize) {
    warn!(event = "stagnation.flagged", attempt = attempt, run_length = run_length);
}

pub fn emit_repeated_artifact(attempt: u32, digest: &str) {
    warn!(event = "artifact.repeated", attempt = attempt, digest = %digest);
}

pub fn emit_collaborator_retry(
    operation: &str,
    call: u32,
    backoff_ms: u64,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "collaborator.retry",
        operation = %operation,
        call = call,
        backoff_ms = backoff_ms,
        error = %error,
    );
}

pub fn emit_session_finished(session_id: &str, verdict: &str, attempts: u32, duration_ms: u64) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        verdict = %verdict,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: delivery or audit persistence failed (warning level).
pub fn emit_delivery_error(session_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "session.delivery_error", session_id = %session_id, error = %error);
}
