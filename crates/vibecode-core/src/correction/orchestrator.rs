//! Correction orchestrator: drives one session from artifact to verdict.
//!
//! ```text
//! Generated -> Executing -> Diagnosed -> Accepted
//!                  ^            |
//!                  |            +-> Exhausted
//!                  |            v
//!                  +------- Correcting -> Fatal
//! ```
//!
//! `Cancelled` is reachable from every non-terminal state that waits on
//! something (before a run, during a run, during a collaborator call).
//! Within a session everything is sequential: a correction is never requested
//! before the previous run has returned and its workspace is gone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::analyzer::{Expectations, ResultAnalyzer};
use crate::collaborator::{
    CodeGenerator, CorrectionRequest, DeliverySink, GenerationRequest, SessionReport,
};
use crate::config::CorrectionConfig;
use crate::domain::{Artifact, Language, Result, Strategy, VibeError};
use crate::metrics::METRICS;
use crate::obs::{self, SessionSpan};
use crate::providers::Persona;
use crate::sandbox::Executor;

use super::audit::write_session_audit;
use super::retry::{call_with_retry, CallOutcome, RetryPolicy};
use super::selector;
use super::session::{CorrectionSession, Verdict};
use super::stagnation::StagnationDetector;

/// Characters of stderr forwarded to the collaborator with a correction.
const STDERR_EXCERPT_CHARS: usize = 2_000;

/// Drives correction sessions. Cheap to share: all state lives in the session.
pub struct CorrectionOrchestrator {
    config: Arc<CorrectionConfig>,
    executor: Arc<dyn Executor>,
    generator: Arc<dyn CodeGenerator>,
    analyzer: ResultAnalyzer,
    detector: StagnationDetector,
    retry: RetryPolicy,
    sink: Option<Arc<dyn DeliverySink>>,
    audit_dir: Option<PathBuf>,
}

impl CorrectionOrchestrator {
    /// Validates `config`; a non-positive budget or broken table is a hard error.
    pub fn new(
        config: Arc<CorrectionConfig>,
        executor: Arc<dyn Executor>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Result<Self> {
        config.validate().map_err(VibeError::from)?;
        Ok(Self {
            detector: StagnationDetector::new(&config.stagnation),
            retry: RetryPolicy::from(&config.correction),
            analyzer: ResultAnalyzer::default(),
            config,
            executor,
            generator,
            sink: None,
            audit_dir: None,
        })
    }

    pub fn with_expectations(mut self, expectations: Expectations) -> Self {
        self.analyzer = ResultAnalyzer::new(expectations);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &ResultAnalyzer {
        &self.analyzer
    }

    /// Generate a project from a prompt, then validate and correct it.
    ///
    /// A generation failure ends the session `Fatal` with no attempt spent.
    pub async fn run_from_prompt(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<SessionReport> {
        let session_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let span = SessionSpan::span(&session_id);

        async {
            obs::emit_session_started(&session_id, "prompt", self.config.correction.max_attempts);
            METRICS.inc_sessions_started();

            let outcome = call_with_retry(&self.retry, "generate", &cancel, || {
                self.generator.generate(&request)
            })
            .await;

            let project = match outcome {
                CallOutcome::Done { project, .. } => project,
                CallOutcome::Failed { error, calls } => {
                    let verdict = Verdict::Fatal {
                        reason: format!("generation failed after {calls} call(s): {error}"),
                    };
                    return Ok(self.conclude_without_attempts(&session_id, verdict, started).await);
                }
                CallOutcome::Cancelled => {
                    let verdict = Verdict::Cancelled;
                    return Ok(self.conclude_without_attempts(&session_id, verdict, started).await);
                }
            };

            let name = project.name.clone().unwrap_or_else(|| "project".to_string());
            let inferred = Language::infer(project.files.iter().map(|f| f.path.as_str()));
            let language = match (inferred, &request.language) {
                (Language::Other(_), Some(declared)) => declared.clone(),
                (inferred, _) => inferred,
            };
            let artifact = Artifact::new(name, language, project.files);

            let session = CorrectionSession::new(
                artifact,
                Some(request.prompt.clone()),
                self.config.correction.max_attempts,
                self.config.strategies.first(),
            )
            .with_id(session_id.clone());
            self.drive(session, cancel.clone(), started).await
        }
        .instrument(span)
        .await
    }

    /// Validate and correct an existing project.
    pub async fn run_from_artifact(
        &self,
        artifact: Artifact,
        prompt: Option<String>,
        cancel: CancellationToken,
    ) -> Result<SessionReport> {
        let started = Instant::now();
        let session = CorrectionSession::new(
            artifact,
            prompt,
            self.config.correction.max_attempts,
            self.config.strategies.first(),
        );
        let span = SessionSpan::span(session.id());
        async {
            let max_attempts = self.config.correction.max_attempts;
            obs::emit_session_started(session.id(), "artifact", max_attempts);
            METRICS.inc_sessions_started();
            self.drive(session, cancel, started).await
        }
        .instrument(span)
        .await
    }

    /// The attempt loop.
    async fn drive(
        &self,
        mut session: CorrectionSession,
        cancel: CancellationToken,
        started: Instant,
    ) -> Result<SessionReport> {
        let limits = &self.config.sandbox;
        let table = &self.config.strategies;

        loop {
            if cancel.is_cancelled() {
                return self.conclude(session, Verdict::Cancelled, started).await;
            }

            let attempt = session.begin_attempt()?;
            METRICS.inc_executions();
            let artifact = session.current().clone();

            // Dropping the execute future kills the process and removes its workspace.
            let mut result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempt, "cancelled during execution");
                    return self.conclude(session, Verdict::Cancelled, started).await;
                }
                r = self.executor.execute(&artifact, limits) => r,
            };
            obs::emit_attempt_executed(
                attempt,
                artifact.version,
                result.elapsed_ms,
                result.exit_code,
            );

            let diagnosis = self.analyzer.analyze(&result);
            result.diagnosis = Some(diagnosis.clone());
            let stderr_excerpt = tail(&result.stderr, STDERR_EXCERPT_CHARS);
            let record = session.record_attempt(result, diagnosis.clone())?;
            obs::emit_attempt_diagnosed(attempt, &record.diagnosis, record.score);
            if record.repeated_digest {
                obs::emit_repeated_artifact(attempt, record.digest.short());
            }

            if diagnosis.is_success() {
                return self.conclude(session, Verdict::Accepted, started).await;
            }

            let score = self.detector.score(session.diagnoses());
            session.set_stagnation(score.run_length);
            if score.exhausted {
                METRICS.inc_stagnation_exits();
                let verdict = Verdict::Exhausted {
                    reason: format!(
                        "stagnated: {} consecutive near-identical {} failures",
                        score.run_length,
                        diagnosis.kind()
                    ),
                };
                return self.conclude(session, verdict, started).await;
            }
            if session.budget_spent() {
                let verdict = Verdict::Exhausted {
                    reason: format!("attempt budget of {} spent", session.max_attempts()),
                };
                return self.conclude(session, verdict, started).await;
            }
            if score.stagnant {
                obs::emit_stagnation_flagged(attempt, score.run_length);
            }

            let chosen = selector::select(session.history(), score.stagnant, table);
            let strategy = session.begin_correction(chosen, table)?;
            obs::emit_strategy_selected(attempt, strategy, score.stagnant);

            let reference = match strategy {
                Strategy::Hybrid => session.best_attempt().map(|r| r.artifact.clone()),
                _ => None,
            };
            let request = CorrectionRequest {
                artifact: artifact.clone(),
                persona: Persona::for_correction(&diagnosis, strategy),
                diagnosis,
                strategy,
                directive: table.directive(strategy).to_string(),
                reference,
                attempt,
                prompt: session.prompt().map(str::to_string),
                stderr_excerpt,
            };

            METRICS.inc_corrections();
            let outcome = call_with_retry(&self.retry, "correct", &cancel, || {
                self.generator.correct(&request)
            })
            .await;

            match outcome {
                CallOutcome::Done { project, calls } => {
                    debug!(attempt, calls, files = project.files.len(), "correction received");
                    session.apply_correction(artifact.revise(project.files));
                }
                CallOutcome::Failed { error, calls } => {
                    let verdict = Verdict::Fatal {
                        reason: format!("correction failed after {calls} call(s): {error}"),
                    };
                    return self.conclude(session, verdict, started).await;
                }
                CallOutcome::Cancelled => {
                    return self.conclude(session, Verdict::Cancelled, started).await;
                }
            }
        }
    }

    async fn conclude(
        &self,
        mut session: CorrectionSession,
        verdict: Verdict,
        started: Instant,
    ) -> Result<SessionReport> {
        session.finish(verdict)?;
        let report = session.report(started.elapsed().as_millis() as u64);
        self.publish(&report).await;
        Ok(report)
    }

    /// Report for a session that ended before its first run.
    async fn conclude_without_attempts(
        &self,
        session_id: &str,
        verdict: Verdict,
        started: Instant,
    ) -> SessionReport {
        let report = SessionReport {
            session_id: session_id.to_string(),
            summary: format!("{verdict} before any attempt"),
            verdict,
            attempts_used: 0,
            final_artifact: None,
            history: Vec::new(),
            transitions: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.publish(&report).await;
        report
    }

    /// Count, log, deliver and persist a terminal report.
    async fn publish(&self, report: &SessionReport) {
        METRICS.record_verdict(&report.verdict);
        obs::emit_session_finished(
            &report.session_id,
            report.verdict.label(),
            report.attempts_used,
            report.duration_ms,
        );
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.deliver(report).await {
                obs::emit_delivery_error(&report.session_id, &e);
            }
        }
        if let Some(dir) = &self.audit_dir {
            if let Err(e) = write_session_audit(report, dir) {
                obs::emit_delivery_error(&report.session_id, &e);
            }
        }
    }
}

/// Last `max` characters of `text`.
fn tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
