//! The stateful record of one repair loop.
//!
//! A [`CorrectionSession`] is owned by the orchestrator for its whole life.
//! Every state change goes through [`CorrectionSession::transition`], which
//! rejects edges the state machine does not have and appends a
//! [`TransitionRecord`], so the history is a replayable audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborator::SessionReport;
use crate::domain::{Artifact, ContentDigest, Diagnosis, Result, Strategy, StrategyTable, VibeError};
use crate::sandbox::ExecutionResult;

/// States of the correction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Generated,
    Executing,
    Diagnosed,
    Correcting,
    Accepted,
    Exhausted,
    Fatal,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Accepted
                | SessionState::Exhausted
                | SessionState::Fatal
                | SessionState::Cancelled
        )
    }

    /// Edges of the state machine.
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Generated, Executing)
                | (Generated, Cancelled)
                | (Executing, Diagnosed)
                | (Executing, Cancelled)
                | (Diagnosed, Accepted)
                | (Diagnosed, Correcting)
                | (Diagnosed, Exhausted)
                | (Correcting, Executing)
                | (Correcting, Fatal)
                | (Correcting, Cancelled)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Generated => "generated",
            SessionState::Executing => "executing",
            SessionState::Diagnosed => "diagnosed",
            SessionState::Correcting => "correcting",
            SessionState::Accepted => "accepted",
            SessionState::Exhausted => "exhausted",
            SessionState::Fatal => "fatal",
            SessionState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Exhausted { reason: String },
    Fatal { reason: String },
    Cancelled,
}

impl Verdict {
    pub fn state(&self) -> SessionState {
        match self {
            Verdict::Accepted => SessionState::Accepted,
            Verdict::Exhausted { .. } => SessionState::Exhausted,
            Verdict::Fatal { .. } => SessionState::Fatal,
            Verdict::Cancelled => SessionState::Cancelled,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Exhausted { .. } => "exhausted",
            Verdict::Fatal { .. } => "fatal",
            Verdict::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Exhausted { reason } | Verdict::Fatal { reason } => {
                write!(f, "{}: {reason}", self.label())
            }
            _ => write!(f, "{}", self.label()),
        }
    }
}

/// One executed attempt: the artifact, its run, and how it was classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub artifact: Artifact,
    pub digest: ContentDigest,
    pub result: ExecutionResult,
    pub diagnosis: Diagnosis,
    /// Strategy under which this attempt's artifact was produced.
    pub strategy: Strategy,
    /// Progress score in `[0, 100]`.
    pub score: u8,
    /// The artifact is byte-identical to an earlier attempt's.
    pub repeated_digest: bool,
    pub recorded_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(
        attempt: u32,
        artifact: Artifact,
        result: ExecutionResult,
        diagnosis: Diagnosis,
        strategy: Strategy,
        repeated_digest: bool,
    ) -> Self {
        Self {
            attempt,
            digest: artifact.digest(),
            artifact,
            result,
            score: diagnosis.progress_score(),
            diagnosis,
            strategy,
            repeated_digest,
            recorded_at: Utc::now(),
        }
    }
}

/// One state change, recorded before the next attempt begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub seq: u32,
    pub from: SessionState,
    pub to: SessionState,
    /// Attempt counter at the time of the transition.
    pub attempt: u32,
    pub note: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CorrectionSession {
    id: String,
    prompt: Option<String>,
    current: Artifact,
    state: SessionState,
    attempt: u32,
    max_attempts: u32,
    active_strategy: Strategy,
    stagnation: usize,
    history: Vec<AttemptRecord>,
    transitions: Vec<TransitionRecord>,
    verdict: Option<Verdict>,
    started_at: DateTime<Utc>,
}

impl CorrectionSession {
    pub fn new(
        artifact: Artifact,
        prompt: Option<String>,
        max_attempts: u32,
        initial_strategy: Strategy,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt,
            current: artifact,
            state: SessionState::Generated,
            attempt: 0,
            max_attempts,
            active_strategy: initial_strategy,
            stagnation: 0,
            history: Vec::new(),
            transitions: Vec::new(),
            verdict: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn current(&self) -> &Artifact {
        &self.current
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn active_strategy(&self) -> Strategy {
        self.active_strategy
    }

    pub fn stagnation(&self) -> usize {
        self.stagnation
    }

    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn diagnoses(&self) -> impl DoubleEndedIterator<Item = &Diagnosis> {
        self.history.iter().map(|r| &r.diagnosis)
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.history.last()
    }

    pub fn budget_spent(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Move along one edge of the state machine and record it.
    pub fn transition(&mut self, to: SessionState, note: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(VibeError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.transitions.push(TransitionRecord {
            seq: self.transitions.len() as u32 + 1,
            from: self.state,
            to,
            attempt: self.attempt,
            note: note.into(),
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }

    /// Start executing the current artifact; returns the new attempt number.
    pub fn begin_attempt(&mut self) -> Result<u32> {
        if self.budget_spent() {
            return Err(VibeError::InvalidTransition {
                from: self.state.to_string(),
                to: format!("attempt {} of {}", self.attempt + 1, self.max_attempts),
            });
        }
        let next = self.attempt + 1;
        let note = format!(
            "run artifact v{} under {}",
            self.current.version, self.active_strategy
        );
        self.transition(SessionState::Executing, note)?;
        self.attempt = next;
        Ok(next)
    }

    /// Append the diagnosed outcome of the running attempt.
    pub fn record_attempt(
        &mut self,
        result: ExecutionResult,
        diagnosis: Diagnosis,
    ) -> Result<&AttemptRecord> {
        let digest = self.current.digest();
        let repeated = self.history.iter().any(|r| r.digest == digest);
        let note = diagnosis.summary();
        self.transition(SessionState::Diagnosed, note)?;
        self.history.push(AttemptRecord::new(
            self.attempt,
            self.current.clone(),
            result,
            diagnosis,
            self.active_strategy,
            repeated,
        ));
        self.history
            .last()
            .ok_or_else(|| VibeError::Task("attempt history is empty".into()))
    }

    pub fn set_stagnation(&mut self, run_length: usize) {
        self.stagnation = run_length;
    }

    /// Enter `Correcting` with the chosen strategy.
    ///
    /// The active strategy never moves to a lower rank in `table`.
    pub fn begin_correction(
        &mut self,
        strategy: Strategy,
        table: &StrategyTable,
    ) -> Result<Strategy> {
        let current = table.rank(self.active_strategy);
        let next = table.rank(strategy);
        if next >= current {
            self.active_strategy = strategy;
        }
        let note = format!("correct with {}", self.active_strategy);
        self.transition(SessionState::Correcting, note)?;
        Ok(self.active_strategy)
    }

    /// Install the corrected artifact; the next attempt executes it.
    pub fn apply_correction(&mut self, artifact: Artifact) {
        self.current = artifact;
    }

    /// Highest-scoring attempt, earliest on ties.
    pub fn best_attempt(&self) -> Option<&AttemptRecord> {
        self.history
            .iter()
            .fold(None, |best: Option<&AttemptRecord>, r| match best {
                Some(b) if b.score >= r.score => Some(b),
                _ => Some(r),
            })
    }

    /// Enter the terminal state matching `verdict`.
    pub fn finish(&mut self, verdict: Verdict) -> Result<()> {
        self.transition(verdict.state(), verdict.to_string())?;
        self.verdict = Some(verdict);
        Ok(())
    }

    /// Build the delivery report. The final artifact is included only when accepted.
    pub fn report(&self, duration_ms: u64) -> SessionReport {
        let verdict = self.verdict.clone().unwrap_or(Verdict::Cancelled);
        let final_artifact = match verdict {
            Verdict::Accepted => self.history.last().map(|r| r.artifact.clone()),
            _ => None,
        };
        SessionReport {
            session_id: self.id.clone(),
            summary: self.summary(&verdict),
            verdict,
            attempts_used: self.attempt,
            final_artifact,
            history: self.history.clone(),
            transitions: self.transitions.clone(),
            duration_ms,
        }
    }

    fn summary(&self, verdict: &Verdict) -> String {
        let mut lines = vec![format!(
            "{} after {} of {} attempt(s)",
            verdict, self.attempt, self.max_attempts
        )];
        for r in &self.history {
            let repeat = if r.repeated_digest { " (repeated code)" } else { "" };
            lines.push(format!(
                "  #{} v{} [{}] {}{}",
                r.attempt,
                r.artifact.version,
                r.strategy,
                r.diagnosis.summary(),
                repeat
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Language, SourceFile};

    fn session(max: u32) -> CorrectionSession {
        let artifact = Artifact::new(
            "t",
            Language::Shell,
            vec![SourceFile::new("main.sh", "exit 1")],
        );
        CorrectionSession::new(artifact, None, max, Strategy::Conservative)
    }

    fn fail(s: &mut CorrectionSession, diagnosis: Diagnosis) {
        s.begin_attempt().unwrap();
        s.record_attempt(ExecutionResult::exited(1, "", ""), diagnosis)
            .unwrap();
    }

    #[test]
    fn test_state_machine_edges() {
        assert!(SessionState::Generated.can_transition_to(SessionState::Executing));
        assert!(!SessionState::Generated.can_transition_to(SessionState::Accepted));
        assert!(!SessionState::Accepted.can_transition_to(SessionState::Executing));
        assert!(SessionState::Fatal.is_terminal());
        assert!(!SessionState::Correcting.is_terminal());
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut s = session(3);
        let err = s.transition(SessionState::Accepted, "skip").unwrap_err();
        assert!(matches!(err, VibeError::InvalidTransition { .. }));
        assert!(s.transitions().is_empty());
    }

    #[test]
    fn test_attempts_are_bounded() {
        let mut s = session(1);
        fail(&mut s, Diagnosis::Timeout);
        s.begin_correction(Strategy::Conservative, &StrategyTable::default())
            .unwrap();
        assert!(s.begin_attempt().is_err());
        assert_eq!(s.attempt(), 1);
    }

    #[test]
    fn test_repeated_digest_is_flagged() {
        let mut s = session(3);
        fail(&mut s, Diagnosis::Timeout);
        s.begin_correction(Strategy::Conservative, &StrategyTable::default())
            .unwrap();
        let same = s.current().revise(s.current().files.clone());
        s.apply_correction(same);
        fail(&mut s, Diagnosis::Timeout);
        assert!(!s.history()[0].repeated_digest);
        assert!(s.history()[1].repeated_digest);
        assert_eq!(s.history()[1].artifact.version, 2);
    }

    #[test]
    fn test_strategy_never_regresses() {
        let table = StrategyTable::default();
        let mut s = session(5);
        fail(&mut s, Diagnosis::Timeout);
        s.begin_correction(Strategy::Aggressive, &table).unwrap();
        s.apply_correction(s.current().revise(vec![SourceFile::new("main.sh", "exit 2")]));
        fail(&mut s, Diagnosis::Timeout);
        let applied = s.begin_correction(Strategy::Standard, &table).unwrap();
        assert_eq!(applied, Strategy::Aggressive);
    }

    #[test]
    fn test_best_attempt_prefers_earliest_on_tie() {
        let mut s = session(5);
        fail(&mut s, Diagnosis::SyntaxError { detail: "a".into() });
        s.begin_correction(Strategy::Conservative, &StrategyTable::default())
            .unwrap();
        fail(
            &mut s,
            Diagnosis::RuntimeError {
                detail: "b".into(),
                stack: vec![],
            },
        );
        s.begin_correction(Strategy::Standard, &StrategyTable::default())
            .unwrap();
        fail(
            &mut s,
            Diagnosis::RuntimeError {
                detail: "c".into(),
                stack: vec![],
            },
        );
        assert_eq!(s.best_attempt().map(|r| r.attempt), Some(2));
    }

    #[test]
    fn test_report_includes_artifact_only_when_accepted() {
        let mut s = session(2);
        s.begin_attempt().unwrap();
        s.record_attempt(ExecutionResult::exited(0, "ok", ""), Diagnosis::Success)
            .unwrap();
        s.finish(Verdict::Accepted).unwrap();
        let report = s.report(10);
        assert!(report.final_artifact.is_some());
        assert_eq!(report.attempts_used, 1);
        assert!(report.summary.starts_with("accepted after 1 of 2"));

        let mut t = session(1);
        fail(&mut t, Diagnosis::Timeout);
        t.finish(Verdict::Exhausted {
            reason: "budget".into(),
        })
        .unwrap();
        let report = t.report(10);
        assert!(report.final_artifact.is_none());
        assert!(report.summary.contains("execution timed out"));
        assert_eq!(report.transitions.last().map(|r| r.to), Some(SessionState::Exhausted));
    }
}
