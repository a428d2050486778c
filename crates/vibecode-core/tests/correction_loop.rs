//! End-to-end behaviour of the correction loop against scripted collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vibecode_core::correction::SessionState;
use vibecode_core::{
    read_session_audit, run_sessions, Artifact, CodeGenerator, CorrectionConfig,
    CorrectionOrchestrator, CorrectionRequest, DeliverySink, DiagnosisKind, ExecutionLimits,
    ExecutionResult, Executor, Expectations, GeneratedProject, GenerationRequest, Language,
    Persona, SandboxFailure, SessionReport, SessionRequest, SourceFile, Strategy, StrategyTable,
    Verdict, VibeError,
};
use vibecode_core::providers::ProviderError;

// -------------------------------------------------------------------------
// Scripted collaborators
// -------------------------------------------------------------------------

/// Returns queued results in order, then `fallback` forever.
struct ScriptedExecutor {
    script: Mutex<VecDeque<ExecutionResult>>,
    fallback: ExecutionResult,
    hang: bool,
    executed: Mutex<Vec<u32>>,
}

impl ScriptedExecutor {
    fn new(script: Vec<ExecutionResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: success("ok"),
            hang: false,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Never finishes a run.
    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(Vec::new())
        }
    }

    fn executed_versions(&self) -> Vec<u32> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, artifact: &Artifact, _limits: &ExecutionLimits) -> ExecutionResult {
        self.executed.lock().unwrap().push(artifact.version);
        if self.hang {
            std::future::pending::<()>().await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Replays queued correction responses; an empty queue yields a fresh file.
struct ScriptedGenerator {
    generated: Result<GeneratedProject, ProviderError>,
    corrections: Mutex<VecDeque<Result<GeneratedProject, ProviderError>>>,
    requests: Mutex<Vec<CorrectionRequest>>,
    generate_calls: AtomicU32,
    counter: AtomicU32,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self {
            generated: Ok(project("print('hello')\n")),
            corrections: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            generate_calls: AtomicU32::new(0),
            counter: AtomicU32::new(0),
        }
    }

    fn with_generated(mut self, generated: Result<GeneratedProject, ProviderError>) -> Self {
        self.generated = generated;
        self
    }

    fn with_corrections(self, corrections: Vec<Result<GeneratedProject, ProviderError>>) -> Self {
        *self.corrections.lock().unwrap() = corrections.into();
        self
    }

    fn requests(&self) -> Vec<CorrectionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedProject, ProviderError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generated.clone()
    }

    async fn correct(&self, request: &CorrectionRequest) -> Result<GeneratedProject, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let queued = self.corrections.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(project(&format!("print({n})\n")))
        })
    }
}

/// Keeps every delivered report.
#[derive(Default)]
struct RecordingSink {
    reports: Mutex<Vec<SessionReport>>,
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, report: &SessionReport) -> vibecode_core::Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Fixtures
// -------------------------------------------------------------------------

fn project(content: &str) -> GeneratedProject {
    GeneratedProject::from_files(vec![SourceFile::new("main.py", content)])
}

fn artifact() -> Artifact {
    Artifact::new(
        "demo",
        Language::Python,
        vec![SourceFile::new("main.py", "print(\n")],
    )
}

fn success(stdout: &str) -> ExecutionResult {
    ExecutionResult::exited(0, stdout, "")
}

fn syntax_error() -> ExecutionResult {
    ExecutionResult::exited(
        1,
        "",
        "  File \"main.py\", line 1\n    print(\n         ^\nSyntaxError: unexpected EOF while parsing\n",
    )
}

fn runtime_error(exception: &str) -> ExecutionResult {
    ExecutionResult::exited(
        1,
        "",
        format!(
            "Traceback (most recent call last):\n  File \"main.py\", line 3, in <module>\n    run()\n{exception}\n"
        ),
    )
}

fn timed_out() -> ExecutionResult {
    let mut result = ExecutionResult::exited(0, "", "");
    result.exit_code = None;
    result.failure = Some(SandboxFailure::TimedOut { limit_ms: 100 });
    result
}

fn config(max_attempts: u32) -> CorrectionConfig {
    let mut config = CorrectionConfig::default();
    config.correction.max_attempts = max_attempts;
    config.correction.collaborator_backoff_ms = 1;
    config.correction.collaborator_timeout_ms = 5_000;
    config
}

fn orchestrator(
    config: CorrectionConfig,
    executor: Arc<ScriptedExecutor>,
    generator: Arc<ScriptedGenerator>,
) -> CorrectionOrchestrator {
    CorrectionOrchestrator::new(Arc::new(config), executor, generator).unwrap()
}

fn strategies(report: &SessionReport) -> Vec<Strategy> {
    report.history.iter().map(|r| r.strategy).collect()
}

// -------------------------------------------------------------------------
// Scenarios
// -------------------------------------------------------------------------

#[tokio::test]
async fn syntax_error_then_success_is_accepted_on_second_attempt() {
    let executor = Arc::new(ScriptedExecutor::new(vec![syntax_error(), success("hi")]));
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = orchestrator(config(5), executor.clone(), generator.clone());

    let report = orch
        .run_from_artifact(artifact(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Accepted);
    assert_eq!(report.attempts_used, 2);
    assert_eq!(report.history[0].diagnosis.kind(), DiagnosisKind::SyntaxError);
    assert!(report.history[1].diagnosis.is_success());
    assert_eq!(executor.executed_versions(), vec![1, 2]);

    let final_artifact = report.final_artifact.as_ref().unwrap();
    assert_eq!(final_artifact.version, 2);
    assert_eq!(final_artifact.parent, Some(report.history[0].artifact.id));

    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].strategy, Strategy::Conservative);
    assert_eq!(requests[0].persona, Persona::Debugger);
    assert_eq!(requests[0].attempt, 1);
    assert!(requests[0].stderr_excerpt.contains("SyntaxError"));
    assert!(requests[0].reference.is_none());
}

#[tokio::test]
async fn repeated_timeouts_stagnate_into_exhausted() {
    let executor = Arc::new(ScriptedExecutor::new(vec![timed_out(), timed_out(), timed_out()]));
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = orchestrator(config(5), executor.clone(), generator.clone());

    let report = orch
        .run_from_artifact(artifact(), None, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.verdict, Verdict::Exhausted { ref reason } if reason.contains("stagnated")));
    assert_eq!(report.attempts_used, 3);
    assert!(report.final_artifact.is_none());
    assert_eq!(
        strategies(&report),
        vec![Strategy::Conservative, Strategy::Conservative, Strategy::Aggressive]
    );
    let personas: Vec<Persona> = generator.requests().iter().map(|r| r.persona).collect();
    assert_eq!(personas, vec![Persona::Optimizer, Persona::Optimizer]);
}

#[tokio::test]
async fn unusable_corrections_end_fatal_without_spending_attempts() {
    let executor = Arc::new(ScriptedExecutor::new(vec![syntax_error()]));
    let generator = Arc::new(
        ScriptedGenerator::new().with_corrections(vec![Ok(project("   ")), Ok(project("\n"))]),
    );
    let mut cfg = config(5);
    cfg.correction.collaborator_attempts = 2;
    let orch = orchestrator(cfg, executor.clone(), generator.clone());

    let report = orch
        .run_from_artifact(artifact(), None, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.verdict, Verdict::Fatal { ref reason } if reason.contains("2 call(s)")));
    assert_eq!(report.attempts_used, 1);
    assert_eq!(report.history.len(), 1);
    assert_eq!(generator.requests().len(), 2);
    assert_eq!(executor.executed_versions(), vec![1]);
}

#[tokio::test]
async fn transient_collaborator_error_is_retried() {
    let executor = Arc::new(ScriptedExecutor::new(vec![syntax_error()]));
    let generator = Arc::new(ScriptedGenerator::new().with_corrections(vec![Err(
        ProviderError::Http("connection reset".into()),
    )]));
    let orch = orchestrator(config(5), executor.clone(), generator.clone());

    let report = orch
        .run_from_artifact(artifact(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Accepted);
    assert_eq!(report.attempts_used, 2);
    assert_eq!(generator.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_execution_stops_the_session() {
    let executor = Arc::new(ScriptedExecutor::hanging());
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = orchestrator(config(5), executor.clone(), generator.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = orch.run_from_artifact(artifact(), None, cancel).await.unwrap();

    assert_eq!(report.verdict, Verdict::Cancelled);
    assert_eq!(report.attempts_used, 1);
    assert!(report.history.is_empty());
    assert!(generator.requests().is_empty());
    let last = report.transitions.last().unwrap();
    assert_eq!(last.from, SessionState::Executing);
    assert_eq!(last.to, SessionState::Cancelled);
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = orchestrator(config(5), executor.clone(), generator);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = orch.run_from_artifact(artifact(), None, cancel).await.unwrap();

    assert_eq!(report.verdict, Verdict::Cancelled);
    assert_eq!(report.attempts_used, 0);
    assert!(executor.executed_versions().is_empty());
}

#[tokio::test]
async fn distinct_failures_spend_the_whole_budget() {
    let executor = Arc::new(ScriptedExecutor::new(vec![
        syntax_error(),
        runtime_error("ValueError: invalid literal for int()"),
        timed_out(),
    ]));
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = orchestrator(config(3), executor.clone(), generator.clone());

    let report = orch
        .run_from_artifact(artifact(), Some("parse numbers".into()), CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.verdict, Verdict::Exhausted { ref reason } if reason.contains("budget of 3")));
    assert_eq!(report.attempts_used, 3);
    assert_eq!(generator.requests().len(), 2);
    assert_eq!(
        generator.requests()[0].prompt.as_deref(),
        Some("parse numbers")
    );
    assert!(report.summary.contains("#3 v3"));
}

#[tokio::test]
async fn stagnation_at_rewrite_escalates_to_hybrid_with_best_reference() {
    let executor = Arc::new(ScriptedExecutor::new(vec![
        syntax_error(),
        runtime_error("ValueError: bad input"),
        timed_out(),
        runtime_error("KeyError: 'user'"),
        runtime_error("KeyError: 'user'"),
        success("done"),
    ]));
    let generator = Arc::new(ScriptedGenerator::new());
    let mut cfg = config(6);
    cfg.stagnation.window = 2;
    cfg.stagnation.threshold = 3;
    let orch = orchestrator(cfg, executor.clone(), generator.clone());

    let report = orch
        .run_from_artifact(artifact(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Accepted);
    assert_eq!(report.attempts_used, 6);
    assert_eq!(
        strategies(&report),
        vec![
            Strategy::Conservative,
            Strategy::Conservative,
            Strategy::Standard,
            Strategy::Aggressive,
            Strategy::Rewrite,
            Strategy::Hybrid,
        ]
    );

    let requests = generator.requests();
    let hybrid = requests.last().unwrap();
    assert_eq!(hybrid.strategy, Strategy::Hybrid);
    assert_eq!(hybrid.persona, Persona::Architect);
    // Attempt 2 is the earliest of the best-scoring runtime failures.
    assert_eq!(hybrid.reference.as_ref().map(|a| a.version), Some(2));
}

#[tokio::test]
async fn resubmitted_code_is_flagged_as_repeated() {
    let executor = Arc::new(ScriptedExecutor::new(vec![
        runtime_error("ValueError: a"),
        runtime_error("KeyError: 'b'"),
    ]));
    let generator = Arc::new(
        ScriptedGenerator::new().with_corrections(vec![Ok(project("print(\n"))]),
    );
    let orch = orchestrator(config(5), executor, generator);

    let report = orch
        .run_from_artifact(artifact(), None, CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.history[0].repeated_digest);
    assert!(report.history[1].repeated_digest);
    assert_eq!(report.history[0].digest, report.history[1].digest);
}

#[tokio::test]
async fn expectations_turn_clean_exit_into_logical_mismatch() {
    let executor = Arc::new(ScriptedExecutor::new(vec![success("41"), success("42")]));
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = orchestrator(config(5), executor, generator.clone()).with_expectations(
        Expectations {
            expected_stdout: Some("42".into()),
            stdout_contains: Vec::new(),
        },
    );

    let report = orch
        .run_from_artifact(artifact(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Accepted);
    assert_eq!(
        report.history[0].diagnosis.kind(),
        DiagnosisKind::LogicalMismatch
    );
    assert_eq!(generator.requests()[0].persona, Persona::SeniorDeveloper);
}

// -------------------------------------------------------------------------
// Generation entry point
// -------------------------------------------------------------------------

#[tokio::test]
async fn prompt_session_generates_then_accepts() {
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = orchestrator(config(5), executor.clone(), generator.clone());

    let report = orch
        .run_from_prompt(GenerationRequest::new("say hello"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_accepted());
    assert_eq!(report.attempts_used, 1);
    let artifact = report.final_artifact.unwrap();
    assert_eq!(artifact.version, 1);
    assert_eq!(artifact.language, Language::Python);
    assert_eq!(generator.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generation_failure_is_fatal_with_no_attempts() {
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
    let generator = Arc::new(
        ScriptedGenerator::new().with_generated(Err(ProviderError::Api {
            status: 503,
            body: "overloaded".into(),
        })),
    );
    let mut cfg = config(5);
    cfg.correction.collaborator_attempts = 2;
    let orch = orchestrator(cfg, executor.clone(), generator.clone());

    let report = orch
        .run_from_prompt(GenerationRequest::new("anything"), CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.verdict, Verdict::Fatal { ref reason } if reason.contains("503")));
    assert_eq!(report.attempts_used, 0);
    assert!(report.history.is_empty());
    assert!(executor.executed_versions().is_empty());
    assert_eq!(generator.generate_calls.load(Ordering::SeqCst), 2);
}

// -------------------------------------------------------------------------
// Delivery and audit
// -------------------------------------------------------------------------

#[tokio::test]
async fn terminal_report_is_delivered_and_audited() {
    let audit = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let executor = Arc::new(ScriptedExecutor::new(vec![syntax_error()]));
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = orchestrator(config(5), executor, generator)
        .with_sink(sink.clone())
        .with_audit_dir(audit.path());

    let report = orch
        .run_from_artifact(artifact(), None, CancellationToken::new())
        .await
        .unwrap();

    let delivered = sink.reports.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].session_id, report.session_id);

    let stored = read_session_audit(&report.session_id, audit.path()).unwrap();
    assert_eq!(stored, report);

    let json_path = audit.path().join(&report.session_id).join("session.json");
    let mut tampered = std::fs::read_to_string(&json_path).unwrap();
    tampered = tampered.replace("\"accepted\"", "\"fatal\"");
    std::fs::write(&json_path, tampered).unwrap();
    assert!(matches!(
        read_session_audit(&report.session_id, audit.path()),
        Err(VibeError::DigestMismatch { .. })
    ));
}

// -------------------------------------------------------------------------
// Properties
// -------------------------------------------------------------------------

#[tokio::test]
async fn attempts_and_strategies_never_move_backwards() {
    let scripts: Vec<Vec<ExecutionResult>> = vec![
        vec![timed_out(); 6],
        vec![syntax_error(), timed_out(), syntax_error(), timed_out(), syntax_error()],
        vec![
            runtime_error("ValueError: one"),
            runtime_error("TypeError: two"),
            runtime_error("KeyError: three"),
            runtime_error("IndexError: four"),
            runtime_error("NameError: five"),
        ],
    ];
    let table = StrategyTable::default();

    for script in scripts {
        let executor = Arc::new(ScriptedExecutor::new(script.clone()));
        let generator = Arc::new(ScriptedGenerator::new());
        let orch = orchestrator(config(5), executor, generator.clone());
        let report = orch
            .run_from_artifact(artifact(), None, CancellationToken::new())
            .await
            .unwrap();

        assert!(report.attempts_used <= 5);
        for (i, record) in report.history.iter().enumerate() {
            assert_eq!(record.attempt, i as u32 + 1);
            assert_eq!(record.artifact.version, record.attempt);
        }
        let ranks: Vec<usize> = report
            .history
            .iter()
            .map(|r| table.rank(r.strategy).unwrap())
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "ranks regressed: {ranks:?}");

        for request in generator.requests() {
            assert_eq!(request.reference.is_some(), request.strategy == Strategy::Hybrid);
        }
    }
}

#[tokio::test]
async fn invalid_configuration_is_rejected_up_front() {
    let mut cfg = config(5);
    cfg.correction.max_attempts = 0;
    let result = CorrectionOrchestrator::new(
        Arc::new(cfg),
        Arc::new(ScriptedExecutor::new(Vec::new())),
        Arc::new(ScriptedGenerator::new()),
    );
    assert!(matches!(result, Err(VibeError::InvalidConfig(_))));
}

// -------------------------------------------------------------------------
// Concurrent sessions
// -------------------------------------------------------------------------

#[tokio::test]
async fn pooled_sessions_return_in_request_order() {
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = Arc::new(orchestrator(config(5), executor, generator));

    let requests: Vec<SessionRequest> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|name| SessionRequest::Artifact {
            artifact: Artifact::new(
                name,
                Language::Python,
                vec![SourceFile::new("main.py", "print(1)\n")],
            ),
            prompt: None,
        })
        .collect();

    let results = run_sessions(orch, requests, 2, CancellationToken::new()).await;
    let names: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap().final_artifact.unwrap().name)
        .collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test(start_paused = true)]
async fn pool_shutdown_cancels_every_session() {
    let executor = Arc::new(ScriptedExecutor::hanging());
    let generator = Arc::new(ScriptedGenerator::new());
    let orch = Arc::new(orchestrator(config(5), executor, generator));

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let requests = vec![
        SessionRequest::Artifact {
            artifact: artifact(),
            prompt: None,
        },
        SessionRequest::Prompt(GenerationRequest::new("hello")),
    ];
    let results = run_sessions(orch, requests, 4, shutdown).await;
    assert_eq!(results.len(), 2);
    for result in results {
        assert_eq!(result.unwrap().verdict, Verdict::Cancelled);
    }
}
