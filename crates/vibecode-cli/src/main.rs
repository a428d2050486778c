//! vibecode - validate-and-correct loop for AI-generated projects
//!
//! The `vibecode` command runs candidate projects in a scoped sandbox and
//! drives bounded AI correction rounds until they run cleanly.
//!
//! ## Commands
//!
//! - `validate`: Run a project once and print its diagnosis
//! - `generate`: Generate a project from a prompt, then validate and correct it
//! - `correct`: Validate and correct an existing project directory
//! - `audit`: Read and verify a stored session audit trail

mod project;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use vibecode_core::{
    CorrectionConfig, CorrectionOrchestrator, Executor, Expectations, GeminiClient, GeminiConfig,
    GenerationRequest, Language, ProcessExecutor, ResultAnalyzer, SessionReport, METRICS,
};

use project::{load_project, DirectorySink};

const DEFAULT_AUDIT_DIR: &str = ".vibecode/audit";

#[derive(Parser)]
#[command(name = "vibecode")]
#[command(author = "Stevedores Org")]
#[command(version = vibecode_core::VERSION)]
#[command(about = "Validate and correct AI-generated code projects", long_about = None)]
struct Cli {
    /// Configuration file (TOML); VIBECODE_* variables override it
    #[arg(short, long, global = true, env = "VIBECODE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a project directory once and print the diagnosis
    ///
    /// Exits 0 when the project runs cleanly, 1 otherwise.
    Validate {
        /// Project directory
        dir: PathBuf,

        /// Project language (inferred from file extensions if omitted)
        #[arg(short, long)]
        language: Option<String>,

        #[command(flatten)]
        expect: ExpectArgs,
    },

    /// Generate a project from a prompt, then validate and correct it
    Generate {
        /// What the project should do
        prompt: String,

        /// Target language
        #[arg(short, long)]
        language: Option<String>,

        /// Directory receiving the accepted project and SUMMARY.md
        #[arg(short, long, default_value = "vibecode-out")]
        out: PathBuf,

        /// Audit trail directory
        #[arg(long, default_value = DEFAULT_AUDIT_DIR)]
        audit_dir: PathBuf,

        #[command(flatten)]
        expect: ExpectArgs,
    },

    /// Validate and correct an existing project directory
    Correct {
        /// Project directory
        dir: PathBuf,

        /// Directory receiving the corrected project (default: <dir>-corrected)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Project language (inferred from file extensions if omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// What the project is meant to do, forwarded with corrections
        #[arg(short, long)]
        prompt: Option<String>,

        /// Audit trail directory
        #[arg(long, default_value = DEFAULT_AUDIT_DIR)]
        audit_dir: PathBuf,

        #[command(flatten)]
        expect: ExpectArgs,
    },

    /// Read a stored session audit trail and verify its digest
    Audit {
        /// Session ID
        session_id: String,

        /// Audit trail directory
        #[arg(short, long, default_value = DEFAULT_AUDIT_DIR)]
        dir: PathBuf,
    },
}

/// Output checks applied to runs that exit cleanly.
#[derive(Args, Debug, Default)]
struct ExpectArgs {
    /// Exact stdout the project must print
    #[arg(long)]
    expect_stdout: Option<String>,

    /// Text stdout must contain (repeatable)
    #[arg(long = "expect-contains")]
    expect_contains: Vec<String>,
}

impl From<ExpectArgs> for Expectations {
    fn from(args: ExpectArgs) -> Self {
        Expectations {
            expected_stdout: args.expect_stdout,
            stdout_contains: args.expect_contains,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    vibecode_core::init_tracing(cli.json, level);

    let config = CorrectionConfig::resolve(cli.config.as_deref())
        .context("Failed to load vibecode configuration")?;

    let code = match cli.command {
        Commands::Validate {
            dir,
            language,
            expect,
        } => cmd_validate(&config, &dir, language.as_deref(), expect.into(), cli.json).await?,
        Commands::Generate {
            prompt,
            language,
            out,
            audit_dir,
            expect,
        } => {
            let mut request = GenerationRequest::new(prompt);
            if let Some(tag) = language.as_deref() {
                request = request.with_language(Language::from_tag(tag));
            }
            let orchestrator = build_orchestrator(config, expect.into(), &out, &audit_dir)?;
            let cancel = cancel_on_ctrl_c();
            let report = orchestrator.run_from_prompt(request, cancel).await?;
            print_report(&report, cli.json)?;
            verdict_exit_code(&report)
        }
        Commands::Correct {
            dir,
            out,
            language,
            prompt,
            audit_dir,
            expect,
        } => {
            let artifact = load_project(&dir, language.as_deref().map(Language::from_tag))?;
            let out = out.unwrap_or_else(|| corrected_dir(&dir));
            let orchestrator = build_orchestrator(config, expect.into(), &out, &audit_dir)?;
            let cancel = cancel_on_ctrl_c();
            let report = orchestrator.run_from_artifact(artifact, prompt, cancel).await?;
            print_report(&report, cli.json)?;
            verdict_exit_code(&report)
        }
        Commands::Audit { session_id, dir } => cmd_audit(&session_id, &dir, cli.json)?,
    };

    METRICS.flush();
    Ok(code)
}

/// Run a project once and print its diagnosis
async fn cmd_validate(
    config: &CorrectionConfig,
    dir: &Path,
    language: Option<&str>,
    expectations: Expectations,
    json: bool,
) -> Result<ExitCode> {
    let artifact = load_project(dir, language.map(Language::from_tag))?;
    info!(
        "Validating {:?} ({} file(s))",
        dir,
        artifact.files.len()
    );

    let executor = ProcessExecutor::new();
    let mut result = executor.execute(&artifact, &config.sandbox).await;
    METRICS.inc_executions();
    let diagnosis = ResultAnalyzer::new(expectations).analyze(&result);
    result.diagnosis = Some(diagnosis.clone());

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if let Some(entry) = &result.entry_point {
            println!("Entry point: {}", entry);
        }
        match result.exit_code {
            Some(code) => println!("Exit code:   {}", code),
            None => println!("Exit code:   (killed or not started)"),
        }
        println!("Elapsed:     {} ms", result.elapsed_ms);
        println!("Diagnosis:   {}", diagnosis.summary());
        if !diagnosis.is_success() && !result.stderr.is_empty() {
            println!("\n--- stderr ---\n{}", result.stderr.trim_end());
        }
    }

    Ok(if diagnosis.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// Read and verify a stored audit trail
fn cmd_audit(session_id: &str, dir: &Path, json: bool) -> Result<ExitCode> {
    let report = vibecode_core::read_session_audit(session_id, dir)
        .with_context(|| format!("Failed to read audit trail for session {}", session_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Session {} (digest verified)", report.session_id);
        println!("{}", report.summary);
        for t in &report.transitions {
            println!(
                "  {:>3}  {} -> {}  attempt {}  {}",
                t.seq, t.from, t.to, t.attempt, t.note
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn build_orchestrator(
    config: CorrectionConfig,
    expectations: Expectations,
    out: &Path,
    audit_dir: &Path,
) -> Result<CorrectionOrchestrator> {
    let gemini = GeminiConfig::from_env()
        .context("Gemini credentials are required for generate/correct")?
        .with_timeout_ms(config.correction.collaborator_timeout_ms);
    let generator = GeminiClient::new(gemini).context("Failed to build Gemini client")?;

    let orchestrator = CorrectionOrchestrator::new(
        Arc::new(config),
        Arc::new(ProcessExecutor::new()),
        Arc::new(generator),
    )
    .context("Invalid correction configuration")?
    .with_expectations(expectations)
    .with_sink(Arc::new(DirectorySink::new(out)))
    .with_audit_dir(audit_dir);

    Ok(orchestrator)
}

/// Token cancelled by the first Ctrl-C; the running session ends `Cancelled`.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling session");
            trigger.cancel();
        }
    });
    token
}

fn print_report(report: &SessionReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("Session {}", report.session_id);
        println!("{}", report.summary);
    }
    Ok(())
}

fn verdict_exit_code(report: &SessionReport) -> ExitCode {
    if report.is_accepted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn corrected_dir(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    dir.with_file_name(format!("{name}-corrected"))
}
