//! Correction loop: session state, strategy selection, stagnation detection,
//! and the orchestrator that drives them.
//!
//! - [`session`]     : `CorrectionSession`, `AttemptRecord`, `Verdict`
//! - [`selector`]    : `select()` over the attempt history
//! - [`stagnation`]  : `StagnationDetector`
//! - [`retry`]       : bounded collaborator calls with backoff
//! - [`orchestrator`]: `CorrectionOrchestrator` state machine
//! - [`audit`]       : digest-verified session audit files
//! - [`pool`]        : concurrent sessions under one shutdown token

pub mod audit;
pub mod orchestrator;
pub mod pool;
pub mod retry;
pub mod selector;
pub mod session;
pub mod stagnation;

pub use audit::{read_session_audit, write_session_audit};
pub use orchestrator::CorrectionOrchestrator;
pub use pool::{run_sessions, SessionRequest};
pub use retry::{call_with_retry, CallOutcome, RetryPolicy};
pub use selector::select;
pub use session::{AttemptRecord, CorrectionSession, SessionState, TransitionRecord, Verdict};
pub use stagnation::{StagnationDetector, StagnationScore};
