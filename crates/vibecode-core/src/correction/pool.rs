//! Runs independent correction sessions concurrently.
//!
//! Sessions share nothing but the orchestrator's read-only configuration and
//! collaborators. Each gets a child of the shutdown token, so a global
//! shutdown cancels all of them while a single session can still be
//! cancelled alone.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collaborator::{GenerationRequest, SessionReport};
use crate::domain::{Artifact, Result, VibeError};

use super::orchestrator::CorrectionOrchestrator;

/// Where a session starts.
#[derive(Debug, Clone)]
pub enum SessionRequest {
    Prompt(GenerationRequest),
    Artifact {
        artifact: Artifact,
        prompt: Option<String>,
    },
}

/// Run every request, at most `max_concurrency` at a time.
///
/// Results come back in request order.
pub async fn run_sessions(
    orchestrator: Arc<CorrectionOrchestrator>,
    requests: Vec<SessionRequest>,
    max_concurrency: usize,
    shutdown: CancellationToken,
) -> Vec<Result<SessionReport>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let total = requests.len();
    let mut join_set = JoinSet::new();

    for (idx, request) in requests.into_iter().enumerate() {
        let orchestrator = Arc::clone(&orchestrator);
        let semaphore = Arc::clone(&semaphore);
        let cancel = shutdown.child_token();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let report = match request {
                SessionRequest::Prompt(req) => orchestrator.run_from_prompt(req, cancel).await,
                SessionRequest::Artifact { artifact, prompt } => {
                    orchestrator.run_from_artifact(artifact, prompt, cancel).await
                }
            };
            (idx, report)
        });
    }

    let mut ordered: Vec<Option<Result<SessionReport>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, report)) => ordered[idx] = Some(report),
            Err(e) => warn!(error = %e, "session task failed"),
        }
    }

    ordered
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(VibeError::Task("session task did not complete".into())))
        })
        .collect()
}
