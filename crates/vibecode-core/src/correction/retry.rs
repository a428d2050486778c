//! Bounded, cancellable collaborator calls with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::collaborator::GeneratedProject;
use crate::config::LoopSettings;
use crate::metrics::METRICS;
use crate::obs;
use crate::providers::ProviderError;

/// How a collaborator request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, the first included.
    pub calls: u32,
    pub backoff_base_ms: u64,
    /// Ceiling for each call.
    pub timeout_ms: u64,
}

impl From<&LoopSettings> for RetryPolicy {
    fn from(settings: &LoopSettings) -> Self {
        Self {
            calls: settings.collaborator_attempts,
            backoff_base_ms: settings.collaborator_backoff_ms,
            timeout_ms: settings.collaborator_timeout_ms,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `call`-th failed call (1-based).
    pub fn backoff(&self, call: u32) -> Duration {
        let factor = 2u64.saturating_pow(call.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Outcome of a retried collaborator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Done { project: GeneratedProject, calls: u32 },
    Failed { error: ProviderError, calls: u32 },
    Cancelled,
}

/// Call `call` until it returns a usable project, the policy runs out, or
/// `cancel` fires. A project with no file content counts as a failed call.
pub async fn call_with_retry<F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    cancel: &CancellationToken,
    call: F,
) -> CallOutcome
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<GeneratedProject, ProviderError>>,
{
    let mut last_error = ProviderError::Unusable("no collaborator call was permitted".into());
    for n in 1..=policy.calls {
        if cancel.is_cancelled() {
            return CallOutcome::Cancelled;
        }

        let timeout = Duration::from_millis(policy.timeout_ms);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CallOutcome::Cancelled,
            r = tokio::time::timeout(timeout, call()) => r,
        };

        last_error = match result {
            Ok(Ok(project)) if !project.is_unusable() => {
                return CallOutcome::Done { project, calls: n };
            }
            Ok(Ok(_)) => ProviderError::Unusable("response contained no file content".into()),
            Ok(Err(err)) => err,
            Err(_elapsed) => ProviderError::Timeout {
                ms: policy.timeout_ms,
            },
        };

        if n == policy.calls {
            break;
        }
        let delay = policy.backoff(n);
        METRICS.inc_collaborator_retries();
        obs::emit_collaborator_retry(operation, n, delay.as_millis() as u64, &last_error);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return CallOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    CallOutcome::Failed {
        error: last_error,
        calls: policy.calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceFile;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(calls: u32) -> RetryPolicy {
        RetryPolicy {
            calls,
            backoff_base_ms: 100,
            timeout_ms: 1_000,
        }
    }

    fn project(content: &str) -> GeneratedProject {
        GeneratedProject::from_files(vec![SourceFile::new("main.py", content)])
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(3);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let count = AtomicU32::new(0);
        let outcome = call_with_retry(&policy(3), "generate", &CancellationToken::new(), || {
            let n = count.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::Http("connection reset".into()))
                } else {
                    Ok(project("print(1)"))
                }
            }
        })
        .await;
        assert!(matches!(outcome, CallOutcome::Done { calls: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_projects_exhaust_the_policy() {
        let count = AtomicU32::new(0);
        let outcome = call_with_retry(&policy(2), "correct", &CancellationToken::new(), || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Ok(project("   ")) }
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(matches!(
            outcome,
            CallOutcome::Failed {
                error: ProviderError::Unusable(_),
                calls: 2
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let outcome = call_with_retry(&policy(1), "generate", &CancellationToken::new(), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(project("x"))
        })
        .await;
        assert!(matches!(
            outcome,
            CallOutcome::Failed {
                error: ProviderError::Timeout { ms: 1_000 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let count = AtomicU32::new(0);
        let outcome = call_with_retry(&policy(3), "generate", &cancel, || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Ok(project("x")) }
        })
        .await;
        assert_eq!(outcome, CallOutcome::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
