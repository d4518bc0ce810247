use crate::client::{Completion, CompletionClient, CompletionRequest, CompletionStream};
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

/// Configures retry behaviour for failover across completion backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries per backend before moving to the next one.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Determines whether an error is transient and worth retrying.
///
/// Transport failures and timeouts are retried. Provider errors are retried
/// for rate limits (429), authentication (401) and server errors (5xx), but
/// not for 400. Cancellation and validation errors never are.
pub fn is_retryable(err: &MaestroError) -> bool {
    match err {
        MaestroError::Cancelled => false,
        MaestroError::Http(_) | MaestroError::Timeout(_) => true,
        MaestroError::Completion(msg) => {
            let lower = msg.to_lowercase();
            if lower.contains("400") {
                return false;
            }
            lower.contains("429")
                || lower.contains("401")
                || lower.contains("timeout")
                || lower.contains("overloaded")
                || ["500", "502", "503", "504", "529"]
                    .iter()
                    .any(|code| lower.contains(code))
        }
        _ => false,
    }
}

/// Computes the backoff delay for a given attempt using exponential backoff
/// capped at `backoff_max_ms`.
fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// A [`CompletionClient`] that wraps a primary backend plus fallbacks and
/// performs automatic failover with exponential-backoff retries.
///
/// Backends are tried in order. Within each backend a transient error is
/// retried up to `max_retries` times; a non-retryable error moves on to the
/// next backend immediately. If every backend fails, the last error is
/// returned.
pub struct FailoverClient {
    backends: Vec<Box<dyn CompletionClient>>,
    policy: RetryPolicy,
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl FailoverClient {
    pub fn new(
        primary: Box<dyn CompletionClient>,
        fallbacks: Vec<Box<dyn CompletionClient>>,
        policy: RetryPolicy,
    ) -> Self {
        let mut backends = Vec::with_capacity(fallbacks.len() + 1);
        backends.push(primary);
        backends.extend(fallbacks);
        Self {
            backends,
            policy,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    async fn do_sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(ms).await;
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }

    /// Handles one failed attempt. Returns `false` when the current backend
    /// should be abandoned.
    async fn on_error(&self, backend_idx: usize, attempt: u32, err: &MaestroError) -> bool {
        if !is_retryable(err) {
            warn!(
                backend = backend_idx,
                attempt,
                error = %err,
                "Non-retryable error, moving to next backend"
            );
            return false;
        }
        if attempt < self.policy.max_retries {
            let delay = compute_backoff(&self.policy, attempt);
            info!(
                backend = backend_idx,
                attempt,
                delay_ms = delay,
                error = %err,
                "Retryable error, backing off"
            );
            self.do_sleep(delay).await;
        }
        true
    }
}

#[async_trait]
impl CompletionClient for FailoverClient {
    async fn complete(&self, request: &CompletionRequest<'_>) -> MaestroResult<Completion> {
        let mut last_err: Option<MaestroError> = None;

        for (backend_idx, backend) in self.backends.iter().enumerate() {
            for attempt in 0..=self.policy.max_retries {
                match backend.complete(request).await {
                    Ok(completion) => return Ok(completion),
                    Err(e) => {
                        let keep_going = self.on_error(backend_idx, attempt, &e).await;
                        last_err = Some(e);
                        if !keep_going {
                            break;
                        }
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            MaestroError::Completion("All failover backends exhausted".into())
        }))
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest<'_>,
    ) -> MaestroResult<CompletionStream> {
        let mut last_err: Option<MaestroError> = None;

        for (backend_idx, backend) in self.backends.iter().enumerate() {
            for attempt in 0..=self.policy.max_retries {
                match backend.complete_stream(request).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        let keep_going = self.on_error(backend_idx, attempt, &e).await;
                        last_err = Some(e);
                        if !keep_going {
                            break;
                        }
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            MaestroError::Completion("All failover backends exhausted (stream)".into())
        }))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
