use std::future::Future;
use std::time::Duration;

use dsr_schemas::CancelToken;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RemoteError;

/// Attempt ceiling plus exponential back-off: the wait after attempt `n`
/// is `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Granularity at which a back-off wait notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Sleep for `wait`, returning early (with `false`) once `cancel` is set.
async fn backoff(wait: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt ceiling is reached. `op` receives the 1-based attempt number.
///
/// No attempt starts once `cancel` is set, and a back-off wait ends early on
/// cancellation; both yield [`RemoteError::Cancelled`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            debug!(what = %what, attempt, "cancelled before attempt");
            return Err(RemoteError::Cancelled);
        }
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let wait = policy.delay_after(attempt);
                warn!(
                    what = %what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                if !backoff(wait, cancel).await {
                    debug!(what = %what, attempt, "cancelled during back-off");
                    return Err(RemoteError::Cancelled);
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
