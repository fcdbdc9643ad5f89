//! Bounded worker pool for per-unit fetches.
//!
//! Units run through `buffer_unordered`, so at most `workers` are in flight
//! and results arrive in completion order. Cancellation and fatal errors are
//! cooperative: in-flight units finish, units not yet started are skipped.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dsr_schemas::CancelToken;
use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound; the pool never runs more workers than units.
    pub workers: usize,
    /// Pause after each unit, smoothing the request rate.
    pub unit_delay: Duration,
}

#[derive(Debug)]
pub struct PoolOutcome<T, E> {
    pub items: Vec<T>,
    /// Units that ran (successfully, empty, or failed).
    pub completed: usize,
    /// Non-fatal failures, logged and dropped.
    pub failed: usize,
    /// Units never started because of cancellation or a fatal error.
    pub skipped: usize,
    /// First fatal error seen.
    pub fatal: Option<E>,
    pub cancelled: bool,
}

enum Unit<T, E> {
    Skipped,
    Ran(Result<Option<T>, E>),
}

/// Run `work` over `items` with at most `cfg.workers` units in flight.
///
/// `Ok(None)` counts as completed without output. An error for which
/// `is_fatal` holds stops new units from starting. `on_done(done, total)`
/// fires after every completed unit, failures included.
pub async fn run_pool<I, T, E, F, Fut>(
    what: &str,
    items: Vec<I>,
    cfg: PoolConfig,
    cancel: &CancelToken,
    is_fatal: impl Fn(&E) -> bool,
    work: F,
    mut on_done: impl FnMut(usize, usize),
) -> PoolOutcome<T, E>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    let total = items.len();
    let mut out = PoolOutcome {
        items: Vec::new(),
        completed: 0,
        failed: 0,
        skipped: 0,
        fatal: None,
        cancelled: false,
    };
    if total == 0 {
        out.cancelled = cancel.is_cancelled();
        return out;
    }

    let workers = cfg.workers.clamp(1, total);
    info!(what = %what, units = total, workers, "worker pool starting");

    let abort = AtomicBool::new(false);
    let abort = &abort;
    let work = &work;
    let delay = cfg.unit_delay;

    let mut results = stream::iter(items.into_iter().enumerate())
        .map(|(idx, item)| async move {
            if cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
                return (idx, Unit::Skipped);
            }
            let res = work(item).await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            (idx, Unit::Ran(res))
        })
        .buffer_unordered(workers);

    while let Some((idx, unit)) = results.next().await {
        match unit {
            Unit::Skipped => out.skipped += 1,
            Unit::Ran(Ok(item)) => {
                out.items.extend(item);
                out.completed += 1;
                on_done(out.completed, total);
            }
            Unit::Ran(Err(e)) if is_fatal(&e) => {
                abort.store(true, Ordering::SeqCst);
                warn!(what = %what, unit = idx, error = %e, "fatal unit error; stopping pool");
                out.completed += 1;
                if out.fatal.is_none() {
                    out.fatal = Some(e);
                }
            }
            Unit::Ran(Err(e)) => {
                warn!(what = %what, unit = idx, error = %e, "unit failed; dropped");
                out.failed += 1;
                out.completed += 1;
                on_done(out.completed, total);
            }
        }
    }

    out.cancelled = cancel.is_cancelled();
    info!(
        what = %what,
        items = out.items.len(),
        failed = out.failed,
        skipped = out.skipped,
        cancelled = out.cancelled,
        "worker pool drained"
    );
    out
}
