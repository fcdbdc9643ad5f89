//! Per-run progress context and the single-slot "latest run" handle.
//!
//! A [`RunContext`] is created for every run and passed to each phase. The
//! [`RunHandle`] keeps only the most recent one so polling callers keep the
//! same contract (`snapshot`, `request_cancel`, `reset`) without two runs
//! writing into one shared state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use dsr_schemas::{CancelToken, LogEntry, ProgressState, RunStatus, RunSummary};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Phase bands
// ---------------------------------------------------------------------------

/// Percentage range owned by one phase. Bands never overlap and increase in
/// phase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub start: u8,
    pub end: u8,
}

impl Band {
    /// Position after `done` of `total` units.
    pub fn at(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.end;
        }
        let span = (self.end - self.start) as usize;
        let step = span * done.min(total) / total;
        self.start + step as u8
    }
}

pub const INIT: Band = Band { start: 0, end: 2 };
pub const DOCUMENT: Band = Band { start: 5, end: 65 };
pub const RULE: Band = Band { start: 70, end: 80 };
pub const COMPARE: Band = Band { start: 82, end: 90 };
pub const REPORT: Band = Band { start: 90, end: 100 };

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Progress and cancellation of one run.
///
/// Writes go through one mutex; every change is also published on the
/// broadcast channel (when one is attached) and mirrored to `tracing`.
pub struct RunContext {
    run_id: Uuid,
    state: Mutex<ProgressState>,
    cancel: CancelToken,
    events: Option<broadcast::Sender<ProgressState>>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RunContext {
    pub fn new(events: Option<broadcast::Sender<ProgressState>>) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            run_id,
            state: Mutex::new(ProgressState {
                run_id: Some(run_id),
                ..ProgressState::default()
            }),
            cancel: CancelToken::new(),
            events,
        }
    }

    /// Context with no subscribers; used by the CLI and tests.
    pub fn detached() -> Self {
        Self::new(None)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        // A panicked writer leaves a consistent struct behind.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, snap: ProgressState) {
        if let Some(tx) = &self.events {
            let _ = tx.send(snap);
        }
    }

    /// Clears logs, percentage and status; clears cancellation.
    pub fn reset(&self) {
        let snap = {
            let mut s = self.lock();
            *s = ProgressState {
                run_id: Some(self.run_id),
                ..ProgressState::default()
            };
            s.clone()
        };
        self.cancel.clear();
        self.publish(snap);
    }

    /// Set the current step and percentage, mark the run running, and append
    /// `message` to the log when given.
    ///
    /// The percentage is clamped to 100 and never moves backwards within a
    /// run: fetchers running side by side report from different bands.
    pub fn update(&self, step: &str, percentage: u8, message: Option<&str>) {
        let snap = {
            let mut s = self.lock();
            let pct = percentage.min(100).max(s.percentage);
            s.current_step = step.to_string();
            s.percentage = pct;
            s.status = RunStatus::Running;
            if let Some(msg) = message {
                s.logs.push(LogEntry {
                    ts_utc: Utc::now(),
                    message: msg.to_string(),
                });
            }
            s.clone()
        };
        if let Some(msg) = message {
            info!(run_id = %self.run_id, step = %step, pct = snap.percentage, "{msg}");
        }
        self.publish(snap);
    }

    /// Idempotent.
    pub fn request_cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(run_id = %self.run_id, "cancellation requested");
        }
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> ProgressState {
        self.lock().clone()
    }

    /// Move into a terminal status. `Completed` also pins the percentage to
    /// 100.
    pub fn finish(&self, status: RunStatus, summary: Option<RunSummary>, message: &str) {
        let snap = {
            let mut s = self.lock();
            s.status = status;
            if status == RunStatus::Completed {
                s.percentage = 100;
            }
            s.current_step = status.as_str().to_string();
            s.logs.push(LogEntry {
                ts_utc: Utc::now(),
                message: message.to_string(),
            });
            s.summary = summary;
            s.clone()
        };
        info!(run_id = %self.run_id, status = status.as_str(), "{message}");
        self.publish(snap);
    }
}

// ---------------------------------------------------------------------------
// RunHandle
// ---------------------------------------------------------------------------

/// Refusal to start a run while another one is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInFlight(pub Uuid);

impl fmt::Display for RunInFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} is still in flight", self.0)
    }
}

impl std::error::Error for RunInFlight {}

/// Holds the latest [`RunContext`]. Cloning shares the slot.
#[derive(Clone)]
pub struct RunHandle {
    slot: Arc<RwLock<Option<Arc<RunContext>>>>,
    events: broadcast::Sender<ProgressState>,
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunHandle {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(1024);
        Self {
            slot: Arc::new(RwLock::new(None)),
            events,
        }
    }

    /// Every progress change of every run started through this handle.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressState> {
        self.events.subscribe()
    }

    fn running(ctx: &RunContext) -> bool {
        ctx.snapshot().status == RunStatus::Running
    }

    /// Install a fresh context, unless the current one is still running.
    pub fn begin(&self) -> Result<Arc<RunContext>, RunInFlight> {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if let Some(cur) = slot.as_ref() {
            if Self::running(cur) {
                return Err(RunInFlight(cur.run_id()));
            }
        }
        let ctx = Arc::new(RunContext::new(Some(self.events.clone())));
        // Running from the start so a second trigger is refused at once.
        ctx.update("Initializing", INIT.start, Some("Run accepted"));
        *slot = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    pub fn current(&self) -> Option<Arc<RunContext>> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Arc::clone)
    }

    /// Idle default when no run was ever started.
    pub fn snapshot(&self) -> ProgressState {
        self.current()
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Returns false when there is nothing running to cancel.
    pub fn request_cancel(&self) -> bool {
        match self.current() {
            Some(ctx) if Self::running(&ctx) => {
                ctx.request_cancel();
                true
            }
            _ => false,
        }
    }

    /// Resets the latest run's state. Refused while it is running.
    pub fn reset(&self) -> Result<(), RunInFlight> {
        if let Some(ctx) = self.current() {
            if Self::running(&ctx) {
                return Err(RunInFlight(ctx.run_id()));
            }
            ctx.reset();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_ordered_and_disjoint() {
        let bands = [INIT, DOCUMENT, RULE, COMPARE, REPORT];
        for w in bands.windows(2) {
            assert!(w[0].start <= w[0].end);
            assert!(w[0].end <= w[1].start);
        }
        assert_eq!(DOCUMENT.at(0, 10), 5);
        assert_eq!(DOCUMENT.at(5, 10), 35);
        assert_eq!(DOCUMENT.at(10, 10), 65);
        assert_eq!(RULE.at(3, 0), 80);
        assert_eq!(RULE.at(99, 3), 80);
    }

    #[test]
    fn update_clamps_and_logs() {
        let ctx = RunContext::detached();
        ctx.update("Fetching", 250, Some("hello"));
        let s = ctx.snapshot();
        assert_eq!(s.percentage, 100);
        assert_eq!(s.status, RunStatus::Running);
        assert_eq!(s.logs.len(), 1);
        assert_eq!(s.logs[0].message, "hello");
        assert_eq!(s.run_id, Some(ctx.run_id()));
    }

    #[test]
    fn percentage_never_moves_backwards() {
        let ctx = RunContext::detached();
        ctx.update("Fetching rule data", RULE.start, None);
        ctx.update("Fetching document data", DOCUMENT.at(1, 4), None);
        let s = ctx.snapshot();
        assert_eq!(s.percentage, RULE.start);
        assert_eq!(s.current_step, "Fetching document data");
        ctx.update("Comparing parameters", COMPARE.start, None);
        assert_eq!(ctx.snapshot().percentage, COMPARE.start);
    }

    #[test]
    fn reset_clears_state_and_cancellation() {
        let ctx = RunContext::detached();
        ctx.update("x", 50, Some("m"));
        ctx.request_cancel();
        ctx.request_cancel();
        assert!(ctx.is_cancelled());
        ctx.reset();
        let s = ctx.snapshot();
        assert_eq!(s.status, RunStatus::Idle);
        assert_eq!(s.percentage, 0);
        assert!(s.logs.is_empty());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn finish_completed_pins_percentage() {
        let ctx = RunContext::detached();
        ctx.update("x", 91, None);
        ctx.finish(RunStatus::Completed, None, "done");
        let s = ctx.snapshot();
        assert_eq!(s.percentage, 100);
        assert!(s.status.is_terminal());
        assert_eq!(s.logs.last().map(|l| l.message.as_str()), Some("done"));
    }

    #[test]
    fn handle_refuses_second_run_while_running() {
        let h = RunHandle::new();
        assert_eq!(h.snapshot().status, RunStatus::Idle);
        let first = h.begin().unwrap();
        assert_eq!(h.begin().unwrap_err(), RunInFlight(first.run_id()));
        assert!(h.reset().is_err());

        first.finish(RunStatus::Completed, None, "ok");
        let second = h.begin().unwrap();
        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(h.snapshot().run_id, Some(second.run_id()));
    }

    #[test]
    fn handle_cancel_reaches_running_context_only() {
        let h = RunHandle::new();
        assert!(!h.request_cancel());
        let ctx = h.begin().unwrap();
        assert!(h.request_cancel());
        assert!(ctx.is_cancelled());
        ctx.finish(RunStatus::Cancelled, None, "stopped");
        assert!(!h.request_cancel());
        h.reset().unwrap();
        assert_eq!(h.snapshot().status, RunStatus::Idle);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let h = RunHandle::new();
        let mut rx = h.subscribe();
        let ctx = h.begin().unwrap();
        ctx.update("Fetching", 10, Some("page 1"));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.current_step, "Initializing");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.percentage, 10);
    }
}
