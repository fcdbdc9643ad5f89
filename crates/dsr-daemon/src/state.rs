//! Shared runtime state for dsr-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Run progress lives in
//! the [`RunHandle`]; this module owns nothing async itself apart from the
//! heartbeat task.

use std::sync::Arc;
use std::time::Duration;

use dsr_config::{PipelineConfig, ResolvedSecrets};
use dsr_runtime::{build_pipeline, Pipeline, RunHandle, RunOverrides};
use dsr_schemas::ProgressState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Progress(ProgressState),
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Pipeline factory
// ---------------------------------------------------------------------------

/// Builds a fresh [`Pipeline`] for each accepted trigger.
pub trait PipelineFactory: Send + Sync {
    fn build(&self, overrides: &RunOverrides) -> anyhow::Result<Pipeline>;
}

/// Production factory: typed config plus secrets resolved at startup.
pub struct ConfigPipelineFactory {
    cfg: PipelineConfig,
    secrets: ResolvedSecrets,
}

impl ConfigPipelineFactory {
    pub fn new(cfg: PipelineConfig, secrets: ResolvedSecrets) -> Self {
        Self { cfg, secrets }
    }
}

impl PipelineFactory for ConfigPipelineFactory {
    fn build(&self, overrides: &RunOverrides) -> anyhow::Result<Pipeline> {
        build_pipeline(&self.cfg, &self.secrets, overrides)
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Daemon-level events (heartbeat, trigger log lines).
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    /// Latest run; progress changes are published on its own channel.
    pub runs: RunHandle,
    pub factory: Arc<dyn PipelineFactory>,
    pub config_hash: Option<String>,
}

impl AppState {
    pub fn new(factory: Arc<dyn PipelineFactory>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "dsr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            runs: RunHandle::new(),
            factory,
            config_hash: None,
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Best effort; nobody listening is fine.
    pub fn log_line(&self, level: &str, msg: impl Into<String>) {
        let _ = self.bus.send(BusMsg::LogLine {
            level: level.to_string(),
            msg: msg.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
