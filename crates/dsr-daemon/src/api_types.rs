//! Request and response types for the dsr-daemon HTTP endpoints.
//!
//! No business logic lives here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    /// Hash of the loaded configuration, when the daemon was started from one.
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// /v1/compare
// ---------------------------------------------------------------------------

/// Per-run inputs. Both optional; blank counts as absent, and at least one
/// must resolve to a value (here or in config).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareRequest {
    /// Document database URL or id.
    #[serde(alias = "page_id")]
    pub database: Option<String>,
    pub prompt_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareAccepted {
    pub run_id: Uuid,
    pub status: String,
}

// ---------------------------------------------------------------------------
// /v1/cancel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    /// false when nothing was running.
    pub cancelled: bool,
    pub run_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// The run that caused a refusal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            run_id: None,
        }
    }
}
