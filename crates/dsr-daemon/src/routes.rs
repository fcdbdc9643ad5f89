//! Axum router and all HTTP handlers for dsr-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Scenario tests in `tests/` compose the bare router.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use dsr_runtime::RunOverrides;
use dsr_schemas::ProgressState;
use futures_util::{stream, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{CancelResponse, CompareAccepted, CompareRequest, ErrorResponse, HealthResponse},
    state::{AppState, BusMsg},
};

const NO_INPUT: &str =
    "NO_SOURCE: provide a document database or a prompt name (at least one is required)";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/compare", post(compare))
        .route("/v1/progress", get(progress))
        .route("/v1/cancel", post(cancel))
        .route("/v1/reset", post(reset))
        .route("/v1/stream", get(stream_events))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            config_hash: st.config_hash.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/compare
// ---------------------------------------------------------------------------

/// Accept a run and drive it on a background task.
///
/// 400 when neither input resolves or the pipeline cannot be wired, 409 while
/// another run is in flight, otherwise 202 with the new run id.
pub(crate) async fn compare(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CompareRequest>,
) -> Response {
    let overrides = RunOverrides {
        database: req.database,
        prompt_name: req.prompt_name,
    };
    if overrides.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(NO_INPUT))).into_response();
    }

    let pipeline = match st.factory.build(&overrides) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "compare refused: pipeline not wired");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(format!("{e:#}"))),
            )
                .into_response();
        }
    };

    let ctx = match st.runs.begin() {
        Ok(ctx) => ctx,
        Err(in_flight) => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: in_flight.to_string(),
                    run_id: Some(in_flight.0),
                }),
            )
                .into_response();
        }
    };

    let run_id = ctx.run_id();
    info!(%run_id, ?overrides, "compare accepted");
    st.log_line("INFO", format!("run {run_id} accepted"));

    let bus_state = Arc::clone(&st);
    tokio::spawn(async move {
        let outcome = pipeline.run(&ctx).await;
        let status = outcome.status();
        info!(%run_id, status = status.as_str(), "run finished");
        bus_state.log_line("INFO", format!("run {run_id} {}", status.as_str()));
    });

    (
        StatusCode::ACCEPTED,
        Json(CompareAccepted {
            run_id,
            status: "running".to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/progress
// ---------------------------------------------------------------------------

pub(crate) async fn progress(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.runs.snapshot()))
}

// ---------------------------------------------------------------------------
// POST /v1/cancel
// ---------------------------------------------------------------------------

pub(crate) async fn cancel(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let cancelled = st.runs.request_cancel();
    let run_id = st.runs.current().map(|c| c.run_id());
    info!(?run_id, cancelled, "cancel");
    (StatusCode::OK, Json(CancelResponse { cancelled, run_id }))
}

// ---------------------------------------------------------------------------
// POST /v1/reset
// ---------------------------------------------------------------------------

/// Clear the latest run's progress. 409 while it is still running.
pub(crate) async fn reset(State(st): State<Arc<AppState>>) -> Response {
    match st.runs.reset() {
        Ok(()) => {
            info!("reset");
            (StatusCode::OK, Json(st.runs.snapshot())).into_response()
        }
        Err(in_flight) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: in_flight.to_string(),
                run_id: Some(in_flight.0),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream
// ---------------------------------------------------------------------------

pub(crate) async fn stream_events(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let events = broadcast_to_sse(st.bus.subscribe(), st.runs.subscribe());

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    bus: broadcast::Receiver<BusMsg>,
    runs: broadcast::Receiver<ProgressState>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let progress = BroadcastStream::new(runs).map(|r| r.map(BusMsg::Progress));
    stream::select(BroadcastStream::new(bus), progress).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Progress(_) => "progress",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged
        }
    })
}
