//! In-process scenario tests for dsr-daemon HTTP endpoints.
//!
//! These tests drive the Axum router **without** binding a TCP socket: each
//! test calls `routes::build_router` and uses `tower::ServiceExt::oneshot`.
//! Pipelines are built over the in-memory fakes of dsr-testkit.
//!
//! # Invariants under test
//!
//! 1. A trigger with no inputs is refused with 400.
//! 2. An accepted trigger answers 202 with a run id, and the run reaches
//!    `completed` observable through `/v1/progress`.
//! 3. A second trigger while the first is running is refused with 409.
//! 4. Cancel reports whether anything was running; reset is refused with 409
//!    while a run is in flight and clears the state afterwards.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use dsr_daemon::{routes, state};
use dsr_runtime::{Pipeline, RunOverrides};
use dsr_testkit::{
    erp_rule, leaf, pipeline, FakeDocumentApi, FakeRuleApi, MemorySink, ScriptedComparator,
};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Builds pipelines over fakes; rule details take `delay` each so a run can
/// be observed while in flight.
struct FakeFactory {
    delay: Duration,
}

impl state::PipelineFactory for FakeFactory {
    fn build(&self, overrides: &RunOverrides) -> anyhow::Result<Pipeline> {
        let doc = overrides.database.as_ref().map(|_| {
            Arc::new(FakeDocumentApi::new().with_flag_schema().with_parameter_page(
                "p1",
                "Alpha",
                "Alpha",
                &[("else", &["a"])],
            ))
        });
        let rule = overrides.prompt_name.as_ref().map(|_| {
            Arc::new(
                FakeRuleApi::new()
                    .with_detail_delay(self.delay)
                    .with_rule(erp_rule(1, "Alpha", &[(leaf("k", "=", json!("a")), "a")], None))
                    .with_rule(erp_rule(2, "Beta", &[(leaf("k", "=", json!("b")), "b")], None)),
            )
        });
        Ok(pipeline(
            doc,
            rule,
            Arc::new(ScriptedComparator::new()),
            Arc::new(MemorySink::new()),
        ))
    }
}

fn make_state(delay: Duration) -> Arc<state::AppState> {
    Arc::new(state::AppState::new(Arc::new(FakeFactory { delay })).with_config_hash("abc123"))
}

/// Drive the router with a single request and return (status, body_bytes).
async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

/// Poll `/v1/progress` until the status leaves "running".
async fn wait_terminal(st: &Arc<state::AppState>) -> serde_json::Value {
    for _ in 0..200 {
        let (_, body) = call(routes::build_router(Arc::clone(st)), get("/v1/progress")).await;
        let json = parse_json(body);
        if json["status"] != "running" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run did not finish");
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (status, body) = call(routes::build_router(make_state(Duration::ZERO)), get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "dsr-daemon");
    assert_eq!(json["config_hash"], "abc123");
}

// ---------------------------------------------------------------------------
// GET /v1/progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_is_idle_before_any_run() {
    let (status, body) =
        call(routes::build_router(make_state(Duration::ZERO)), get("/v1/progress")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["status"], "idle");
    assert_eq!(json["percentage"], 0);
    assert!(json["runId"].is_null());
}

// ---------------------------------------------------------------------------
// POST /v1/compare
// ---------------------------------------------------------------------------

#[tokio::test]
async fn compare_without_inputs_is_400() {
    let st = make_state(Duration::ZERO);
    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/compare", json!({ "database": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(parse_json(body)["error"]
        .as_str()
        .unwrap()
        .starts_with("NO_SOURCE"));
    assert_eq!(st.runs.snapshot().status.as_str(), "idle");
}

#[tokio::test]
async fn compare_runs_to_completion() {
    let st = make_state(Duration::ZERO);
    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/compare", json!({ "page_id": "db", "prompt_name": "Doctors" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted = parse_json(body);
    assert_eq!(accepted["status"], "running");
    let run_id = accepted["run_id"].clone();
    assert!(!run_id.is_null());

    let done = wait_terminal(&st).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["percentage"], 100);
    assert_eq!(done["runId"], run_id);
    assert_eq!(done["summary"]["documentRecords"], 1);
    assert_eq!(done["summary"]["ruleRecords"], 2);
    assert_eq!(done["summary"]["reportUrl"], "memory://reports/1");
}

#[tokio::test]
async fn second_compare_while_running_is_409() {
    let st = make_state(Duration::from_millis(200));
    let body = json!({ "prompt_name": "Doctors" });

    let (first, _) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/compare", body.clone()),
    )
    .await;
    assert_eq!(first, StatusCode::ACCEPTED);

    let (second, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/compare", body),
    )
    .await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert!(!parse_json(body)["run_id"].is_null());

    // Reset is refused while the run is in flight.
    let (reset, _) = call(routes::build_router(Arc::clone(&st)), post_empty("/v1/reset")).await;
    assert_eq!(reset, StatusCode::CONFLICT);

    let (cancel, body) = call(routes::build_router(Arc::clone(&st)), post_empty("/v1/cancel")).await;
    assert_eq!(cancel, StatusCode::OK);
    assert_eq!(parse_json(body)["cancelled"], true);

    let done = wait_terminal(&st).await;
    assert_eq!(done["status"], "cancelled");

    let (reset, body) = call(routes::build_router(Arc::clone(&st)), post_empty("/v1/reset")).await;
    assert_eq!(reset, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["status"], "idle");
    assert_eq!(json["logs"].as_array().map(Vec::len), Some(0));
}

// ---------------------------------------------------------------------------
// POST /v1/cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_with_nothing_running_reports_false() {
    let (status, body) =
        call(routes::build_router(make_state(Duration::ZERO)), post_empty("/v1/cancel")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["cancelled"], false);
    assert!(json["run_id"].is_null());
}

// ---------------------------------------------------------------------------
// GET /v1/stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_is_event_stream() {
    let router = routes::build_router(make_state(Duration::ZERO));
    let resp = router.oneshot(get("/v1/stream")).await.expect("oneshot failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(
        resp.headers().get("cache-control").and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );
}
