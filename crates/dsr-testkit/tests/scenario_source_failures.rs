//! Scenario: remote failures during fetch.
//!
//! # Invariants under test
//!
//! 1. A rejected credential on the document side aborts the run before the
//!    rule source is touched.
//! 2. Rate-limited block listings are retried and the page still extracts.
//! 3. An inaccessible condition subtree leaves the condition with an empty
//!    value instead of failing the page.
//! 4. A rule entry whose detail keeps failing is dropped; the run completes.
//! 5. A rejected credential on the rule listing fails the run.
//! 6. An unreadable document schema yields no document pages, not an error.

use std::sync::Arc;

use dsr_remote::RemoteError;
use dsr_runtime::{fetch_document_records, fetch_rule_records, RunContext, RunOutcome};
use dsr_schemas::RunStatus;
use dsr_testkit::{
    document_source, erp_rule, leaf, pipeline, rule_source, FakeDocumentApi, FakeRuleApi,
    MemorySink, ScriptedComparator,
};
use serde_json::json;

fn auth() -> RemoteError {
    RemoteError::Auth {
        status: 401,
        message: "API token is invalid".to_string(),
    }
}

fn one_page() -> FakeDocumentApi {
    FakeDocumentApi::new().with_flag_schema().with_parameter_page(
        "p1",
        "Client Type",
        "Client Type",
        &[("nationality == 'X'", &["Maid"]), ("else", &["Family"])],
    )
}

fn two_rules() -> FakeRuleApi {
    FakeRuleApi::new()
        .with_rule(erp_rule(1, "Client Type", &[(leaf("maidType", "=", json!("Maid")), "Maid")], None))
        .with_rule(erp_rule(2, "Salary Band", &[(leaf("salary", ">", json!(1)), "High")], None))
}

#[tokio::test]
async fn document_auth_failure_is_fatal() {
    let doc = Arc::new(one_page().fail_children("p1-anchor", auth()));
    let rule = Arc::new(two_rules());
    let sink = Arc::new(MemorySink::new());
    let p = pipeline(
        Some(doc),
        Some(Arc::clone(&rule)),
        Arc::new(ScriptedComparator::new()),
        Arc::clone(&sink),
    );

    let ctx = RunContext::detached();
    let outcome = p.run(&ctx).await;

    let msg = match outcome {
        RunOutcome::Failed(m) => m,
        other => panic!("expected failure, got {other:?}"),
    };
    assert!(msg.starts_with("Comparison failed: document source"));
    assert!(rule.seen_queries().is_empty());
    assert!(sink.reports().is_empty());
    assert_eq!(ctx.snapshot().status, RunStatus::Error);
}

#[tokio::test]
async fn rate_limited_children_are_retried() {
    let doc = Arc::new(one_page().flaky_children("p1-anchor", 2));
    let src = document_source(Arc::clone(&doc));
    let ctx = RunContext::detached();

    let records = fetch_document_records(src.api, &src.cfg, &ctx).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].conditional_logic.len(), 2);
    // page, anchor x3, two condition bodies
    assert_eq!(doc.children_calls(), 6);
}

#[tokio::test]
async fn inaccessible_condition_body_leaves_empty_value() {
    let doc = Arc::new(one_page().fail_children(
        "p1-c0",
        RemoteError::Inaccessible {
            status: 403,
            message: "restricted".to_string(),
        },
    ));
    let src = document_source(doc);
    let ctx = RunContext::detached();

    let records = fetch_document_records(src.api, &src.cfg, &ctx).await.unwrap();

    assert_eq!(records.len(), 1);
    let conditions = &records[0].conditional_logic;
    assert_eq!(conditions[0].condition, "nationality == 'X'");
    assert_eq!(conditions[0].value, "");
    assert_eq!(conditions[1].value, "1. Family");
}

#[tokio::test]
async fn failing_rule_detail_is_dropped() {
    let rule = Arc::new(
        two_rules()
            .flaky_detail(1, 1)
            .fail_detail(
                2,
                RemoteError::Http {
                    status: 500,
                    message: "boom".to_string(),
                },
            ),
    );
    let src = rule_source(Arc::clone(&rule), "");
    let ctx = RunContext::detached();

    let records = fetch_rule_records(src.api, &src.cfg, &ctx).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].parameter, "Client Type");
    // id 1: one rate-limited attempt then success; id 2: not retried
    assert_eq!(rule.detail_calls(), 3);
}

#[tokio::test]
async fn rule_listing_auth_failure_fails_the_run() {
    let rule = Arc::new(two_rules().with_list_error(auth()));
    let p = pipeline(
        Some(Arc::new(one_page())),
        Some(rule),
        Arc::new(ScriptedComparator::new()),
        Arc::new(MemorySink::new()),
    );

    let ctx = RunContext::detached();
    let outcome = p.run(&ctx).await;

    assert_eq!(outcome.status(), RunStatus::Error);
    match outcome {
        RunOutcome::Failed(m) => assert!(m.contains("rule source")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_schema_means_no_document_pages() {
    let doc = Arc::new(
        one_page().with_schema_error(RemoteError::Http {
            status: 404,
            message: "database not found".to_string(),
        }),
    );
    let rule = Arc::new(two_rules());
    let sink = Arc::new(MemorySink::new());
    let p = pipeline(
        Some(Arc::clone(&doc)),
        Some(rule),
        Arc::new(ScriptedComparator::new()),
        Arc::clone(&sink),
    );

    let ctx = RunContext::detached();
    let outcome = p.run(&ctx).await;

    let summary = match outcome {
        RunOutcome::Completed(s) => s,
        other => panic!("run did not complete: {other:?}"),
    };
    assert_eq!(summary.document_records, 0);
    assert_eq!(summary.rule_records, 2);
    assert!(doc.seen_filters().is_empty());
}
