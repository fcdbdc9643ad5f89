//! Scenario: full run over in-memory sources.
//!
//! # Invariants under test
//!
//! 1. Matched parameters come first with the comparator's text; one-sided
//!    parameters follow under a banner per side, document side first.
//! 2. `section_boundaries` point at the banner rows.
//! 3. Pages without an anchor and excluded rule entries contribute nothing.
//! 4. The document listing is filtered by both flag columns.
//! 5. Both sources empty ends the run in error with the no-data message and
//!    nothing emitted.
//! 6. A sink failure fails the run.

use std::sync::Arc;

use dsr_runtime::{RunContext, RunOutcome, NO_DATA_MESSAGE};
use dsr_schemas::{RowKind, RunStatus};
use dsr_testkit::{
    context_rule, erp_rule, leaf, pipeline, FakeDocumentApi, FakeRuleApi, MemorySink,
    ScriptedComparator,
};
use serde_json::json;

fn document_api() -> FakeDocumentApi {
    FakeDocumentApi::new()
        .with_flag_schema()
        .with_parameter_page(
            "p1",
            "Client Type",
            "Client Type",
            &[("nationality == 'X'", &["Maid"]), ("else", &["Family"])],
        )
        .with_parameter_page("p2", "Visa Status", "Visa Status", &[("else", &["Pending"])])
        .with_plain_page("p3", "Readme")
}

fn rule_api() -> FakeRuleApi {
    FakeRuleApi::new()
        .with_rule(erp_rule(
            1,
            "Client Type",
            &[(leaf("maidType", "=", json!("Maid")), "Maid")],
            Some("Family"),
        ))
        .with_rule(erp_rule(
            2,
            "Salary Band",
            &[(leaf("salary", ">", json!(5000)), "High")],
            None,
        ))
        .with_rule(context_rule(3, "Client context"))
}

#[tokio::test]
async fn matched_then_document_only_then_rule_only() {
    let doc = Arc::new(document_api());
    let rule = Arc::new(rule_api());
    let comparator = Arc::new(ScriptedComparator::new().answer("Client Type", "* Value differs"));
    let sink = Arc::new(MemorySink::new());
    let p = pipeline(
        Some(Arc::clone(&doc)),
        Some(Arc::clone(&rule)),
        Arc::clone(&comparator),
        Arc::clone(&sink),
    );

    let ctx = RunContext::detached();
    let outcome = p.run(&ctx).await;

    let summary = match outcome {
        RunOutcome::Completed(s) => s,
        other => panic!("run did not complete: {other:?}"),
    };
    assert_eq!(summary.document_records, 2);
    assert_eq!(summary.rule_records, 2);
    assert_eq!(summary.total_rows, 5);
    assert_eq!(summary.report_url.as_deref(), Some("memory://reports/1"));
    assert!(summary.message.starts_with("Comparison completed successfully in"));

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.header[1], "Notion JSON");
    assert_eq!(report.header[2], "ERP JSON");

    let labels: Vec<&str> = report.rows.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "client type",
            "=== NOTION-ONLY PARAMETERS ===",
            "visa status",
            "=== ERP-ONLY PARAMETERS ===",
            "salary band",
        ]
    );
    assert_eq!(report.section_boundaries, vec![1, 3]);
    assert_eq!(report.rows[1].kind, RowKind::Banner);
    assert_eq!(report.rows[0].comparison_text, "* Value differs");
    assert_eq!(report.rows[2].comparison_text, "Parameter missing in ERP");
    assert_eq!(report.rows[4].comparison_text, "Parameter missing in Notion");

    // Extracted conditions and the renamed rule field both reach the cells.
    assert!(report.rows[0].left_chunk.contains("\"value\": \"1. Maid\""));
    assert!(report.rows[0].right_chunk.contains("Client_Type == Maid"));
    assert!(report.rows[0].right_chunk.contains("\"condition\": \"else\""));
    assert_eq!(report.rows[2].right_chunk, "{}");

    assert_eq!(comparator.calls(), vec!["client type".to_string()]);
    // The CONTEXT entry is never fetched.
    assert_eq!(rule.detail_calls(), 2);

    let filters = doc.seen_filters();
    assert_eq!(filters.len(), 1);
    let filter = filters[0].clone().expect("both flag columns exist");
    assert_eq!(filter["and"][0]["checkbox"]["equals"], true);
    assert_eq!(filter["and"][1]["checkbox"]["equals"], false);

    let snap = ctx.snapshot();
    assert_eq!(snap.status, RunStatus::Completed);
    assert_eq!(snap.percentage, 100);
    assert!(snap
        .logs
        .iter()
        .any(|l| l.message == "Processed 3/3 document pages"));
}

#[tokio::test]
async fn single_source_run_lists_everything_as_one_sided() {
    let rule = Arc::new(rule_api());
    let comparator = Arc::new(ScriptedComparator::new());
    let sink = Arc::new(MemorySink::new());
    let p = pipeline(None, Some(rule), Arc::clone(&comparator), Arc::clone(&sink));

    let ctx = RunContext::detached();
    let outcome = p.run(&ctx).await;
    assert_eq!(outcome.status(), RunStatus::Completed);

    let report = &sink.reports()[0];
    assert_eq!(report.rows[0].label, "=== ERP-ONLY PARAMETERS ===");
    assert_eq!(report.section_boundaries, vec![0]);
    assert_eq!(report.rows.len(), 3);
    assert!(comparator.calls().is_empty());
    assert!(ctx
        .snapshot()
        .logs
        .iter()
        .any(|l| l.message == "Document source skipped"));
}

#[tokio::test]
async fn no_data_from_either_source_emits_nothing() {
    let doc = Arc::new(FakeDocumentApi::new().with_plain_page("p1", "Readme"));
    let rule = Arc::new(FakeRuleApi::new().with_rule(context_rule(9, "Only context")));
    let sink = Arc::new(MemorySink::new());
    let p = pipeline(
        Some(doc),
        Some(rule),
        Arc::new(ScriptedComparator::new()),
        Arc::clone(&sink),
    );

    let ctx = RunContext::detached();
    let outcome = p.run(&ctx).await;

    let summary = match outcome {
        RunOutcome::NoData(s) => s,
        other => panic!("expected no-data outcome, got {other:?}"),
    };
    assert_eq!(summary.message, NO_DATA_MESSAGE);
    assert!(sink.reports().is_empty());

    let snap = ctx.snapshot();
    assert_eq!(snap.status, RunStatus::Error);
    assert_eq!(snap.summary.map(|s| s.message), Some(NO_DATA_MESSAGE.to_string()));
}

#[tokio::test]
async fn sink_failure_fails_the_run() {
    let p = pipeline(
        Some(Arc::new(document_api())),
        None,
        Arc::new(ScriptedComparator::new()),
        Arc::new(MemorySink::failing()),
    );

    let ctx = RunContext::detached();
    let outcome = p.run(&ctx).await;

    let msg = match outcome {
        RunOutcome::Failed(m) => m,
        other => panic!("expected failure, got {other:?}"),
    };
    assert!(msg.starts_with("Report could not be written"));
    assert_eq!(ctx.snapshot().status, RunStatus::Error);
}
