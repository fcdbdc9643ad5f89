//! dsr-reconcile
//!
//! Pure reconciliation of the two record sets into ordered report rows.
//!
//! Row order is fully determined by the inputs: matched parameters first,
//! then a banner and the document-only group, then a banner and the
//! rule-only group, each sorted by key. Fetch completion order never leaks
//! into the output.

mod chunk;
mod index;

pub use chunk::split_large_text;
pub use index::{build_index, partition, KeyIndex, Partition};

use dsr_schemas::{CancelToken, ParameterRecord, ReconciliationRow, RowKind, SourceSide};
use serde_json::Value;
use tracing::info;

// ---------------------------------------------------------------------------
// Comparator boundary
// ---------------------------------------------------------------------------

/// Produces a free-text description of the semantic differences between a
/// matched pair. Never fails: transport or API problems come back as a
/// descriptive string.
#[async_trait::async_trait]
pub trait Comparator: Send + Sync {
    fn name(&self) -> &str;

    async fn compare(&self, document: &ParameterRecord, rule: &ParameterRecord) -> String;
}

// ---------------------------------------------------------------------------
// Options / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub chunk_chars: usize,
    pub document_label: String,
    pub rule_label: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            chunk_chars: 45_000,
            document_label: "Document".to_string(),
            rule_label: "Rule".to_string(),
        }
    }
}

impl ReconcileOptions {
    pub fn banner(label: &str) -> String {
        format!("=== {}-ONLY PARAMETERS ===", label.to_uppercase())
    }

    pub fn missing_in(label: &str) -> String {
        format!("Parameter missing in {label}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutput {
    pub rows: Vec<ReconciliationRow>,
    /// Index of each banner row in `rows`.
    pub section_boundaries: Vec<usize>,
    pub partition: Partition,
    /// Comparator invocations actually made.
    pub compared: usize,
    /// Stopped early on cancellation; `rows` holds the parameters finished so
    /// far.
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Rewrite `||` to ` OR ` and `&&` to ` AND ` in every string of `v`.
pub fn rewrite_logical_operators(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains("||") || s.contains("&&") {
                *s = s.replace("||", " OR ").replace("&&", " AND ");
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_logical_operators),
        Value::Object(map) => map.values_mut().for_each(rewrite_logical_operators),
        _ => {}
    }
}

fn to_pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| "{}".to_string())
}

/// Serialized document-side cell: pretty JSON with logical operators spelled
/// out. `None` serializes as `{}`.
pub fn document_cell(rec: Option<&ParameterRecord>) -> String {
    let mut v = rec
        .and_then(|r| serde_json::to_value(r).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));
    rewrite_logical_operators(&mut v);
    to_pretty(&v)
}

pub fn rule_cell(rec: Option<&ParameterRecord>) -> String {
    let v = rec
        .and_then(|r| serde_json::to_value(r).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));
    to_pretty(&v)
}

pub fn continuation_label(label: &str) -> String {
    format!("  \u{2514}\u{2500} {label} (cont.)")
}

/// Append the row group of one parameter.
///
/// The group has as many rows as the longer side has chunks. Row 0 carries
/// the label and comparison; later rows carry the continuation label.
pub fn push_parameter_rows(
    rows: &mut Vec<ReconciliationRow>,
    label: &str,
    left: &str,
    right: &str,
    comparison: String,
    chunk_chars: usize,
) {
    let left_chunks = split_large_text(left, chunk_chars);
    let right_chunks = split_large_text(right, chunk_chars);
    let n = left_chunks.len().max(right_chunks.len());

    let mut comparison = Some(comparison);
    for i in 0..n {
        let (kind, row_label) = if i == 0 {
            (RowKind::Parameter, label.to_string())
        } else {
            (RowKind::Continuation, continuation_label(label))
        };
        rows.push(ReconciliationRow {
            kind,
            label: row_label,
            left_chunk: left_chunks.get(i).cloned().unwrap_or_default(),
            right_chunk: right_chunks.get(i).cloned().unwrap_or_default(),
            comparison_text: if i == 0 {
                comparison.take().unwrap_or_default()
            } else {
                String::new()
            },
        });
    }
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

/// Align both record sets by key and lay out the report rows.
///
/// `on_compared(done, total)` fires after each comparator call. Cancellation
/// is checked before every parameter; the parameter in progress always
/// finishes.
pub async fn reconcile(
    document: &[ParameterRecord],
    rule: &[ParameterRecord],
    comparator: &dyn Comparator,
    opts: &ReconcileOptions,
    cancel: &CancelToken,
    on_compared: &(dyn Fn(usize, usize) + Send + Sync),
) -> ReconcileOutput {
    let doc_idx = build_index(&opts.document_label, document);
    let rule_idx = build_index(&opts.rule_label, rule);
    let part = partition(&doc_idx, &rule_idx);
    info!(
        document = doc_idx.len(),
        rule = rule_idx.len(),
        both = part.both.len(),
        only_document = part.only_document.len(),
        only_rule = part.only_rule.len(),
        comparator = comparator.name(),
        "reconciling"
    );

    let mut out = ReconcileOutput::default();

    // Matched parameters.
    let total = part.both.len();
    for key in &part.both {
        if cancel.is_cancelled() {
            out.cancelled = true;
            break;
        }
        let (Some(d), Some(r)) = (doc_idx.get(key), rule_idx.get(key)) else {
            continue;
        };
        let comparison = comparator.compare(d, r).await;
        out.compared += 1;
        on_compared(out.compared, total);
        push_parameter_rows(
            &mut out.rows,
            key,
            &document_cell(Some(d)),
            &rule_cell(Some(r)),
            comparison,
            opts.chunk_chars,
        );
    }

    // One-sided groups.
    let groups = [
        (SourceSide::Document, &part.only_document),
        (SourceSide::Rule, &part.only_rule),
    ];
    for (side, keys) in groups {
        if out.cancelled || keys.is_empty() {
            continue;
        }
        let (present_label, missing_label) = match side {
            SourceSide::Document => (&opts.document_label, &opts.rule_label),
            SourceSide::Rule => (&opts.rule_label, &opts.document_label),
        };
        out.section_boundaries.push(out.rows.len());
        out.rows
            .push(ReconciliationRow::banner(ReconcileOptions::banner(present_label)));

        for key in keys {
            if cancel.is_cancelled() {
                out.cancelled = true;
                break;
            }
            let (left, right) = match side {
                SourceSide::Document => (document_cell(doc_idx.get(key)), rule_cell(None)),
                SourceSide::Rule => (document_cell(None), rule_cell(rule_idx.get(key))),
            };
            push_parameter_rows(
                &mut out.rows,
                key,
                &left,
                &right,
                ReconcileOptions::missing_in(missing_label),
                opts.chunk_chars,
            );
        }
    }

    out.partition = part;
    out
}
