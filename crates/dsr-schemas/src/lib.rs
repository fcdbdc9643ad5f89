//! dsr-schemas
//!
//! Plain data types shared by every pipeline crate. No IO, no async.

mod cancel;
mod progress;

pub use cancel::CancelToken;
pub use progress::{LogEntry, ProgressState, RunStatus, RunSummary};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parameter records
// ---------------------------------------------------------------------------

/// Condition text reserved for the trailing default/fallback entry.
pub const ELSE_CONDITION: &str = "else";

/// One entry of a parameter's ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionValue {
    pub condition: String,
    pub value: String,
}

impl ConditionValue {
    pub fn new(condition: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            value: value.into(),
        }
    }

    pub fn fallback(value: impl Into<String>) -> Self {
        Self::new(ELSE_CONDITION, value)
    }

    pub fn is_fallback(&self) -> bool {
        self.condition == ELSE_CONDITION
    }
}

/// A normalized parameter as produced by either source.
///
/// `parameter` is the reconciliation key; `identifier` only labels provenance.
/// Field order is the serialized order shown in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRecord {
    pub identifier: String,
    pub parameter: String,
    pub conditional_logic: Vec<ConditionValue>,
}

impl ParameterRecord {
    pub fn new(
        identifier: impl Into<String>,
        parameter: impl Into<String>,
        conditional_logic: Vec<ConditionValue>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            parameter: parameter.into(),
            conditional_logic,
        }
    }

    /// Case-insensitive, trimmed lookup key. `None` when the parameter is blank.
    pub fn key(&self) -> Option<String> {
        let k = self.parameter.trim();
        if k.is_empty() {
            None
        } else {
            Some(k.to_lowercase())
        }
    }
}

// ---------------------------------------------------------------------------
// Source sides
// ---------------------------------------------------------------------------

/// Which of the two independent sources a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSide {
    Document,
    Rule,
}

impl SourceSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSide::Document => "document",
            SourceSide::Rule => "rule",
        }
    }
}

// ---------------------------------------------------------------------------
// Report rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    /// First row of a parameter: label + comparison text.
    Parameter,
    /// Overflow row carrying further chunks of a parameter.
    Continuation,
    /// Section banner before a one-sided group.
    Banner,
}

/// One output row of the reconciliation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRow {
    pub kind: RowKind,
    pub label: String,
    pub left_chunk: String,
    pub right_chunk: String,
    pub comparison_text: String,
}

impl ReconciliationRow {
    pub fn banner(text: impl Into<String>) -> Self {
        Self {
            kind: RowKind::Banner,
            label: text.into(),
            left_chunk: String::new(),
            right_chunk: String::new(),
            comparison_text: String::new(),
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.kind == RowKind::Continuation
    }

    /// The four report cells in column order.
    pub fn cells(&self) -> [&str; 4] {
        [
            self.label.as_str(),
            self.left_chunk.as_str(),
            self.right_chunk.as_str(),
            self.comparison_text.as_str(),
        ]
    }
}
