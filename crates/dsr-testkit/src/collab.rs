//! Scripted comparator and in-memory report sink.

use std::collections::HashMap;
use std::sync::Mutex;

use dsr_reconcile::Comparator;
use dsr_remote::{RemoteError, Report, ReportSink, NO_DIFFERENCES};
use dsr_schemas::{CancelToken, ParameterRecord};

/// Answers from a table keyed by lowercase parameter name; anything else
/// gets the no-differences reply. Every call is recorded.
#[derive(Debug, Default)]
pub struct ScriptedComparator {
    answers: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
    cancel_after: Option<(usize, CancelToken)>,
}

impl ScriptedComparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, parameter: &str, text: &str) -> Self {
        self.answers
            .insert(parameter.trim().to_lowercase(), text.to_string());
        self
    }

    /// Trip `token` once `n` comparisons have been made.
    pub fn cancel_after(mut self, n: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    /// Parameters compared, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl Comparator for ScriptedComparator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn compare(&self, document: &ParameterRecord, _rule: &ParameterRecord) -> String {
        let key = document.parameter.trim().to_lowercase();
        let made = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(key.clone());
            calls.len()
        };
        if let Some((n, token)) = &self.cancel_after {
            if made >= *n {
                token.cancel();
            }
        }
        self.answers
            .get(&key)
            .cloned()
            .unwrap_or_else(|| NO_DIFFERENCES.to_string())
    }
}

/// Keeps every emitted report. A failing sink answers with a transient error.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<Report>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl ReportSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn emit(&self, report: &Report) -> Result<String, RemoteError> {
        if self.fail {
            return Err(RemoteError::Transient("sink unavailable".to_string()));
        }
        let mut reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        reports.push(report.clone());
        Ok(format!("memory://reports/{}", reports.len()))
    }
}
