//! Run orchestration: fetch both sources, reconcile, emit the report.
//!
//! Phases run in order (document, rule, compare, report) unless
//! `concurrent_sources` is set, in which case the two fetches are joined and a
//! fatal error on either side ends both.
//! Every phase reports into the run's [`RunContext`]; the outcome is also
//! written there as the terminal status.

use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use dsr_reconcile::{reconcile, Comparator, ReconcileOptions};
use dsr_remote::{DocumentApi, Report, ReportSink, RuleApi};
use dsr_schemas::{ParameterRecord, RunStatus, RunSummary};
use tracing::info;

use crate::document_fetch::{fetch_document_records, DocumentFetchConfig};
use crate::error::FetchError;
use crate::progress::{RunContext, COMPARE, DOCUMENT, INIT, REPORT, RULE};
use crate::rule_fetch::{fetch_rule_records, RuleFetchConfig};

pub const NO_DATA_MESSAGE: &str =
    "No data found from either source. Please check your inputs and try again.";

pub struct DocumentSource {
    pub api: Arc<dyn DocumentApi>,
    pub cfg: DocumentFetchConfig,
}

pub struct RuleSource {
    pub api: Arc<dyn RuleApi>,
    pub cfg: RuleFetchConfig,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub reconcile: ReconcileOptions,
    pub title_prefix: String,
    pub concurrent_sources: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Both sources came back empty; nothing was compared or emitted.
    NoData(RunSummary),
    Cancelled,
    Failed(String),
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Completed(_) => RunStatus::Completed,
            RunOutcome::NoData(_) | RunOutcome::Failed(_) => RunStatus::Error,
            RunOutcome::Cancelled => RunStatus::Cancelled,
        }
    }
}

pub struct Pipeline {
    document: Option<DocumentSource>,
    rule: Option<RuleSource>,
    comparator: Arc<dyn Comparator>,
    sink: Arc<dyn ReportSink>,
    opts: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        document: Option<DocumentSource>,
        rule: Option<RuleSource>,
        comparator: Arc<dyn Comparator>,
        sink: Arc<dyn ReportSink>,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            document,
            rule,
            comparator,
            sink,
            opts,
        }
    }

    pub fn has_document_source(&self) -> bool {
        self.document.is_some()
    }

    pub fn has_rule_source(&self) -> bool {
        self.rule.is_some()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.opts
    }

    async fn fetch_document(&self, ctx: &RunContext) -> Result<Vec<ParameterRecord>, FetchError> {
        match &self.document {
            Some(src) => fetch_document_records(Arc::clone(&src.api), &src.cfg, ctx).await,
            None => {
                ctx.update("Fetching document data", DOCUMENT.end, Some("Document source skipped"));
                Ok(Vec::new())
            }
        }
    }

    async fn fetch_rule(&self, ctx: &RunContext) -> Result<Vec<ParameterRecord>, FetchError> {
        match &self.rule {
            Some(src) => fetch_rule_records(Arc::clone(&src.api), &src.cfg, ctx).await,
            None => {
                ctx.update("Fetching rule data", RULE.end, Some("Rule source skipped"));
                Ok(Vec::new())
            }
        }
    }

    fn cancelled(&self, ctx: &RunContext) -> RunOutcome {
        ctx.finish(RunStatus::Cancelled, None, "Comparison cancelled");
        RunOutcome::Cancelled
    }

    fn failed(&self, ctx: &RunContext, message: String) -> RunOutcome {
        ctx.finish(RunStatus::Error, None, &message);
        RunOutcome::Failed(message)
    }

    /// Drive one run to a terminal status.
    pub async fn run(&self, ctx: &RunContext) -> RunOutcome {
        let started = Instant::now();
        ctx.update("Initializing", INIT.end, Some("Starting comparison"));

        let fetched = if self.opts.concurrent_sources {
            // The first fatal error drops the sibling fetch mid-flight.
            tokio::try_join!(self.fetch_document(ctx), self.fetch_rule(ctx))
        } else {
            match self.fetch_document(ctx).await {
                Ok(d) if ctx.is_cancelled() => Ok((d, Vec::new())),
                Ok(d) => self.fetch_rule(ctx).await.map(|r| (d, r)),
                Err(e) => Err(e),
            }
        };
        let (document, rule) = match fetched {
            Ok(v) => v,
            Err(e) => return self.failed(ctx, format!("Comparison failed: {e}")),
        };
        if ctx.is_cancelled() {
            return self.cancelled(ctx);
        }

        if document.is_empty() && rule.is_empty() {
            let summary = RunSummary {
                document_records: 0,
                rule_records: 0,
                total_rows: 0,
                report_url: None,
                elapsed_secs: started.elapsed().as_secs_f64(),
                message: NO_DATA_MESSAGE.to_string(),
            };
            ctx.finish(RunStatus::Error, Some(summary.clone()), NO_DATA_MESSAGE);
            return RunOutcome::NoData(summary);
        }

        ctx.update(
            "Comparing parameters",
            COMPARE.start,
            Some(&format!(
                "Comparing {} document and {} rule records",
                document.len(),
                rule.len()
            )),
        );
        let on_compared = |done: usize, total: usize| {
            ctx.update(
                "Comparing parameters",
                COMPARE.at(done, total),
                Some(&format!("Compared {done}/{total} matched parameters")),
            )
        };
        let out = reconcile(
            &document,
            &rule,
            self.comparator.as_ref(),
            &self.opts.reconcile,
            ctx.cancel_token(),
            &on_compared,
        )
        .await;
        if out.cancelled || ctx.is_cancelled() {
            return self.cancelled(ctx);
        }

        let report = Report {
            title: format!(
                "{} {}",
                self.opts.title_prefix,
                Local::now().format("%Y-%m-%d %H:%M")
            ),
            header: Report::header_for(
                &self.opts.reconcile.document_label,
                &self.opts.reconcile.rule_label,
            ),
            rows: out.rows,
            section_boundaries: out.section_boundaries,
        };
        ctx.update(
            "Creating report",
            REPORT.start,
            Some(&format!("Writing {} report rows", report.rows.len())),
        );
        let url = match self.sink.emit(&report).await {
            Ok(url) => url,
            Err(e) => return self.failed(ctx, format!("Report could not be written: {e}")),
        };

        let elapsed = started.elapsed().as_secs_f64();
        let summary = RunSummary {
            document_records: document.len(),
            rule_records: rule.len(),
            total_rows: report.rows.len(),
            report_url: Some(url),
            elapsed_secs: elapsed,
            message: format!("Comparison completed successfully in {elapsed:.1} seconds!"),
        };
        info!(
            document = summary.document_records,
            rule = summary.rule_records,
            rows = summary.total_rows,
            compared = out.compared,
            report = ?summary.report_url,
            "run completed"
        );
        ctx.finish(RunStatus::Completed, Some(summary.clone()), &summary.message);
        RunOutcome::Completed(summary)
    }
}
