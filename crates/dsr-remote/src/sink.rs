//! Report sinks: a remote spreadsheet endpoint and a local `.xlsx` writer,
//! chained by [`FallbackSink`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dsr_reconcile::{continuation_label, split_large_text};
use dsr_schemas::{ReconciliationRow, RowKind};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{preview, RemoteError};

/// Hard cell-length limit of the xlsx format.
pub const XLSX_CELL_LIMIT: usize = 32_767;

const SHEET_NAME: &str = "Comparison";
const COLUMN_WIDTHS: [f64; 4] = [28.6, 57.0, 57.0, 71.0];

/// Everything a sink needs to render one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub title: String,
    pub header: [String; 4],
    pub rows: Vec<ReconciliationRow>,
    /// Indices into `rows` of the banner rows.
    pub section_boundaries: Vec<usize>,
}

impl Report {
    pub fn header_for(document_label: &str, rule_label: &str) -> [String; 4] {
        [
            "Parameter".to_string(),
            format!("{document_label} JSON"),
            format!("{rule_label} JSON"),
            "Comparison".to_string(),
        ]
    }

    /// Payload for the remote sink.
    pub fn to_payload(&self) -> Value {
        let rows: Vec<[&str; 4]> = self.rows.iter().map(|r| r.cells()).collect();
        json!({
            "title": self.title,
            "header": self.header,
            "rows": rows,
            "sectionHeaders": self.section_boundaries,
        })
    }
}

/// Returns a URL or path the report can be opened from.
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &str;

    async fn emit(&self, report: &Report) -> Result<String, RemoteError>;
}

// ---------------------------------------------------------------------------
// Remote sheet
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpSheetSink {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpSheetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSheetSink")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl HttpSheetSink {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            token,
        })
    }
}

#[async_trait::async_trait]
impl ReportSink for HttpSheetSink {
    fn name(&self) -> &str {
        "sheet"
    }

    async fn emit(&self, report: &Report) -> Result<String, RemoteError> {
        let mut req = self.http.post(&self.url).json(&report.to_payload());
        if let Some(t) = &self.token {
            req = req.bearer_auth(t);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if !(200..300).contains(&status) {
            return Err(RemoteError::Http {
                status,
                message: preview(&body, 200),
            });
        }
        let v: Value =
            serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        match v.get("url").and_then(Value::as_str) {
            Some(url) if !url.is_empty() => Ok(url.to_string()),
            _ => Err(RemoteError::Decode("sheet sink reply has no url".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Local xlsx
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct XlsxFileSink {
    path: PathBuf,
}

impl XlsxFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Rows as laid out on the sheet. A row with a cell over [`XLSX_CELL_LIMIT`]
/// is spread over continuation rows; concatenating a column across the
/// group gives back the original cell.
pub fn sheet_rows(report: &Report) -> Vec<ReconciliationRow> {
    let mut out = Vec::with_capacity(report.rows.len());
    for row in &report.rows {
        let fits = [&row.left_chunk, &row.right_chunk, &row.comparison_text]
            .iter()
            .all(|c| c.chars().count() <= XLSX_CELL_LIMIT);
        if row.kind == RowKind::Banner || fits {
            out.push(row.clone());
            continue;
        }

        let left = split_large_text(&row.left_chunk, XLSX_CELL_LIMIT);
        let right = split_large_text(&row.right_chunk, XLSX_CELL_LIMIT);
        let comparison = split_large_text(&row.comparison_text, XLSX_CELL_LIMIT);
        let n = left.len().max(right.len()).max(comparison.len());
        let cont = match row.kind {
            RowKind::Continuation => row.label.clone(),
            _ => continuation_label(&row.label),
        };
        warn!(label = %row.label, rows = n, "cell over xlsx limit; spread over extra rows");
        for i in 0..n {
            out.push(ReconciliationRow {
                kind: if i == 0 { row.kind } else { RowKind::Continuation },
                label: if i == 0 { row.label.clone() } else { cont.clone() },
                left_chunk: left.get(i).cloned().unwrap_or_default(),
                right_chunk: right.get(i).cloned().unwrap_or_default(),
                comparison_text: comparison.get(i).cloned().unwrap_or_default(),
            });
        }
    }
    out
}

/// Labels only; data cells go through [`sheet_rows`].
fn clip(text: &str) -> &str {
    match text.char_indices().nth(XLSX_CELL_LIMIT) {
        Some((idx, _)) => {
            warn!(chars = text.chars().count(), "cell truncated to xlsx limit");
            &text[..idx]
        }
        None => text,
    }
}

fn xlsx_err(e: rust_xlsxwriter::XlsxError) -> RemoteError {
    RemoteError::Io(format!("xlsx: {e}"))
}

/// Synchronous workbook build; run on a blocking thread.
pub fn write_xlsx(path: &Path, report: &Report) -> Result<(), RemoteError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet().set_name(SHEET_NAME).map_err(xlsx_err)?;

    let header_fmt = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0xD9D9D9))
        .set_align(FormatAlign::Top)
        .set_text_wrap();
    let cell_fmt = Format::new().set_align(FormatAlign::Top).set_text_wrap();
    let banner_fmt = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(0xC00000))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter);

    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        sheet.set_column_width(col as u16, *width).map_err(xlsx_err)?;
    }
    for (col, text) in report.header.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, text, &header_fmt)
            .map_err(xlsx_err)?;
    }

    for (i, row) in sheet_rows(report).iter().enumerate() {
        let r = (i + 1) as u32;
        if row.kind == RowKind::Banner {
            sheet
                .merge_range(r, 0, r, 3, clip(&row.label), &banner_fmt)
                .map_err(xlsx_err)?;
            continue;
        }
        sheet
            .write_string_with_format(r, 0, clip(&row.label), &cell_fmt)
            .map_err(xlsx_err)?;
        for (col, text) in row.cells().iter().enumerate().skip(1) {
            sheet
                .write_string_with_format(r, col as u16, *text, &cell_fmt)
                .map_err(xlsx_err)?;
        }
    }

    sheet.set_freeze_panes(1, 0).map_err(xlsx_err)?;
    workbook.save(path).map_err(xlsx_err)
}

#[async_trait::async_trait]
impl ReportSink for XlsxFileSink {
    fn name(&self) -> &str {
        "xlsx"
    }

    async fn emit(&self, report: &Report) -> Result<String, RemoteError> {
        let path = if self.path.is_absolute() {
            self.path.clone()
        } else {
            std::env::current_dir()
                .map_err(|e| RemoteError::Io(e.to_string()))?
                .join(&self.path)
        };
        let report = report.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_xlsx(&target, &report))
            .await
            .map_err(|e| RemoteError::Io(format!("xlsx writer task: {e}")))??;
        Ok(path.display().to_string())
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Tries `primary` (when set), then `fallback`.
#[derive(Clone)]
pub struct FallbackSink {
    primary: Option<Arc<dyn ReportSink>>,
    fallback: Arc<dyn ReportSink>,
}

impl FallbackSink {
    pub fn new(primary: Option<Arc<dyn ReportSink>>, fallback: Arc<dyn ReportSink>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait::async_trait]
impl ReportSink for FallbackSink {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn emit(&self, report: &Report) -> Result<String, RemoteError> {
        if let Some(primary) = &self.primary {
            match primary.emit(report).await {
                Ok(url) => return Ok(url),
                Err(e) => warn!(
                    sink = primary.name(),
                    error = %e,
                    fallback = self.fallback.name(),
                    "report sink failed; falling back"
                ),
            }
        }
        let out = self.fallback.emit(report).await?;
        info!(sink = self.fallback.name(), location = %out, "report written");
        Ok(out)
    }
}
