//! Document-source fetcher: schema lookup, filtered page listing, then one
//! extraction per page on the worker pool.

use std::sync::Arc;

use dsr_extract::{extract_page, ExtractError, ExtractOptions};
use dsr_remote::{with_retry, ApiBlockTree, DocumentApi, PageRef, RemoteError, RetryPolicy};
use dsr_schemas::{ParameterRecord, SourceSide};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::pool::{run_pool, PoolConfig};
use crate::progress::{RunContext, DOCUMENT};
use crate::schema::build_filter;

const STEP: &str = "Fetching document data";

#[derive(Debug, Clone)]
pub struct DocumentFetchConfig {
    /// 32-hex database id, already parsed.
    pub database_id: String,
    pub include_flag: String,
    pub exclude_flag: String,
    pub extract: ExtractOptions,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
}

fn fatal(e: impl std::fmt::Display) -> FetchError {
    FetchError::new(SourceSide::Document, e.to_string())
}

async fn list_pages(
    api: &dyn DocumentApi,
    cfg: &DocumentFetchConfig,
    ctx: &RunContext,
) -> Result<Option<Vec<PageRef>>, FetchError> {
    let db = cfg.database_id.as_str();
    let cancel = ctx.cancel_token();
    let schema = match with_retry(&cfg.retry, "database schema", cancel, |_| {
        api.retrieve_schema(db)
    })
    .await
    {
        Ok(s) => s,
        Err(e) if e.is_fatal() => return Err(fatal(e)),
        Err(RemoteError::Cancelled) => return Ok(None),
        Err(e) => {
            warn!(database = %db, error = %e, "database schema unavailable; no document pages");
            ctx.update(STEP, DOCUMENT.start, Some(&format!("Document database unavailable: {e}")));
            return Ok(Some(Vec::new()));
        }
    };
    let filter = build_filter(&schema, &cfg.include_flag, &cfg.exclude_flag);
    debug!(database = %db, filtered = filter.is_some(), "page filter chosen");

    let mut pages: Vec<PageRef> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        if ctx.is_cancelled() {
            info!(pages = pages.len(), "page listing cancelled");
            return Ok(None);
        }
        let cur = cursor.clone();
        let filter = filter.as_ref();
        let listing = with_retry(&cfg.retry, "page query", cancel, |_| {
            let cur = cur.clone();
            async move { api.query(db, filter, cur.as_deref()).await }
        })
        .await;
        match listing {
            Ok(l) => {
                pages.extend(l.items);
                match (l.has_more, l.next_cursor) {
                    (true, Some(next)) => cursor = Some(next),
                    _ => break,
                }
            }
            Err(e) if e.is_fatal() => return Err(fatal(e)),
            Err(RemoteError::Cancelled) => {
                info!(pages = pages.len(), "page listing cancelled");
                return Ok(None);
            }
            Err(e) => {
                warn!(kept = pages.len(), error = %e, "page listing cut short");
                break;
            }
        }
    }
    Ok(Some(pages))
}

/// Records of every listed page that has an anchor section.
///
/// Pages without an anchor, or cut short by cancellation, contribute nothing.
/// Returns the records gathered so far when cancelled.
pub async fn fetch_document_records(
    api: Arc<dyn DocumentApi>,
    cfg: &DocumentFetchConfig,
    ctx: &RunContext,
) -> Result<Vec<ParameterRecord>, FetchError> {
    if ctx.is_cancelled() {
        return Ok(Vec::new());
    }
    ctx.update(STEP, DOCUMENT.start, Some("Reading document database"));

    let Some(pages) = list_pages(api.as_ref(), cfg, ctx).await? else {
        return Ok(Vec::new());
    };
    ctx.update(
        STEP,
        DOCUMENT.start,
        Some(&format!("Found {} document pages", pages.len())),
    );

    let cancel = ctx.cancel_token();
    let tree = ApiBlockTree::new(Arc::clone(&api), cfg.retry, cancel.clone());
    let tree = &tree;
    let opts = &cfg.extract;

    let outcome = run_pool(
        "document pages",
        pages,
        cfg.pool,
        cancel,
        |e: &ExtractError| matches!(e, ExtractError::Fatal(_)),
        move |page: PageRef| async move {
            match extract_page(tree, &page.id, &page.title, opts, cancel).await {
                Ok(None) => {
                    info!(page_id = %page.id, title = %page.title, "no anchor section; page skipped");
                    Ok(None)
                }
                Err(ExtractError::Cancelled) => {
                    debug!(page_id = %page.id, "page extraction cancelled; dropped");
                    Ok(None)
                }
                other => other,
            }
        },
        |done, total| {
            ctx.update(
                STEP,
                DOCUMENT.at(done, total),
                Some(&format!("Processed {done}/{total} document pages")),
            )
        },
    )
    .await;

    if let Some(e) = outcome.fatal {
        return Err(fatal(e));
    }
    info!(
        records = outcome.items.len(),
        cancelled = outcome.cancelled,
        "document fetch finished"
    );
    Ok(outcome.items)
}
