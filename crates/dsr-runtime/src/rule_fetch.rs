//! Rule-source fetcher: paged id enumeration, then per-id detail fetch with
//! retry on the worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use dsr_remote::{with_retry, RemoteError, RetryPolicy, RuleApi, RuleQuery};
use dsr_schemas::{ParameterRecord, SourceSide};
use tracing::{info, warn};

use crate::error::FetchError;
use crate::pool::{run_pool, PoolConfig};
use crate::progress::{RunContext, RULE};
use crate::rule_normalize::normalize_rule;

const STEP: &str = "Fetching rule data";

#[derive(Debug, Clone)]
pub struct RuleFetchConfig {
    pub query: RuleQuery,
    /// Entries of this evaluation type are never fetched.
    pub excluded_evaluation_type: String,
    pub field_renames: BTreeMap<String, String>,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
}

fn fatal(e: RemoteError) -> FetchError {
    FetchError::new(SourceSide::Rule, e.to_string())
}

/// Ids across all listing pages. Auth failure is fatal; any other failure
/// ends the listing with the ids gathered so far.
pub async fn list_rule_ids(
    api: &dyn RuleApi,
    cfg: &RuleFetchConfig,
    ctx: &RunContext,
) -> Result<Vec<i64>, FetchError> {
    let mut ids = Vec::new();
    let mut page = 0u32;
    loop {
        if ctx.is_cancelled() {
            info!(ids = ids.len(), "rule listing cancelled");
            break;
        }
        let listing = match api.list_page(&cfg.query, page).await {
            Ok(l) => l,
            Err(e) if e.is_fatal() => return Err(fatal(e)),
            Err(e) => {
                warn!(page, kept = ids.len(), error = %e, "rule listing cut short");
                break;
            }
        };
        if listing.items.is_empty() {
            break;
        }
        let listed = listing.items.len();
        let before = ids.len();
        ids.extend(
            listing
                .items
                .into_iter()
                .filter(|s| s.evaluation_type.as_deref() != Some(cfg.excluded_evaluation_type.as_str()))
                .map(|s| s.id),
        );
        info!(
            page,
            listed,
            kept = ids.len() - before,
            excluded = %cfg.excluded_evaluation_type,
            "rule listing page"
        );
        if listing.is_last_page {
            break;
        }
        page += 1;
    }
    Ok(ids)
}

/// Normalized records of every listed entry that could be fetched.
///
/// A unit that exhausts its retries is dropped; an auth failure aborts the
/// phase. Returns the records gathered so far when cancelled.
pub async fn fetch_rule_records(
    api: Arc<dyn RuleApi>,
    cfg: &RuleFetchConfig,
    ctx: &RunContext,
) -> Result<Vec<ParameterRecord>, FetchError> {
    if ctx.is_cancelled() {
        return Ok(Vec::new());
    }
    ctx.update(
        STEP,
        RULE.start,
        Some(&format!("Listing rule entries for '{}'", cfg.query.name_contains)),
    );

    let api = api.as_ref();
    let ids = list_rule_ids(api, cfg, ctx).await?;
    if ids.is_empty() || ctx.is_cancelled() {
        warn!(cancelled = ctx.is_cancelled(), "no rule entries to fetch");
        return Ok(Vec::new());
    }
    ctx.update(STEP, RULE.start, Some(&format!("Found {} rule entries", ids.len())));

    let retry = &cfg.retry;
    let renames = &cfg.field_renames;
    let cancel = ctx.cancel_token();
    let outcome = run_pool(
        "rule entries",
        ids,
        cfg.pool,
        cancel,
        RemoteError::is_fatal,
        move |id: i64| async move {
            match with_retry(retry, "rule detail", cancel, |_| api.get(id)).await {
                Ok(raw) => Ok(Some(normalize_rule(&raw, renames))),
                Err(RemoteError::Cancelled) => Ok(None),
                Err(e) => Err(e),
            }
        },
        |done, total| {
            ctx.update(
                STEP,
                RULE.at(done, total),
                Some(&format!("Retrieved {done}/{total} rule records")),
            )
        },
    )
    .await;

    if let Some(e) = outcome.fatal {
        return Err(fatal(e));
    }
    info!(
        records = outcome.items.len(),
        failed = outcome.failed,
        cancelled = outcome.cancelled,
        "rule fetch finished"
    );
    Ok(outcome.items)
}
