//! dsr-testkit
//!
//! In-memory stand-ins for every remote collaborator, and builders that wire
//! them into a [`Pipeline`]. No network I/O.

mod collab;
mod document;
mod rule;

pub use collab::{MemorySink, ScriptedComparator};
pub use document::FakeDocumentApi;
pub use rule::{context_rule, erp_rule, leaf, FakeRuleApi};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dsr_extract::ExtractOptions;
use dsr_reconcile::ReconcileOptions;
use dsr_remote::{RetryPolicy, RuleQuery};
use dsr_runtime::{
    DocumentFetchConfig, DocumentSource, Pipeline, PipelineOptions, PoolConfig, RuleFetchConfig,
    RuleSource,
};

pub const DATABASE_ID: &str = "0123456789abcdef0123456789abcdef";
pub const DOCUMENT_LABEL: &str = "Notion";
pub const RULE_LABEL: &str = "ERP";

/// Three attempts, millisecond back-off.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

pub fn pool(workers: usize) -> PoolConfig {
    PoolConfig {
        workers,
        unit_delay: Duration::ZERO,
    }
}

pub fn document_source(api: Arc<FakeDocumentApi>) -> DocumentSource {
    DocumentSource {
        api,
        cfg: DocumentFetchConfig {
            database_id: DATABASE_ID.to_string(),
            include_flag: "to be validated".to_string(),
            exclude_flag: "technical validated".to_string(),
            extract: ExtractOptions::default(),
            pool: pool(2),
            retry: fast_retry(),
        },
    }
}

pub fn rule_source(api: Arc<FakeRuleApi>, prompt_name: &str) -> RuleSource {
    let mut renames = BTreeMap::new();
    renames.insert("maidType".to_string(), "Client_Type".to_string());
    RuleSource {
        api,
        cfg: RuleFetchConfig {
            query: RuleQuery {
                created_after: "2025-05-01 12:17:57".to_string(),
                name_contains: prompt_name.to_string(),
                page_size: 100,
            },
            excluded_evaluation_type: "CONTEXT".to_string(),
            field_renames: renames,
            pool: pool(5),
            retry: fast_retry(),
        },
    }
}

pub fn options(chunk_chars: usize) -> PipelineOptions {
    PipelineOptions {
        reconcile: ReconcileOptions {
            chunk_chars,
            document_label: DOCUMENT_LABEL.to_string(),
            rule_label: RULE_LABEL.to_string(),
        },
        title_prefix: "Scenario".to_string(),
        concurrent_sources: false,
    }
}

/// A pipeline over fakes, with default options.
pub fn pipeline(
    document: Option<Arc<FakeDocumentApi>>,
    rule: Option<Arc<FakeRuleApi>>,
    comparator: Arc<ScriptedComparator>,
    sink: Arc<MemorySink>,
) -> Pipeline {
    Pipeline::new(
        document.map(document_source),
        rule.map(|r| rule_source(r, "")),
        comparator,
        sink,
        options(45_000),
    )
}
