//! dsr-runtime
//!
//! Everything that drives a run: the per-run progress context, the bounded
//! worker pool, both source fetchers and the pipeline that ties them to the
//! reconciler and the report sink.

mod document_fetch;
mod error;
mod pipeline;
mod pool;
pub mod progress;
mod rule_fetch;
mod rule_normalize;
mod schema;
mod wiring;

pub use document_fetch::{fetch_document_records, DocumentFetchConfig};
pub use error::FetchError;
pub use pipeline::{
    DocumentSource, Pipeline, PipelineOptions, RuleSource, RunOutcome, NO_DATA_MESSAGE,
};
pub use pool::{run_pool, PoolConfig, PoolOutcome};
pub use progress::{Band, RunContext, RunHandle, RunInFlight};
pub use rule_fetch::{fetch_rule_records, list_rule_ids, RuleFetchConfig};
pub use rule_normalize::{normalize_rule, render_expr};
pub use schema::build_filter;
pub use wiring::{build_pipeline, RunOverrides};
