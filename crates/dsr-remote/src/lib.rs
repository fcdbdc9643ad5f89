//! dsr-remote
//!
//! HTTP collaborators of the pipeline: the block-tree document API, the rule
//! engine API, the messages comparator and the report sinks. All status-code
//! interpretation lives here; callers only see [`RemoteError`] kinds.

mod comparator;
mod document;
mod error;
mod retry;
mod rule;
mod sink;

pub use comparator::{build_prompt, ComparatorConfig, MessagesComparator, NO_DIFFERENCES};
pub use document::{
    ApiBlockTree, DocumentApi, HttpDocumentClient, Listing, PageRef, PropertyKind, PropertySchema,
};
pub use error::RemoteError;
pub use retry::{with_retry, RetryPolicy};
pub use rule::{
    ExprNode, HttpRuleClient, RawApiBlock, RawCondition, RawRule, RuleApi, RuleListing, RuleQuery,
    RuleSummary,
};
pub use sink::{
    write_xlsx, FallbackSink, HttpSheetSink, Report, ReportSink, XlsxFileSink, XLSX_CELL_LIMIT,
};
