//! dsr-extract
//!
//! Tree Extractor: turns one page's block tree into at most one
//! [`ParameterRecord`].
//!
//! 1. [`find_anchor`] searches the page for the anchor block.
//! 2. [`flatten_subtree`] walks the anchor's descendants into a depth-annotated
//!    pre-order sequence, fetching children lazily.
//! 3. [`reduce`] scans that sequence into a parameter name and its ordered
//!    conditions.
//!
//! A page without an anchor yields `Ok(None)`; that is an expected outcome,
//! not an error.

mod block;
mod reduce;
mod walk;

#[cfg(any(test, feature = "testkit"))]
mod memory;

pub use block::{
    concat_rich_text, identifier_from_title, page_title, Block, BlockKind, RawBlock, RichTextRun,
    TextContent,
};
pub use reduce::{clean_value_text, reduce, Reduced};
pub use walk::{find_anchor, flatten_subtree, BlockTree, ExtractError, TreeError};

#[cfg(any(test, feature = "testkit"))]
pub use memory::MemoryTree;

use dsr_schemas::{CancelToken, ParameterRecord};
use tracing::debug;

/// Phrases that locate and interpret the relevant section of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub anchor_phrase: String,
    pub parameter_label: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            anchor_phrase: "technical ecp".to_string(),
            parameter_label: "technical ecp parameter name".to_string(),
        }
    }
}

/// Extract the record of one page.
///
/// `title` is the page title as resolved by [`page_title`]; it becomes the
/// record identifier.
pub async fn extract_page<T: BlockTree + ?Sized>(
    tree: &T,
    page_id: &str,
    title: &str,
    opts: &ExtractOptions,
    cancel: &CancelToken,
) -> Result<Option<ParameterRecord>, ExtractError> {
    let Some(anchor) = find_anchor(tree, page_id, &opts.anchor_phrase, cancel).await? else {
        debug!(page_id = %page_id, "no anchor block; page skipped");
        return Ok(None);
    };

    let blocks = flatten_subtree(tree, anchor, cancel).await?;
    let reduced = reduce(&blocks, &opts.parameter_label);
    debug!(
        page_id = %page_id,
        blocks = blocks.len(),
        conditions = reduced.conditions.len(),
        "page reduced"
    );

    Ok(Some(ParameterRecord::new(
        identifier_from_title(title),
        reduced.parameter,
        reduced.conditions,
    )))
}
