//! Lazy traversal of a remote block tree.
//!
//! Both walks use an explicit work stack instead of recursion; the cancel
//! token is polled between pops, so a cancelled page stops after at most one
//! in-flight children fetch.

use std::fmt;

use dsr_schemas::CancelToken;
use tracing::warn;

use crate::block::{Block, RawBlock};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to list one node's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The caller may not read this subtree. Not an error for the page.
    Inaccessible(String),
    /// Retries exhausted on a transient failure. The node is treated as a leaf.
    Transient(String),
    /// Credentials rejected. Aborts the whole fetch.
    Fatal(String),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::Inaccessible(msg) => write!(f, "subtree inaccessible: {msg}"),
            TreeError::Transient(msg) => write!(f, "transient tree error: {msg}"),
            TreeError::Fatal(msg) => write!(f, "fatal tree error: {msg}"),
        }
    }
}

impl std::error::Error for TreeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Cancellation observed mid-page; the page contributes nothing.
    Cancelled,
    Fatal(String),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::Cancelled => write!(f, "extraction cancelled"),
            ExtractError::Fatal(msg) => write!(f, "extraction aborted: {msg}"),
        }
    }
}

impl std::error::Error for ExtractError {}

// ---------------------------------------------------------------------------
// Tree access
// ---------------------------------------------------------------------------

/// Children lookup, one remote call (or paged series of calls) per node.
#[async_trait::async_trait]
pub trait BlockTree: Send + Sync {
    /// All children of `block_id`, in document order.
    async fn children(&self, block_id: &str) -> Result<Vec<RawBlock>, TreeError>;
}

async fn load_children<T: BlockTree + ?Sized>(
    tree: &T,
    block_id: &str,
) -> Result<Vec<RawBlock>, ExtractError> {
    match tree.children(block_id).await {
        Ok(children) => Ok(children),
        Err(TreeError::Fatal(msg)) => Err(ExtractError::Fatal(msg)),
        Err(e) => {
            warn!(block_id = %block_id, error = %e, "children unavailable; treating block as leaf");
            Ok(Vec::new())
        }
    }
}

/// First block in pre-order under `root_id` whose trimmed text starts with
/// `phrase`, compared case-insensitively. The root itself is not tested.
pub async fn find_anchor<T: BlockTree + ?Sized>(
    tree: &T,
    root_id: &str,
    phrase: &str,
    cancel: &CancelToken,
) -> Result<Option<RawBlock>, ExtractError> {
    let phrase = phrase.trim().to_lowercase();

    let mut stack: Vec<RawBlock> = load_children(tree, root_id).await?;
    stack.reverse();

    while let Some(block) = stack.pop() {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        if block.text.trim().to_lowercase().starts_with(&phrase) {
            return Ok(Some(block));
        }
        if block.has_children {
            let children = load_children(tree, &block.id).await?;
            stack.extend(children.into_iter().rev());
        }
    }
    Ok(None)
}

/// The anchor (depth 0) followed by every reachable descendant in pre-order,
/// each at its parent's depth + 1.
pub async fn flatten_subtree<T: BlockTree + ?Sized>(
    tree: &T,
    anchor: RawBlock,
    cancel: &CancelToken,
) -> Result<Vec<Block>, ExtractError> {
    let mut out = Vec::new();
    let mut stack: Vec<(RawBlock, usize, Option<String>)> = vec![(anchor, 0, None)];

    while let Some((raw, depth, parent_id)) = stack.pop() {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let id = raw.id.clone();
        let has_children = raw.has_children;
        out.push(Block::place(raw, depth, parent_id));

        if has_children {
            let children = load_children(tree, &id).await?;
            for child in children.into_iter().rev() {
                stack.push((child, depth + 1, Some(id.clone())));
            }
        }
    }
    Ok(out)
}
