//! In-memory [`BlockTree`] for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::block::RawBlock;
use crate::walk::{BlockTree, TreeError};

#[derive(Debug, Default)]
pub struct MemoryTree {
    children: HashMap<String, Vec<RawBlock>>,
    denied: HashSet<String>,
    fatal: HashSet<String>,
    calls: AtomicUsize,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `parent`'s children. Any child that is itself registered as
    /// a parent (now or later) reports `has_children = true`.
    pub fn with_children(mut self, parent: &str, children: Vec<RawBlock>) -> Self {
        self.children.insert(parent.to_string(), children);
        self
    }

    /// Listing `id`'s children fails as inaccessible.
    pub fn deny(mut self, id: &str) -> Self {
        self.denied.insert(id.to_string());
        self
    }

    /// Listing `id`'s children fails with a credential error.
    pub fn fail_auth(mut self, id: &str) -> Self {
        self.fatal.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn is_parent(&self, id: &str) -> bool {
        self.children.contains_key(id) || self.denied.contains(id) || self.fatal.contains(id)
    }
}

#[async_trait::async_trait]
impl BlockTree for MemoryTree {
    async fn children(&self, block_id: &str) -> Result<Vec<RawBlock>, TreeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fatal.contains(block_id) {
            return Err(TreeError::Fatal(format!("401 on {block_id}")));
        }
        if self.denied.contains(block_id) {
            return Err(TreeError::Inaccessible(format!("403 on {block_id}")));
        }
        let kids = self.children.get(block_id).cloned().unwrap_or_default();
        Ok(kids
            .into_iter()
            .map(|mut b| {
                b.has_children = b.has_children || self.is_parent(&b.id);
                b
            })
            .collect())
    }
}
