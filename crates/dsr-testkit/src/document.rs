//! In-memory document API.
//!
//! Pages, the schema and block children live in plain maps. Failures are
//! injected per block: a permanent error, or a number of transient failures
//! before the listing succeeds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use dsr_extract::{BlockKind, RawBlock};
use dsr_remote::{DocumentApi, Listing, PageRef, PropertyKind, PropertySchema, RemoteError};
use serde_json::Value;

const DEFAULT_LISTING_SIZE: usize = 100;

#[derive(Debug, Default)]
pub struct FakeDocumentApi {
    schema: Vec<PropertySchema>,
    schema_error: Option<RemoteError>,
    pages: Vec<PageRef>,
    listing_size: usize,
    children: HashMap<String, Vec<RawBlock>>,
    failing: HashMap<String, RemoteError>,
    flaky: Mutex<HashMap<String, u32>>,
    filters: Mutex<Vec<Option<Value>>>,
    children_calls: AtomicUsize,
}

impl FakeDocumentApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// The usual two flag columns as checkboxes.
    pub fn with_flag_schema(self) -> Self {
        self.with_schema(vec![
            PropertySchema {
                name: "To be validated".to_string(),
                kind: PropertyKind::Checkbox,
            },
            PropertySchema {
                name: "Technical validated".to_string(),
                kind: PropertyKind::Checkbox,
            },
        ])
    }

    pub fn with_schema(mut self, schema: Vec<PropertySchema>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_schema_error(mut self, e: RemoteError) -> Self {
        self.schema_error = Some(e);
        self
    }

    /// Pages returned per query call; the rest follow behind a cursor.
    pub fn with_listing_size(mut self, n: usize) -> Self {
        self.listing_size = n;
        self
    }

    pub fn with_children(mut self, parent: &str, children: Vec<RawBlock>) -> Self {
        self.children.insert(parent.to_string(), children);
        self
    }

    /// A page without any anchor section.
    pub fn with_plain_page(mut self, page_id: &str, title: &str) -> Self {
        self.pages.push(page_ref(page_id, title));
        self.with_children(
            page_id,
            vec![RawBlock::new(format!("{page_id}-intro"), BlockKind::Paragraph, "Overview")],
        )
    }

    /// A page laid out the way editors write parameters: an anchor toggle
    /// holding the parameter-name toggle and one toggle per condition whose
    /// body is a numbered list.
    pub fn with_parameter_page(
        mut self,
        page_id: &str,
        title: &str,
        parameter: &str,
        conditions: &[(&str, &[&str])],
    ) -> Self {
        self.pages.push(page_ref(page_id, title));
        let anchor = format!("{page_id}-anchor");

        let mut anchor_children = vec![RawBlock::new(
            format!("{page_id}-name"),
            BlockKind::Toggle,
            format!("Technical ECP Parameter Name: {parameter}"),
        )];
        let mut bodies = Vec::new();
        for (i, (condition, values)) in conditions.iter().enumerate() {
            let cid = format!("{page_id}-c{i}");
            anchor_children.push(RawBlock::new(
                cid.as_str(),
                BlockKind::Toggle,
                format!("Condition {condition}"),
            ));
            let mut body = vec![RawBlock::new(
                format!("{cid}-marker"),
                BlockKind::Paragraph,
                "Value Below \u{1F53B}",
            )];
            body.extend(values.iter().enumerate().map(|(j, v)| {
                RawBlock::new(format!("{cid}-v{j}"), BlockKind::NumberedListItem, *v)
            }));
            bodies.push((cid, body));
        }

        self = self
            .with_children(
                page_id,
                vec![
                    RawBlock::new(format!("{page_id}-intro"), BlockKind::Paragraph, "Overview"),
                    RawBlock::new(anchor.as_str(), BlockKind::Toggle, "Technical ECP"),
                ],
            )
            .with_children(&anchor, anchor_children);
        for (cid, body) in bodies {
            self = self.with_children(&cid, body);
        }
        self
    }

    /// Every children listing of `block_id` fails with `e`.
    pub fn fail_children(mut self, block_id: &str, e: RemoteError) -> Self {
        self.failing.insert(block_id.to_string(), e);
        self
    }

    /// The first `failures` children listings of `block_id` are rate limited.
    pub fn flaky_children(self, block_id: &str, failures: u32) -> Self {
        self.flaky
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(block_id.to_string(), failures);
        self
    }

    /// Filters received by `query`, in call order.
    pub fn seen_filters(&self) -> Vec<Option<Value>> {
        self.filters.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn children_calls(&self) -> usize {
        self.children_calls.load(Ordering::SeqCst)
    }

    fn is_parent(&self, id: &str) -> bool {
        self.children.contains_key(id) || self.failing.contains_key(id)
    }

    fn take_flaky(&self, block_id: &str) -> bool {
        let mut flaky = self.flaky.lock().unwrap_or_else(|e| e.into_inner());
        match flaky.get_mut(block_id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

fn page_ref(id: &str, title: &str) -> PageRef {
    PageRef {
        id: id.to_string(),
        title: title.to_string(),
    }
}

#[async_trait::async_trait]
impl DocumentApi for FakeDocumentApi {
    async fn retrieve_schema(&self, _database_id: &str) -> Result<Vec<PropertySchema>, RemoteError> {
        match &self.schema_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.schema.clone()),
        }
    }

    async fn query(
        &self,
        _database_id: &str,
        filter: Option<&Value>,
        cursor: Option<&str>,
    ) -> Result<Listing<PageRef>, RemoteError> {
        self.filters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(filter.cloned());

        let size = if self.listing_size == 0 {
            DEFAULT_LISTING_SIZE
        } else {
            self.listing_size
        };
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + size).min(self.pages.len());
        let items = self.pages.get(start..end).unwrap_or_default().to_vec();
        let has_more = end < self.pages.len();
        Ok(Listing {
            items,
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        })
    }

    async fn children_page(
        &self,
        block_id: &str,
        _cursor: Option<&str>,
    ) -> Result<Listing<RawBlock>, RemoteError> {
        self.children_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.failing.get(block_id) {
            return Err(e.clone());
        }
        if self.take_flaky(block_id) {
            return Err(RemoteError::Transient(format!("status 429 on {block_id}")));
        }
        let items = self
            .children
            .get(block_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut b| {
                b.has_children = b.has_children || self.is_parent(&b.id);
                b
            })
            .collect();
        Ok(Listing {
            items,
            has_more: false,
            next_cursor: None,
        })
    }
}
