//! Block-tree document source: database schema, filtered page listing and
//! block children.

use std::sync::Arc;
use std::time::Duration;

use dsr_extract::{page_title, BlockTree, RawBlock, TreeError};
use dsr_schemas::CancelToken;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{classify_document_status, RemoteError};
use crate::retry::{with_retry, RetryPolicy};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Checkbox,
    /// Option names in schema order.
    Status(Vec<String>),
    Select(Vec<String>),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySchema {
    pub name: String,
    pub kind: PropertyKind,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// A database entry as listed; `title` is already resolved from its
/// properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub id: String,
    pub title: String,
}

#[async_trait::async_trait]
pub trait DocumentApi: Send + Sync {
    async fn retrieve_schema(&self, database_id: &str) -> Result<Vec<PropertySchema>, RemoteError>;

    async fn query(
        &self,
        database_id: &str,
        filter: Option<&Value>,
        cursor: Option<&str>,
    ) -> Result<Listing<PageRef>, RemoteError>;

    async fn children_page(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Listing<RawBlock>, RemoteError>;
}

// ---------------------------------------------------------------------------
// Wire decoding
// ---------------------------------------------------------------------------

fn decode_schema(body: &Value) -> Result<Vec<PropertySchema>, RemoteError> {
    let props = body
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| RemoteError::Decode("database has no properties object".into()))?;

    Ok(props
        .iter()
        .map(|(name, prop)| {
            let type_name = prop.get("type").and_then(Value::as_str).unwrap_or("");
            let options = || -> Vec<String> {
                prop.get(type_name)
                    .and_then(|t| t.get("options"))
                    .and_then(Value::as_array)
                    .map(|opts| {
                        opts.iter()
                            .filter_map(|o| o.get("name").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default()
            };
            let kind = match type_name {
                "checkbox" => PropertyKind::Checkbox,
                "status" => PropertyKind::Status(options()),
                "select" => PropertyKind::Select(options()),
                _ => PropertyKind::Other,
            };
            PropertySchema {
                name: name.clone(),
                kind,
            }
        })
        .collect())
}

fn decode_listing<T>(body: &Value, item: impl Fn(&Value) -> T) -> Result<Listing<T>, RemoteError> {
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| RemoteError::Decode("listing has no results array".into()))?;
    Ok(Listing {
        items: results.iter().map(item).collect(),
        has_more: body.get("has_more").and_then(Value::as_bool).unwrap_or(false),
        next_cursor: body
            .get("next_cursor")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn decode_page(v: &Value) -> PageRef {
    let title = v
        .get("properties")
        .and_then(Value::as_object)
        .map(page_title)
        .unwrap_or_else(|| "Untitled".to_string());
    PageRef {
        id: v.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
        title,
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Bearer-token client for the block-tree API.
///
/// The token is passed in by the caller; do not log it.
#[derive(Clone)]
pub struct HttpDocumentClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    token: String,
    page_size: u32,
}

impl std::fmt::Debug for HttpDocumentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDocumentClient")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("token", &"<REDACTED>")
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl HttpDocumentClient {
    pub fn new(
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        token: impl Into<String>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            token: token.into(),
            page_size,
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let resp = req
            .bearer_auth(&self.token)
            .header("Notion-Version", &self.api_version)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_document_status(status, &body));
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait::async_trait]
impl DocumentApi for HttpDocumentClient {
    async fn retrieve_schema(&self, database_id: &str) -> Result<Vec<PropertySchema>, RemoteError> {
        let url = format!("{}/databases/{}", self.base_url, database_id);
        let body = self.send(self.http.get(url)).await?;
        decode_schema(&body)
    }

    async fn query(
        &self,
        database_id: &str,
        filter: Option<&Value>,
        cursor: Option<&str>,
    ) -> Result<Listing<PageRef>, RemoteError> {
        let url = format!("{}/databases/{}/query", self.base_url, database_id);
        let mut payload = json!({ "page_size": self.page_size });
        if let Some(f) = filter {
            payload["filter"] = f.clone();
        }
        if let Some(c) = cursor {
            payload["start_cursor"] = json!(c);
        }
        let body = self.send(self.http.post(url).json(&payload)).await?;
        decode_listing(&body, decode_page)
    }

    async fn children_page(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Listing<RawBlock>, RemoteError> {
        let url = format!("{}/blocks/{}/children", self.base_url, block_id);
        let mut query = vec![("page_size", self.page_size.to_string())];
        if let Some(c) = cursor {
            query.push(("start_cursor", c.to_string()));
        }
        let body = self.send(self.http.get(url).query(&query)).await?;
        decode_listing(&body, RawBlock::from_api_json)
    }
}

// ---------------------------------------------------------------------------
// BlockTree adapter
// ---------------------------------------------------------------------------

/// Presents a [`DocumentApi`] as a [`BlockTree`]: walks all children pages
/// of a node, retrying transient failures per page.
///
/// A failure after some pages were read keeps what was gathered. Once the
/// run is cancelled no further children page is requested.
#[derive(Clone)]
pub struct ApiBlockTree {
    api: Arc<dyn DocumentApi>,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl ApiBlockTree {
    pub fn new(api: Arc<dyn DocumentApi>, retry: RetryPolicy, cancel: CancelToken) -> Self {
        Self { api, retry, cancel }
    }
}

#[async_trait::async_trait]
impl BlockTree for ApiBlockTree {
    async fn children(&self, block_id: &str) -> Result<Vec<RawBlock>, TreeError> {
        let mut out: Vec<RawBlock> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let api = &self.api;
            let cur = cursor.clone();
            let page = with_retry(&self.retry, "block children", &self.cancel, |_| {
                let cur = cur.clone();
                async move { api.children_page(block_id, cur.as_deref()).await }
            })
            .await;

            let page = match page {
                Ok(p) => p,
                Err(e) if e.is_fatal() => return Err(TreeError::Fatal(e.to_string())),
                Err(RemoteError::Cancelled) => {
                    debug!(block_id = %block_id, kept = out.len(), "children listing cancelled");
                    return Ok(out);
                }
                Err(e) if out.is_empty() => {
                    return Err(match e {
                        RemoteError::Transient(msg) => TreeError::Transient(msg),
                        other => TreeError::Inaccessible(other.to_string()),
                    });
                }
                Err(e) => {
                    warn!(block_id = %block_id, kept = out.len(), error = %e, "children listing cut short");
                    return Ok(out);
                }
            };

            out.extend(page.items);
            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        debug!(block_id = %block_id, children = out.len(), "children listed");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> HttpDocumentClient {
        HttpDocumentClient::new(server.base_url(), "2022-06-28", "tok", 100, Duration::from_secs(5))
            .unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn schema_decodes_property_kinds() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/databases/db1")
                    .header("Notion-Version", "2022-06-28")
                    .header("authorization", "Bearer tok");
                then.status(200).json_body(json!({
                    "properties": {
                        "To be Validated": { "type": "checkbox", "checkbox": {} },
                        "Technical Validated": { "type": "status", "status": {
                            "options": [{ "name": "Done" }, { "name": "Pending" }]
                        }},
                        "Name": { "type": "title", "title": {} }
                    }
                }));
            })
            .await;

        let mut schema = client(&server).retrieve_schema("db1").await.unwrap();
        schema.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(schema[0].kind, PropertyKind::Other);
        assert_eq!(
            schema[1].kind,
            PropertyKind::Status(vec!["Done".into(), "Pending".into()])
        );
        assert_eq!(schema[2].kind, PropertyKind::Checkbox);
    }

    #[tokio::test]
    async fn query_sends_filter_and_reads_titles() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/databases/db1/query")
                    .json_body(json!({
                        "page_size": 100,
                        "filter": { "property": "Flag", "checkbox": { "equals": true } }
                    }));
                then.status(200).json_body(json!({
                    "results": [{
                        "id": "p1",
                        "properties": { "Name": { "type": "title", "title": [
                            { "type": "text", "text": { "content": "Client Type" } }
                        ]}}
                    }],
                    "has_more": true,
                    "next_cursor": "c2"
                }));
            })
            .await;

        let filter = json!({"property": "Flag", "checkbox": {"equals": true}});
        let listing = client(&server)
            .query("db1", Some(&filter), None)
            .await
            .unwrap();
        m.assert_async().await;
        assert_eq!(listing.items, vec![PageRef { id: "p1".into(), title: "Client Type".into() }]);
        assert!(listing.has_more);
        assert_eq!(listing.next_cursor.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn children_follow_cursor_across_pages() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/blocks/b1/children")
                    .query_param("start_cursor", "next");
                then.status(200).json_body(json!({
                    "results": [{ "id": "c2", "type": "paragraph", "paragraph": { "rich_text": [] } }],
                    "has_more": false,
                    "next_cursor": null
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/blocks/b1/children")
                    .query_param_missing("start_cursor");
                then.status(200).json_body(json!({
                    "results": [{ "id": "c1", "type": "toggle", "has_children": true,
                                  "toggle": { "rich_text": [] } }],
                    "has_more": true,
                    "next_cursor": "next"
                }));
            })
            .await;

        let tree = ApiBlockTree::new(Arc::new(client(&server)), fast_retry(), CancelToken::new());
        let kids = tree.children("b1").await.unwrap();
        let ids: Vec<&str> = kids.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(kids[0].has_children);
    }

    #[tokio::test]
    async fn forbidden_children_are_inaccessible() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/blocks/locked/children");
                then.status(403).body("restricted");
            })
            .await;
        let tree = ApiBlockTree::new(Arc::new(client(&server)), fast_retry(), CancelToken::new());
        assert!(matches!(
            tree.children("locked").await,
            Err(TreeError::Inaccessible(_))
        ));
    }

    #[tokio::test]
    async fn unauthorized_children_are_fatal() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/blocks/b1/children");
                then.status(401).body("bad token");
            })
            .await;
        let tree = ApiBlockTree::new(Arc::new(client(&server)), fast_retry(), CancelToken::new());
        assert!(matches!(tree.children("b1").await, Err(TreeError::Fatal(_))));
    }

    #[tokio::test]
    async fn rate_limited_children_are_retried_up_to_ceiling() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET).path("/blocks/b1/children");
                then.status(429).body("slow down");
            })
            .await;
        let tree = ApiBlockTree::new(Arc::new(client(&server)), fast_retry(), CancelToken::new());
        assert!(matches!(tree.children("b1").await, Err(TreeError::Transient(_))));
        m.assert_calls_async(3).await;
    }

    #[tokio::test]
    async fn cancelled_tree_requests_nothing() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET).path("/blocks/b1/children");
                then.status(200).json_body(json!({ "results": [], "has_more": false }));
            })
            .await;
        let cancel = CancelToken::new();
        cancel.cancel();
        let tree = ApiBlockTree::new(Arc::new(client(&server)), fast_retry(), cancel);
        assert_eq!(tree.children("b1").await.unwrap(), Vec::new());
        m.assert_calls_async(0).await;
    }
}
