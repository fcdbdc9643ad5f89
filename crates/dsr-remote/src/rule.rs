//! Rule-engine source: paged id listing with a header-borne search filter,
//! and per-id detail fetch.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{classify_rule_status, RemoteError};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Server-side listing filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleQuery {
    /// `YYYY-MM-DD HH:MM:SS`; only entries created after this are listed.
    pub created_after: String,
    pub name_contains: String,
    pub page_size: u32,
}

impl RuleQuery {
    /// The filter expression sent in the `searchfilter` header.
    pub fn search_filter(&self) -> Value {
        json!({
            "and": true,
            "left": {
                "field": "G.creationDate",
                "operation": ">",
                "value": self.created_after,
                "fieldType": "timestamp",
                "required": false
            },
            "right": {
                "field": "P.name",
                "operation": "Contains",
                "value": self.name_contains,
                "fieldType": "string",
                "required": false
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSummary {
    pub id: i64,
    #[serde(default)]
    pub evaluation_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleListing {
    pub items: Vec<RuleSummary>,
    /// A page shorter than the requested size (or empty) is the last one.
    pub is_last_page: bool,
}

/// A boolean expression node; a leaf when `leaf` is set or a side is
/// missing.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExprNode {
    pub leaf: bool,
    pub field_name: Option<String>,
    pub operation: Option<String>,
    pub value: Option<Value>,
    pub logical_operator: Option<String>,
    pub left: Option<Box<ExprNode>>,
    pub right: Option<Box<ExprNode>>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCondition {
    pub priority: i64,
    pub expression: Option<ExprNode>,
    /// Same tree, JSON-encoded. Used when `expression` is absent or empty.
    pub tree: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawApiBlock {
    pub gpt_conditions: Vec<RawCondition>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawRule {
    pub id: Option<i64>,
    pub name: String,
    pub evaluation_type: Option<String>,
    pub gpt_prompt_param_conditions: Vec<RawCondition>,
    pub gpt_prompt_param_api: Option<RawApiBlock>,
    pub default_value: Option<String>,
}

#[async_trait::async_trait]
pub trait RuleApi: Send + Sync {
    /// `page` is 0-based.
    async fn list_page(&self, query: &RuleQuery, page: u32) -> Result<RuleListing, RemoteError>;

    async fn get(&self, id: i64) -> Result<RawRule, RemoteError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    content: Vec<RuleSummary>,
}

#[derive(Clone)]
pub struct HttpRuleClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    list_page_code: Option<String>,
    detail_page_code: Option<String>,
}

impl std::fmt::Debug for HttpRuleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRuleClient")
            .field("base_url", &self.base_url)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl HttpRuleClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(RemoteError::Config("rule source base_url is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
            list_page_code: None,
            detail_page_code: None,
        })
    }

    /// Optional `pagecode` header values some deployments require.
    pub fn with_page_codes(mut self, list: Option<String>, detail: Option<String>) -> Self {
        self.list_page_code = list;
        self.detail_page_code = detail;
        self
    }

    fn authed(&self, req: reqwest::RequestBuilder, page_code: Option<&str>) -> reqwest::RequestBuilder {
        let req = req
            .bearer_auth(&self.token)
            .header("accept", "application/json");
        match page_code {
            Some(code) => req.header("pagecode", code),
            None => req,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_rule_status(status, &body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RuleApi for HttpRuleClient {
    async fn list_page(&self, query: &RuleQuery, page: u32) -> Result<RuleListing, RemoteError> {
        let url = format!("{}/page/", self.base_url);
        let filter = query.search_filter().to_string();
        let req = self
            .http
            .get(url)
            .query(&[
                ("page", page.to_string()),
                ("size", query.page_size.to_string()),
                ("sort", "creationDate,DESC".to_string()),
                ("search", String::new()),
            ])
            .header("searchfilter", filter);
        let resp = self
            .authed(req, self.list_page_code.as_deref())
            .send()
            .await?;
        let body: PageBody = Self::read_json(resp).await?;
        let is_last_page = body.content.len() < query.page_size as usize;
        Ok(RuleListing {
            items: body.content,
            is_last_page,
        })
    }

    async fn get(&self, id: i64) -> Result<RawRule, RemoteError> {
        let url = format!("{}/{}", self.base_url, id);
        let resp = self
            .authed(self.http.get(url), self.detail_page_code.as_deref())
            .send()
            .await?;
        Self::read_json(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn query() -> RuleQuery {
        RuleQuery {
            created_after: "2025-05-01 12:17:57".into(),
            name_contains: "Doctors".into(),
            page_size: 2,
        }
    }

    fn client(server: &MockServer) -> HttpRuleClient {
        HttpRuleClient::new(server.base_url(), "tok", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn search_filter_shape() {
        let f = query().search_filter();
        assert_eq!(f["and"], true);
        assert_eq!(f["left"]["field"], "G.creationDate");
        assert_eq!(f["left"]["value"], "2025-05-01 12:17:57");
        assert_eq!(f["right"]["operation"], "Contains");
        assert_eq!(f["right"]["value"], "Doctors");
    }

    #[test]
    fn empty_base_url_is_config_error() {
        let err = HttpRuleClient::new("", "tok", Duration::from_secs(1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn full_page_is_not_last() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/page/")
                    .query_param("page", "0")
                    .query_param("size", "2")
                    .query_param("sort", "creationDate,DESC")
                    .header_exists("searchfilter")
                    .header("authorization", "Bearer tok");
                then.status(200).json_body(json!({
                    "content": [
                        { "id": 1, "evaluationType": "ERP_CONDITION" },
                        { "id": 2, "evaluationType": "CONTEXT" }
                    ]
                }));
            })
            .await;
        let listing = client(&server).list_page(&query(), 0).await.unwrap();
        m.assert_async().await;
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.items[1].evaluation_type.as_deref(), Some("CONTEXT"));
        assert!(!listing.is_last_page);
    }

    #[tokio::test]
    async fn short_page_is_last() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/page/");
                then.status(200).json_body(json!({ "content": [{ "id": 7 }] }));
            })
            .await;
        let listing = client(&server).list_page(&query(), 3).await.unwrap();
        assert!(listing.is_last_page);
        assert_eq!(listing.items[0].evaluation_type, None);
    }

    #[tokio::test]
    async fn forbidden_listing_is_auth_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/page/");
                then.status(403).body("expired");
            })
            .await;
        let err = client(&server).list_page(&query(), 0).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn detail_decodes_nested_expression() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/42");
                then.status(200).json_body(json!({
                    "id": 42,
                    "name": "Client Type",
                    "evaluationType": "ERP_CONDITION",
                    "defaultValue": " fallback ",
                    "gptPromptParamConditions": [{
                        "priority": 2,
                        "value": "b",
                        "expression": {
                            "logicalOperator": "and",
                            "left": { "leaf": true, "fieldName": "$context.maidType", "operation": "=", "value": "MAID" },
                            "right": { "leaf": true, "fieldName": "x", "operation": "is null" }
                        }
                    }]
                }));
            })
            .await;
        let raw = client(&server).get(42).await.unwrap();
        assert_eq!(raw.name, "Client Type");
        let cond = &raw.gpt_prompt_param_conditions[0];
        assert_eq!(cond.priority, 2);
        let expr = cond.expression.as_ref().unwrap();
        assert_eq!(expr.logical_operator.as_deref(), Some("and"));
        assert_eq!(
            expr.left.as_ref().unwrap().field_name.as_deref(),
            Some("$context.maidType")
        );
    }

    #[tokio::test]
    async fn detail_server_error_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/9");
                then.status(502).body("bad gateway");
            })
            .await;
        let err = client(&server).get(9).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
