//! In-memory rule-engine API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dsr_remote::{
    ExprNode, RawCondition, RawRule, RemoteError, RuleApi, RuleListing, RuleQuery, RuleSummary,
};
use serde_json::Value;

/// Entries are listed in insertion order; `list_page` honours the query's
/// page size and name filter.
#[derive(Debug, Default)]
pub struct FakeRuleApi {
    rules: Vec<RawRule>,
    list_error: Option<RemoteError>,
    failing: HashMap<i64, RemoteError>,
    flaky: Mutex<HashMap<i64, u32>>,
    detail_delay: Duration,
    queries: Mutex<Vec<(RuleQuery, u32)>>,
    detail_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRuleApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// `rule.id` must be set.
    pub fn with_rule(mut self, rule: RawRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_list_error(mut self, e: RemoteError) -> Self {
        self.list_error = Some(e);
        self
    }

    pub fn fail_detail(mut self, id: i64, e: RemoteError) -> Self {
        self.failing.insert(id, e);
        self
    }

    /// The first `failures` detail fetches of `id` are rate limited.
    pub fn flaky_detail(self, id: i64, failures: u32) -> Self {
        self.flaky
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, failures);
        self
    }

    /// Each detail fetch sleeps this long, so concurrent fetches overlap.
    pub fn with_detail_delay(mut self, d: Duration) -> Self {
        self.detail_delay = d;
        self
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    /// Highest number of detail fetches seen running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn seen_queries(&self) -> Vec<(RuleQuery, u32)> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn take_flaky(&self, id: i64) -> bool {
        let mut flaky = self.flaky.lock().unwrap_or_else(|e| e.into_inner());
        match flaky.get_mut(&id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl RuleApi for FakeRuleApi {
    async fn list_page(&self, query: &RuleQuery, page: u32) -> Result<RuleListing, RemoteError> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((query.clone(), page));
        if let Some(e) = &self.list_error {
            return Err(e.clone());
        }

        let needle = query.name_contains.to_lowercase();
        let matching: Vec<RuleSummary> = self
            .rules
            .iter()
            .filter(|r| r.name.to_lowercase().contains(&needle))
            .map(|r| RuleSummary {
                id: r.id.unwrap_or_default(),
                evaluation_type: r.evaluation_type.clone(),
            })
            .collect();

        let size = query.page_size.max(1) as usize;
        let items: Vec<RuleSummary> = matching
            .into_iter()
            .skip(page as usize * size)
            .take(size)
            .collect();
        let is_last_page = items.len() < size;
        Ok(RuleListing {
            items,
            is_last_page,
        })
    }

    async fn get(&self, id: i64) -> Result<RawRule, RemoteError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(e) = self.failing.get(&id) {
            return Err(e.clone());
        }
        if self.take_flaky(id) {
            return Err(RemoteError::Transient(format!("status 429 on rule {id}")));
        }
        self.rules
            .iter()
            .find(|r| r.id == Some(id))
            .cloned()
            .ok_or_else(|| RemoteError::Http {
                status: 404,
                message: format!("rule {id} not found"),
            })
    }
}

/// A single-comparison leaf, `$context.`-prefixed the way the engine stores
/// field names.
pub fn leaf(field: &str, op: &str, value: Value) -> ExprNode {
    ExprNode {
        leaf: true,
        field_name: Some(format!("$context.{field}")),
        operation: Some(op.to_string()),
        value: Some(value),
        ..ExprNode::default()
    }
}

/// An ERP-condition entry whose conditions are given in priority order.
pub fn erp_rule(
    id: i64,
    name: &str,
    conditions: &[(ExprNode, &str)],
    default_value: Option<&str>,
) -> RawRule {
    RawRule {
        id: Some(id),
        name: name.to_string(),
        evaluation_type: Some("ERP_CONDITION".to_string()),
        gpt_prompt_param_conditions: conditions
            .iter()
            .enumerate()
            .map(|(i, (expr, value))| RawCondition {
                priority: i as i64 + 1,
                expression: Some(expr.clone()),
                tree: None,
                value: Some(value.to_string()),
            })
            .collect(),
        gpt_prompt_param_api: None,
        default_value: default_value.map(str::to_string),
    }
}

/// An entry of an evaluation type the rule fetcher skips by default.
pub fn context_rule(id: i64, name: &str) -> RawRule {
    RawRule {
        id: Some(id),
        name: name.to_string(),
        evaluation_type: Some("CONTEXT".to_string()),
        ..RawRule::default()
    }
}
