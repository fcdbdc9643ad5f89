//! Raw rule-engine entries into [`ParameterRecord`]s.

use std::collections::BTreeMap;

use dsr_remote::{ExprNode, RawCondition, RawRule};
use dsr_schemas::{ConditionValue, ParameterRecord};
use serde_json::Value;
use tracing::warn;

const CONTEXT_PREFIX: &str = "$context.";

fn normalize_op(op: &str) -> String {
    let op = op.to_uppercase();
    match op.as_str() {
        "=" => "==".to_string(),
        _ => op,
    }
}

/// Scalars render the way the rule engine's own condition listing shows
/// them: a missing value as `None`, booleans capitalised.
fn render_value(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::Bool(true)) => "True".to_string(),
        Some(Value::Bool(false)) => "False".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Infix rendering of an expression tree.
///
/// Leaves render as `field OP value`, or `field OP` for the `IS ...` null
/// checks; binary nodes as `( left LOGIC right )`.
pub fn render_expr(node: &ExprNode, renames: &BTreeMap<String, String>) -> String {
    match (&node.left, &node.right) {
        (Some(left), Some(right)) if !node.leaf => {
            let logic = node
                .logical_operator
                .as_deref()
                .unwrap_or_default()
                .to_uppercase();
            format!(
                "( {} {} {} )",
                render_expr(left, renames),
                logic,
                render_expr(right, renames)
            )
        }
        _ => {
            let raw = node.field_name.as_deref().unwrap_or_default();
            let field = raw.strip_prefix(CONTEXT_PREFIX).unwrap_or(raw);
            let field = renames.get(field).map(String::as_str).unwrap_or(field);
            let op = normalize_op(node.operation.as_deref().unwrap_or_default());
            if op.starts_with("IS") {
                format!("{field} {op}")
            } else {
                format!("{field} {op} {}", render_value(node.value.as_ref()))
            }
        }
    }
}

/// The condition's tree: the inline expression when present and non-empty,
/// else the JSON-encoded `tree`.
fn condition_tree(cond: &RawCondition) -> ExprNode {
    if let Some(expr) = &cond.expression {
        if *expr != ExprNode::default() {
            return expr.clone();
        }
    }
    match cond.tree.as_deref() {
        Some(tree) if !tree.trim().is_empty() => serde_json::from_str(tree).unwrap_or_else(|e| {
            warn!(error = %e, "condition tree is not valid JSON; rendered empty");
            ExprNode::default()
        }),
        _ => ExprNode::default(),
    }
}

/// Conditions ordered by priority, then a trailing `else` for a non-blank
/// default value.
pub fn normalize_rule(raw: &RawRule, renames: &BTreeMap<String, String>) -> ParameterRecord {
    let mut conditions: Vec<&RawCondition> = match raw.evaluation_type.as_deref() {
        Some("ERP_CONDITION") => raw.gpt_prompt_param_conditions.iter().collect(),
        Some("API") => raw
            .gpt_prompt_param_api
            .as_ref()
            .map(|api| api.gpt_conditions.iter().collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    conditions.sort_by_key(|c| c.priority);

    let mut logic: Vec<ConditionValue> = conditions
        .into_iter()
        .map(|c| {
            ConditionValue::new(
                render_expr(&condition_tree(c), renames),
                c.value.as_deref().unwrap_or_default().trim(),
            )
        })
        .collect();

    if let Some(default) = raw.default_value.as_deref() {
        let default = default.trim();
        if !default.is_empty() {
            logic.push(ConditionValue::fallback(default));
        }
    }

    ParameterRecord::new(raw.name.clone(), raw.name.clone(), logic)
}
