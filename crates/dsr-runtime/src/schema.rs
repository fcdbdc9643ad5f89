//! Query filter chosen from the discovered database schema.
//!
//! | include flag | exclude flag | filter                    |
//! |--------------|--------------|---------------------------|
//! | buildable    | buildable    | `and[include, exclude]`   |
//! | buildable    | absent       | `include`                 |
//! | anything else               || none (unfiltered query)   |

use dsr_remote::{PropertyKind, PropertySchema};
use serde_json::{json, Value};

const TRUTHY: &[&str] = &["true", "yes", "validated", "done", "complete"];
const FALSY: &[&str] = &["false", "no", "not validated", "pending", "incomplete"];

fn find<'a>(schema: &'a [PropertySchema], flag: &str) -> Option<&'a PropertySchema> {
    let want = flag.trim().to_lowercase();
    schema
        .iter()
        .find(|p| p.name.trim().to_lowercase() == want)
}

/// `checked` selects the "flag set" (true) or "flag clear" (false) form.
fn flag_filter(prop: &PropertySchema, checked: bool) -> Option<Value> {
    let (labels, fallback) = if checked {
        (TRUTHY, "True")
    } else {
        (FALSY, "False")
    };
    let pick = |options: &[String]| {
        options
            .iter()
            .find(|o| labels.contains(&o.to_lowercase().as_str()))
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    };
    match &prop.kind {
        PropertyKind::Checkbox => Some(json!({
            "property": prop.name,
            "checkbox": { "equals": checked }
        })),
        PropertyKind::Status(options) => Some(json!({
            "property": prop.name,
            "status": { "equals": pick(options) }
        })),
        PropertyKind::Select(options) => Some(json!({
            "property": prop.name,
            "select": { "equals": pick(options) }
        })),
        PropertyKind::Other => None,
    }
}

/// Filter for the page query, or `None` for an unfiltered listing.
pub fn build_filter(schema: &[PropertySchema], include_flag: &str, exclude_flag: &str) -> Option<Value> {
    let include = find(schema, include_flag);
    let exclude = find(schema, exclude_flag);
    match (include, exclude) {
        (Some(inc), Some(exc)) => {
            let (inc, exc) = (flag_filter(inc, true)?, flag_filter(exc, false)?);
            Some(json!({ "and": [inc, exc] }))
        }
        (Some(inc), None) => flag_filter(inc, true),
        _ => None,
    }
}
