use dsr_schemas::ConditionValue;

use crate::block::{Block, BlockKind};

/// Leading markers editors put in front of a condition's value. Only the
/// first matching entry is removed.
const VALUE_PREFIXES: &[&str] = &[
    "> Value Below \u{1F53B}",
    "Value Below \u{1F53B}",
    "> Value Below",
    "Value Below",
    "\u{1F53B}",
    "> \u{1F53B}",
];

const TOGGLE_MARKER: &str = "[toggle]";
const CONDITION_TOKEN: &str = "condition ";

/// Result of scanning one flattened subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reduced {
    pub parameter: String,
    pub conditions: Vec<ConditionValue>,
}

/// Linear scan over a flattened subtree.
///
/// Only toggles carry structure: a toggle starting with `parameter_label`
/// names the parameter (text after the first colon); a toggle containing
/// "condition" opens a condition whose body is every following block deeper
/// than it. Body blocks are consumed and never reinterpreted as conditions.
pub fn reduce(blocks: &[Block], parameter_label: &str) -> Reduced {
    let label = parameter_label.trim().to_lowercase();
    let mut out = Reduced::default();

    let mut i = 0;
    while i < blocks.len() {
        let blk = &blocks[i];
        let text = blk.text.trim();
        let lower = text.to_lowercase();

        if blk.kind == BlockKind::Toggle && lower.starts_with(&label) {
            if let Some((_, name)) = text.split_once(':') {
                out.parameter = name.trim().to_string();
            }
        } else if blk.kind == BlockKind::Toggle && lower.contains("condition") {
            let end = body_end(blocks, i);
            out.conditions.push(ConditionValue::new(
                condition_text(text),
                render_body(&blocks[i + 1..end]),
            ));
            i = end;
            continue;
        }
        i += 1;
    }
    out
}

/// Index one past the last descendant of `blocks[start]`.
fn body_end(blocks: &[Block], start: usize) -> usize {
    let depth = blocks[start].depth;
    let mut j = start + 1;
    while j < blocks.len() && blocks[j].depth > depth {
        j += 1;
    }
    j
}

fn condition_text(text: &str) -> String {
    let cleaned = text.replace(TOGGLE_MARKER, "");
    let cleaned = cleaned.trim();
    let head = cleaned.get(..CONDITION_TOKEN.len());
    match head {
        Some(h) if h.eq_ignore_ascii_case(CONDITION_TOKEN) => {
            cleaned[CONDITION_TOKEN.len()..].trim().to_string()
        }
        _ => cleaned.to_string(),
    }
}

fn render_body(body: &[Block]) -> String {
    let mut lines = Vec::new();
    let mut number = 1;
    for blk in body {
        let text = blk.text.trim();
        if text.is_empty() {
            continue;
        }
        match blk.kind {
            BlockKind::NumberedListItem => {
                lines.push(format!("{number}. {text}"));
                number += 1;
            }
            BlockKind::BulletedListItem => lines.push(format!("- {text}")),
            _ => lines.push(text.to_string()),
        }
    }
    clean_value_text(&lines.join("\n"))
}

/// Strip the first known value marker, then trim.
pub fn clean_value_text(text: &str) -> String {
    let trimmed = text.trim_start();
    for prefix in VALUE_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    text.trim().to_string()
}
