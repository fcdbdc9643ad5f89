use serde::Deserialize;
use serde_json::{Map, Value};

/// Block types the reducer distinguishes. Everything else renders as plain
/// text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Toggle,
    NumberedListItem,
    BulletedListItem,
    Paragraph,
    Heading,
    Other,
}

impl BlockKind {
    pub fn from_type(s: &str) -> Self {
        match s {
            "toggle" => BlockKind::Toggle,
            "numbered_list_item" => BlockKind::NumberedListItem,
            "bulleted_list_item" => BlockKind::BulletedListItem,
            "paragraph" => BlockKind::Paragraph,
            "heading_1" | "heading_2" | "heading_3" => BlockKind::Heading,
            _ => BlockKind::Other,
        }
    }
}

/// A block as returned by one children listing, before depth is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub id: String,
    pub kind: BlockKind,
    pub text: String,
    pub has_children: bool,
}

impl RawBlock {
    pub fn new(id: impl Into<String>, kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
            has_children: false,
        }
    }

    pub fn with_children(mut self) -> Self {
        self.has_children = true;
        self
    }

    /// Decode one block object of the document API
    /// (`{"id", "type", "has_children", "<type>": {"rich_text": [...]}}`).
    ///
    /// Missing pieces decode as empty rather than failing: a block we cannot
    /// read simply contributes no text.
    pub fn from_api_json(v: &Value) -> Self {
        let id = v.get("id").and_then(Value::as_str).unwrap_or("").to_string();
        let type_name = v.get("type").and_then(Value::as_str).unwrap_or("");
        let has_children = v
            .get("has_children")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let text = v
            .get(type_name)
            .and_then(|body| body.get("rich_text"))
            .map(rich_text_from_value)
            .unwrap_or_default();

        Self {
            id,
            kind: BlockKind::from_type(type_name),
            text,
            has_children,
        }
    }
}

/// A block placed in the flattened pre-order sequence of one anchor subtree.
///
/// `depth` is relative to the anchor (anchor = 0). Descendants of a block are
/// exactly the contiguous run of following blocks with greater depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
    pub depth: usize,
    pub text: String,
    pub has_children: bool,
    pub parent_id: Option<String>,
}

impl Block {
    pub fn place(raw: RawBlock, depth: usize, parent_id: Option<String>) -> Self {
        Self {
            id: raw.id,
            kind: raw.kind,
            depth,
            text: raw.text,
            has_children: raw.has_children,
            parent_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Rich text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub content: String,
}

/// One run of a rich-text array.
#[derive(Debug, Clone, Deserialize)]
pub struct RichTextRun {
    #[serde(rename = "type", default = "default_run_type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextContent>,
    #[serde(default)]
    pub plain_text: String,
}

fn default_run_type() -> String {
    "text".to_string()
}

/// Concatenate runs: `text` runs contribute their content, every other kind
/// (mention, equation, ...) its precomputed display text.
pub fn concat_rich_text(runs: &[RichTextRun]) -> String {
    runs.iter()
        .map(|run| match run.kind.as_str() {
            "text" => run
                .text
                .as_ref()
                .map(|t| t.content.as_str())
                .unwrap_or(""),
            _ => run.plain_text.as_str(),
        })
        .collect()
}

fn rich_text_from_value(v: &Value) -> String {
    let runs: Vec<RichTextRun> = v
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|r| serde_json::from_value(r.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    concat_rich_text(&runs)
}

/// First non-empty title-type property of a page, or `"Untitled"`.
pub fn page_title(properties: &Map<String, Value>) -> String {
    for prop in properties.values() {
        if prop.get("type").and_then(Value::as_str) != Some("title") {
            continue;
        }
        let text = prop
            .get("title")
            .map(rich_text_from_value)
            .unwrap_or_default();
        let text = text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
    }
    "Untitled".to_string()
}

/// Provenance label for a record: title with spaces replaced by underscores.
pub fn identifier_from_title(title: &str) -> String {
    title.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mentions_and_equations_use_display_text() {
        let v = json!({
            "id": "b1",
            "type": "paragraph",
            "has_children": true,
            "paragraph": { "rich_text": [
                { "type": "text", "text": { "content": "see " }, "plain_text": "ignored" },
                { "type": "mention", "plain_text": "@Page" },
                { "type": "equation", "plain_text": " x+1" }
            ]}
        });
        let b = RawBlock::from_api_json(&v);
        assert_eq!(b.text, "see @Page x+1");
        assert_eq!(b.kind, BlockKind::Paragraph);
        assert!(b.has_children);
    }

    #[test]
    fn block_without_body_has_empty_text() {
        let b = RawBlock::from_api_json(&json!({ "id": "b2", "type": "divider" }));
        assert_eq!(b.text, "");
        assert_eq!(b.kind, BlockKind::Other);
        assert!(!b.has_children);
    }

    #[test]
    fn title_skips_empty_title_properties() {
        let props = json!({
            "Name": { "type": "title", "title": [
                { "type": "text", "text": { "content": "Client Type" } }
            ]},
            "Status": { "type": "status", "status": { "name": "Done" } }
        });
        let props = props.as_object().unwrap();
        assert_eq!(page_title(props), "Client Type");
        assert_eq!(identifier_from_title(&page_title(props)), "Client_Type");
    }

    #[test]
    fn missing_title_is_untitled() {
        let props = json!({ "Name": { "type": "title", "title": [] } });
        assert_eq!(page_title(props.as_object().unwrap()), "Untitled");
    }
}
