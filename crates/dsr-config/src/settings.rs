//! Typed pipeline settings.
//!
//! Every section is optional in YAML; missing keys fall back to the defaults
//! below. [`PipelineConfig::from_json`] validates the few values that would
//! otherwise wedge a run (zero workers, zero chunk size, zero attempts).

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub document_source: DocumentSourceSettings,
    pub rule_source: RuleSourceSettings,
    pub comparator: ComparatorSettings,
    pub report: ReportSettings,
    pub labels: LabelSettings,
    pub pipeline: PipelineSettings,
    pub daemon: DaemonSettings,
}

impl PipelineConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: PipelineConfig =
            serde_json::from_value(v.clone()).context("config does not match pipeline schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.report.chunk_chars == 0 {
            bail!("CONFIG_INVALID: report.chunk_chars must be > 0");
        }
        if self.document_source.workers == 0 || self.rule_source.workers == 0 {
            bail!("CONFIG_INVALID: source workers must be > 0");
        }
        if self.document_source.max_attempts == 0 || self.rule_source.max_attempts == 0 {
            bail!("CONFIG_INVALID: source max_attempts must be > 0");
        }
        if self.document_source.page_size == 0 || self.rule_source.page_size == 0 {
            bail!("CONFIG_INVALID: source page_size must be > 0");
        }
        if let Some(db) = &self.document_source.database {
            parse_database_id(db)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Document source (block-tree pages)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSourceSettings {
    pub enabled: bool,
    pub base_url: String,
    pub api_version: String,
    /// Database URL or bare id. `None` skips the document source unless a
    /// trigger supplies one.
    pub database: Option<String>,
    pub token_env: String,
    /// Text prefix (case-insensitive) of the anchor block.
    pub anchor_phrase: String,
    /// Label (case-insensitive) of the toggle carrying the parameter name.
    pub parameter_label: String,
    /// Property that must be truthy for a page to be included.
    pub include_flag: String,
    /// Property that must be falsy for a page to be included.
    pub exclude_flag: String,
    pub workers: usize,
    pub unit_delay_ms: u64,
    pub page_size: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for DocumentSourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.notion.com/v1".to_string(),
            api_version: "2022-06-28".to_string(),
            database: None,
            token_env: "NOTION_TOKEN".to_string(),
            anchor_phrase: "technical ecp".to_string(),
            parameter_label: "technical ecp parameter name".to_string(),
            include_flag: "to be validated".to_string(),
            exclude_flag: "technical validated".to_string(),
            workers: 2,
            unit_delay_ms: 100,
            page_size: 100,
            max_attempts: 5,
            backoff_base_ms: 2000,
            request_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Rule source (paginated rule engine)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSourceSettings {
    pub enabled: bool,
    pub base_url: String,
    pub token_env: String,
    /// Name filter for the listing. `None` skips the rule source unless a
    /// trigger supplies one.
    pub prompt_name: Option<String>,
    /// Lower bound on creation date, `YYYY-MM-DD HH:MM:SS`.
    pub created_after: String,
    pub page_size: u32,
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Entries with this evaluation type are never fetched.
    pub excluded_evaluation_type: String,
    pub field_renames: BTreeMap<String, String>,
    pub list_page_code: Option<String>,
    pub detail_page_code: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RuleSourceSettings {
    fn default() -> Self {
        let mut field_renames = BTreeMap::new();
        field_renames.insert("maidType".to_string(), "Client_Type".to_string());
        Self {
            enabled: true,
            base_url: String::new(),
            token_env: "ERP_AUTH_TOKEN".to_string(),
            prompt_name: None,
            created_after: "2025-05-01 12:17:57".to_string(),
            page_size: 100,
            workers: 5,
            max_attempts: 3,
            backoff_base_ms: 1000,
            excluded_evaluation_type: "CONTEXT".to_string(),
            field_renames,
            list_page_code: None,
            detail_page_code: None,
            request_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Comparator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorSettings {
    pub base_url: String,
    pub api_key_env: String,
    pub api_version: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ComparatorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            api_version: "2023-06-01".to_string(),
            model: "claude-3-sonnet-20240229".to_string(),
            max_tokens: 1024,
            temperature: 0.1,
            timeout_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Remote sheet service. `None` writes the local workbook directly.
    pub sink_url: Option<String>,
    pub sink_token_env: Option<String>,
    pub fallback_path: String,
    /// Upper bound on characters per report cell.
    pub chunk_chars: usize,
    pub title_prefix: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            sink_url: None,
            sink_token_env: None,
            fallback_path: "comparison_results.xlsx".to_string(),
            chunk_chars: 45_000,
            title_prefix: "Dual-Source Parameter Comparison".to_string(),
        }
    }
}

/// Display names of the two sources, used in headers, banners and
/// missing-side sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    pub document: String,
    pub rule: String,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            document: "Document".to_string(),
            rule: "Rule".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Fetch both sources at the same time instead of one after the other.
    pub concurrent_sources: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub addr: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database reference parsing
// ---------------------------------------------------------------------------

/// Extract a 32-hex database id from a share URL or a bare (optionally
/// dashed) id.
///
/// For URLs the last path segment carrying at least 32 characters wins; the
/// query string and dashes are dropped and the trailing 32 characters are
/// taken, so titled links (`My-DB-<id>`) resolve to the id.
pub fn parse_database_id(input: &str) -> Result<String> {
    let s = input.trim();

    let candidate = if s.contains('/') {
        s.split('/')
            .rev()
            .map(|part| part.split('?').next().unwrap_or(""))
            .map(|part| part.replace('-', ""))
            .find(|part| part.len() >= 32)
    } else {
        Some(s.split('?').next().unwrap_or("").replace('-', ""))
    };

    let Some(candidate) = candidate else {
        bail!("invalid database reference '{}': no 32-character id segment", s);
    };
    if candidate.len() < 32 {
        bail!("invalid database reference '{}': id must be 32 characters", s);
    }

    let id = &candidate[candidate.len() - 32..];
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid database reference '{}': id is not hexadecimal", s);
    }
    Ok(id.to_ascii_lowercase())
}
