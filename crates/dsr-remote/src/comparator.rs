//! Messages-API comparator. Every failure is folded into the returned text;
//! `compare` never errors.

use std::time::Duration;

use dsr_reconcile::Comparator;
use dsr_schemas::ParameterRecord;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::error::preview;

/// Reply the prompt asks for when the two records agree.
pub const NO_DIFFERENCES: &str = "No significant functional differences found.";

const PROMPT_HEAD: &str = "\
# JSON Configuration Semantic Comparison

You compare two parameter configurations and report ONLY semantic differences \
that would change runtime behaviour.

ANALYZE ONLY:
- Conditional branches present on one side but not the other
- Different values for the same condition
- Missing conditions that would route or process differently

IGNORE:
- Bracket types, escape characters, JSON formatting and ordering
- Naming of prompts or variables, condition order when logically equivalent
- Empty or trivial 'else' entries (empty values, a lone '.', whitespace)

RULES:
1. If there are no functional differences, reply exactly: 'No significant functional differences found.'
2. Otherwise list each difference as a bullet starting with * .
";

#[derive(Debug, Clone)]
pub struct ComparatorConfig {
    pub base_url: String,
    pub api_version: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub document_label: String,
    pub rule_label: String,
}

#[derive(Clone)]
pub struct MessagesComparator {
    http: reqwest::Client,
    cfg: ComparatorConfig,
    api_key: String,
}

impl std::fmt::Debug for MessagesComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagesComparator")
            .field("base_url", &self.cfg.base_url)
            .field("model", &self.cfg.model)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl MessagesComparator {
    pub fn new(cfg: ComparatorConfig, api_key: impl Into<String>) -> Result<Self, crate::RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| crate::RemoteError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            cfg: ComparatorConfig {
                base_url: cfg.base_url.trim_end_matches('/').to_string(),
                ..cfg
            },
            api_key: api_key.into(),
        })
    }

    /// Prompt with both records pretty-printed.
    pub fn build_prompt(&self, document: &ParameterRecord, rule: &ParameterRecord) -> String {
        build_prompt(&self.cfg.document_label, &self.cfg.rule_label, document, rule)
    }

    async fn call(&self, prompt: String) -> Result<String, reqwest::Error> {
        let body = json!({
            "model": self.cfg.model,
            "max_tokens": self.cfg.max_tokens,
            "temperature": self.cfg.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let resp = self
            .http
            .post(format!("{}/messages", self.cfg.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.cfg.api_version)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if status != 200 {
            warn!(status, body = %preview(&text, 200), "comparator returned non-200");
            return Ok(format!("API Error {status}: {}", preview(&text, 100)));
        }
        Ok(first_text_block(&text).unwrap_or_else(|| "[Unexpected comparator response]".into()))
    }
}

pub fn build_prompt(
    document_label: &str,
    rule_label: &str,
    document: &ParameterRecord,
    rule: &ParameterRecord,
) -> String {
    let pretty = |r: &ParameterRecord| {
        serde_json::to_string_pretty(r).unwrap_or_else(|_| "{}".to_string())
    };
    format!(
        "{PROMPT_HEAD}\n## COMPARISON TASK\n\n\
         {} JSON (Reference):\n```json\n{}\n```\n\n\
         {} JSON (Target):\n```json\n{}\n```\n",
        document_label.to_uppercase(),
        pretty(document),
        rule_label.to_uppercase(),
        pretty(rule),
    )
}

/// `content[0].text`, trimmed.
fn first_text_block(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    let text = v.get("content")?.as_array()?.first()?.get("text")?;
    Some(text.as_str().unwrap_or_default().trim().to_string())
}

#[async_trait::async_trait]
impl Comparator for MessagesComparator {
    fn name(&self) -> &str {
        "messages"
    }

    async fn compare(&self, document: &ParameterRecord, rule: &ParameterRecord) -> String {
        let prompt = self.build_prompt(document, rule);
        match self.call(prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, parameter = %document.parameter, "comparator call failed");
                format!("Error calling comparator: {e}")
            }
        }
    }
}
