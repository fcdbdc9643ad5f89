//! Runtime secret resolution.
//!
//! Config stores env var NAMES (`document_source.token_env`, ...). This module
//! reads their values once per run. `Debug` never prints a value and errors
//! name the variable, not its contents.

use anyhow::{bail, Result};

use crate::settings::PipelineConfig;

/// Credentials for one run. Absent or blank variables resolve to `None`.
#[derive(Clone)]
pub struct ResolvedSecrets {
    pub document_token: Option<String>,
    pub rule_token: Option<String>,
    pub comparator_key: Option<String>,
    pub sink_token: Option<String>,
    names: EnvNames,
}

#[derive(Debug, Clone)]
struct EnvNames {
    document: String,
    rule: String,
    comparator: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "document_token",
                &self.document_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field("rule_token", &self.rule_token.as_ref().map(|_| "<REDACTED>"))
            .field(
                "comparator_key",
                &self.comparator_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field("sink_token", &self.sink_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl ResolvedSecrets {
    /// Build directly from values; env names are only used in error text.
    pub fn from_values(
        document_token: Option<String>,
        rule_token: Option<String>,
        comparator_key: Option<String>,
        sink_token: Option<String>,
    ) -> Self {
        Self {
            document_token,
            rule_token,
            comparator_key,
            sink_token,
            names: EnvNames {
                document: "document token".to_string(),
                rule: "rule token".to_string(),
                comparator: "comparator key".to_string(),
            },
        }
    }

    pub fn require_document_token(&self) -> Result<&str> {
        match self.document_token.as_deref() {
            Some(v) => Ok(v),
            None => bail!("SECRET_MISSING: env var {} is unset or empty", self.names.document),
        }
    }

    pub fn require_rule_token(&self) -> Result<&str> {
        match self.rule_token.as_deref() {
            Some(v) => Ok(v),
            None => bail!("SECRET_MISSING: env var {} is unset or empty", self.names.rule),
        }
    }

    pub fn require_comparator_key(&self) -> Result<&str> {
        match self.comparator_key.as_deref() {
            Some(v) => Ok(v),
            None => bail!(
                "SECRET_MISSING: env var {} is unset or empty",
                self.names.comparator
            ),
        }
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Read every credential named in `cfg`. Never fails; callers decide which
/// ones are required via the `require_*` accessors.
pub fn resolve_secrets(cfg: &PipelineConfig) -> ResolvedSecrets {
    ResolvedSecrets {
        document_token: resolve_env(&cfg.document_source.token_env),
        rule_token: resolve_env(&cfg.rule_source.token_env),
        comparator_key: resolve_env(&cfg.comparator.api_key_env),
        sink_token: cfg.report.sink_token_env.as_deref().and_then(resolve_env),
        names: EnvNames {
            document: cfg.document_source.token_env.clone(),
            rule: cfg.rule_source.token_env.clone(),
            comparator: cfg.comparator.api_key_env.clone(),
        },
    }
}
