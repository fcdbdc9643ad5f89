//! Build a [`Pipeline`] from typed config, resolved secrets and per-run
//! overrides.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dsr_config::{parse_database_id, PipelineConfig, ResolvedSecrets};
use dsr_extract::ExtractOptions;
use dsr_reconcile::ReconcileOptions;
use dsr_remote::{
    ComparatorConfig, FallbackSink, HttpDocumentClient, HttpRuleClient, HttpSheetSink,
    MessagesComparator, ReportSink, RetryPolicy, RuleQuery, XlsxFileSink,
};
use tracing::info;

use crate::document_fetch::DocumentFetchConfig;
use crate::pipeline::{DocumentSource, Pipeline, PipelineOptions, RuleSource};
use crate::pool::PoolConfig;
use crate::rule_fetch::RuleFetchConfig;

const SINK_TIMEOUT: Duration = Duration::from_secs(120);

/// Inputs a caller may supply per run. Blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    /// Database URL or bare id.
    pub database: Option<String>,
    pub prompt_name: Option<String>,
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

impl RunOverrides {
    pub fn is_empty(&self) -> bool {
        non_blank(self.database.as_deref()).is_none()
            && non_blank(self.prompt_name.as_deref()).is_none()
    }
}

fn document_source(
    cfg: &PipelineConfig,
    secrets: &ResolvedSecrets,
    database: &str,
) -> Result<DocumentSource> {
    let ds = &cfg.document_source;
    let database_id = parse_database_id(database)?;
    let token = secrets.require_document_token()?;
    let client = HttpDocumentClient::new(
        ds.base_url.as_str(),
        ds.api_version.as_str(),
        token,
        ds.page_size,
        Duration::from_secs(ds.request_timeout_secs),
    )
    .context("document source client")?;
    Ok(DocumentSource {
        api: Arc::new(client),
        cfg: DocumentFetchConfig {
            database_id,
            include_flag: ds.include_flag.clone(),
            exclude_flag: ds.exclude_flag.clone(),
            extract: ExtractOptions {
                anchor_phrase: ds.anchor_phrase.clone(),
                parameter_label: ds.parameter_label.clone(),
            },
            pool: PoolConfig {
                workers: ds.workers,
                unit_delay: Duration::from_millis(ds.unit_delay_ms),
            },
            retry: RetryPolicy::new(ds.max_attempts, Duration::from_millis(ds.backoff_base_ms)),
        },
    })
}

fn rule_source(cfg: &PipelineConfig, secrets: &ResolvedSecrets, prompt: &str) -> Result<RuleSource> {
    let rs = &cfg.rule_source;
    let token = secrets.require_rule_token()?;
    let client = HttpRuleClient::new(
        rs.base_url.as_str(),
        token,
        Duration::from_secs(rs.request_timeout_secs),
    )
    .context("rule source client")?
    .with_page_codes(rs.list_page_code.clone(), rs.detail_page_code.clone());
    Ok(RuleSource {
        api: Arc::new(client),
        cfg: RuleFetchConfig {
            query: RuleQuery {
                created_after: rs.created_after.clone(),
                name_contains: prompt.to_string(),
                page_size: rs.page_size,
            },
            excluded_evaluation_type: rs.excluded_evaluation_type.clone(),
            field_renames: rs.field_renames.clone(),
            pool: PoolConfig {
                workers: rs.workers,
                unit_delay: Duration::ZERO,
            },
            retry: RetryPolicy::new(rs.max_attempts, Duration::from_millis(rs.backoff_base_ms)),
        },
    })
}

fn report_sink(cfg: &PipelineConfig, secrets: &ResolvedSecrets) -> Result<Arc<dyn ReportSink>> {
    let primary = match non_blank(cfg.report.sink_url.as_deref()) {
        Some(url) => {
            let sheet = HttpSheetSink::new(url, secrets.sink_token.clone(), SINK_TIMEOUT)
                .context("report sink client")?;
            Some(Arc::new(sheet) as Arc<dyn ReportSink>)
        }
        None => None,
    };
    let fallback = Arc::new(XlsxFileSink::new(cfg.report.fallback_path.as_str()));
    let sink: Arc<dyn ReportSink> = Arc::new(FallbackSink::new(primary, fallback));
    Ok(sink)
}

/// Wire every collaborator for one run.
///
/// A source takes part only when enabled and given an input (database for
/// the document source, prompt name for the rule source). A trigger that
/// names any input selects exactly the sources it names; the config inputs
/// apply only to a trigger that names none. At least one source must take
/// part. The comparator key is only required when both do.
pub fn build_pipeline(
    cfg: &PipelineConfig,
    secrets: &ResolvedSecrets,
    overrides: &RunOverrides,
) -> Result<Pipeline> {
    let (database, prompt) = if overrides.is_empty() {
        (
            non_blank(cfg.document_source.database.as_deref()),
            non_blank(cfg.rule_source.prompt_name.as_deref()),
        )
    } else {
        (
            non_blank(overrides.database.as_deref()),
            non_blank(overrides.prompt_name.as_deref()),
        )
    };

    let document = match database {
        Some(db) if cfg.document_source.enabled => Some(document_source(cfg, secrets, db)?),
        _ => None,
    };
    let rule = match prompt {
        Some(p) if cfg.rule_source.enabled => Some(rule_source(cfg, secrets, p)?),
        _ => None,
    };
    if document.is_none() && rule.is_none() {
        bail!("NO_SOURCE: at least one data source must be provided (database or prompt name)");
    }

    let key = if document.is_some() && rule.is_some() {
        secrets.require_comparator_key()?.to_string()
    } else {
        secrets.comparator_key.clone().unwrap_or_default()
    };
    let cs = &cfg.comparator;
    let comparator = MessagesComparator::new(
        ComparatorConfig {
            base_url: cs.base_url.clone(),
            api_version: cs.api_version.clone(),
            model: cs.model.clone(),
            max_tokens: cs.max_tokens,
            temperature: cs.temperature,
            timeout: Duration::from_secs(cs.timeout_secs),
            document_label: cfg.labels.document.clone(),
            rule_label: cfg.labels.rule.clone(),
        },
        key,
    )
    .context("comparator client")?;

    info!(
        document = document.is_some(),
        rule = rule.is_some(),
        concurrent = cfg.pipeline.concurrent_sources,
        "pipeline wired"
    );

    Ok(Pipeline::new(
        document,
        rule,
        Arc::new(comparator),
        report_sink(cfg, secrets)?,
        PipelineOptions {
            reconcile: ReconcileOptions {
                chunk_chars: cfg.report.chunk_chars,
                document_label: cfg.labels.document.clone(),
                rule_label: cfg.labels.rule.clone(),
            },
            title_prefix: cfg.report.title_prefix.clone(),
            concurrent_sources: cfg.pipeline.concurrent_sources,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = "https://www.notion.so/team/Params-0123456789abcdef0123456789abcdef?v=1";

    fn cfg() -> PipelineConfig {
        let mut c = PipelineConfig::default();
        c.rule_source.base_url = "https://erp.invalid/api/prompt-params".into();
        c
    }

    fn all_secrets() -> ResolvedSecrets {
        ResolvedSecrets::from_values(
            Some("doc".into()),
            Some("rule".into()),
            Some("key".into()),
            None,
        )
    }

    #[test]
    fn overrides_blank_means_empty() {
        let o = RunOverrides {
            database: Some("  ".into()),
            prompt_name: None,
        };
        assert!(o.is_empty());
    }

    #[test]
    fn no_inputs_is_refused() {
        let err = build_pipeline(&cfg(), &all_secrets(), &RunOverrides::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("NO_SOURCE"));
    }

    #[test]
    fn both_sources_wired_from_overrides() {
        let o = RunOverrides {
            database: Some(DB.into()),
            prompt_name: Some("Doctors".into()),
        };
        let p = build_pipeline(&cfg(), &all_secrets(), &o).unwrap();
        assert!(p.has_document_source());
        assert!(p.has_rule_source());
        assert_eq!(p.options().reconcile.chunk_chars, 45_000);
    }

    #[test]
    fn config_prompt_used_when_not_overridden() {
        let mut c = cfg();
        c.rule_source.prompt_name = Some("Nurses".into());
        let p = build_pipeline(&c, &all_secrets(), &RunOverrides::default()).unwrap();
        assert!(p.has_rule_source());
        assert!(!p.has_document_source());
    }

    #[test]
    fn database_only_trigger_skips_the_configured_prompt() {
        let mut c = cfg();
        c.rule_source.prompt_name = Some("Doctors".into());
        c.rule_source.base_url = String::new();
        let doc_only = ResolvedSecrets::from_values(Some("doc".into()), None, None, None);
        let o = RunOverrides {
            database: Some(DB.into()),
            prompt_name: None,
        };
        let p = build_pipeline(&c, &doc_only, &o).unwrap();
        assert!(p.has_document_source());
        assert!(!p.has_rule_source());
    }

    #[test]
    fn prompt_only_trigger_skips_the_configured_database() {
        let mut c = cfg();
        c.document_source.database = Some(DB.into());
        let rule_only = ResolvedSecrets::from_values(None, Some("rule".into()), None, None);
        let o = RunOverrides {
            database: None,
            prompt_name: Some("Nurses".into()),
        };
        let p = build_pipeline(&c, &rule_only, &o).unwrap();
        assert!(!p.has_document_source());
        assert!(p.has_rule_source());
    }

    #[test]
    fn missing_document_token_names_the_secret() {
        let secrets = ResolvedSecrets::from_values(None, Some("r".into()), None, None);
        let o = RunOverrides {
            database: Some(DB.into()),
            prompt_name: None,
        };
        let err = build_pipeline(&cfg(), &secrets, &o).err().unwrap();
        assert!(err.to_string().contains("SECRET_MISSING"));
    }

    #[test]
    fn comparator_key_only_required_for_two_sources() {
        let secrets = ResolvedSecrets::from_values(Some("d".into()), Some("r".into()), None, None);
        let one = RunOverrides {
            database: None,
            prompt_name: Some("Doctors".into()),
        };
        assert!(build_pipeline(&cfg(), &secrets, &one).is_ok());

        let two = RunOverrides {
            database: Some(DB.into()),
            prompt_name: Some("Doctors".into()),
        };
        let err = build_pipeline(&cfg(), &secrets, &two).err().unwrap();
        assert!(err.to_string().contains("SECRET_MISSING"));
    }

    #[test]
    fn bad_database_reference_is_rejected() {
        let o = RunOverrides {
            database: Some("not-a-database".into()),
            prompt_name: None,
        };
        assert!(build_pipeline(&cfg(), &all_secrets(), &o).is_err());
    }

    #[test]
    fn disabled_source_is_left_out() {
        let mut c = cfg();
        c.document_source.enabled = false;
        let o = RunOverrides {
            database: Some(DB.into()),
            prompt_name: Some("Doctors".into()),
        };
        let p = build_pipeline(&c, &all_secrets(), &o).unwrap();
        assert!(!p.has_document_source());
        assert!(p.has_rule_source());
    }
}
