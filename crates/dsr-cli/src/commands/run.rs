//! `dsr run`: one foreground comparison.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dsr_runtime::{build_pipeline, RunContext, RunOutcome, RunOverrides};
use dsr_schemas::ProgressState;
use tracing::{info, warn};

pub async fn run_once(
    config_paths: Vec<String>,
    database: Option<String>,
    prompt_name: Option<String>,
    json: bool,
) -> Result<()> {
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = dsr_config::load_layered_yaml(&path_refs)?;
    let cfg = loaded.pipeline()?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let secrets = dsr_config::resolve_secrets(&cfg);
    let overrides = RunOverrides {
        database,
        prompt_name,
    };
    let pipeline = build_pipeline(&cfg, &secrets, &overrides).context("wire pipeline")?;

    let ctx = Arc::new(RunContext::detached());
    let watcher = Arc::clone(&ctx);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => watcher.request_cancel(),
            Err(e) => warn!(error = %e, "ctrl-c handler unavailable"),
        }
    });

    let outcome = pipeline.run(&ctx).await;
    let snap = ctx.snapshot();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snap).context("serialize progress")?
        );
    } else {
        print_summary(&snap);
    }

    match outcome {
        RunOutcome::Completed(_) => Ok(()),
        RunOutcome::NoData(summary) => bail!("{}", summary.message),
        RunOutcome::Cancelled => bail!("comparison cancelled"),
        RunOutcome::Failed(msg) => bail!("{msg}"),
    }
}

fn print_summary(snap: &ProgressState) {
    if let Some(id) = snap.run_id {
        println!("run_id={id}");
    }
    println!("status={}", snap.status.as_str());
    if let Some(s) = &snap.summary {
        println!("document_records={}", s.document_records);
        println!("rule_records={}", s.rule_records);
        println!("total_rows={}", s.total_rows);
        if let Some(url) = &s.report_url {
            println!("report={url}");
        }
        println!("{}", s.message);
    }
}
