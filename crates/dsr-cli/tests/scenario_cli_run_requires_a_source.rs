//! Scenario: CLI entry points that need no network.
//!
//! # Invariants under test
//!
//! 1. `dsr config-hash` prints a stable 64-hex hash followed by the canonical
//!    JSON of the merged config.
//! 2. `dsr run` with no database and no prompt name (after overrides) fails
//!    before any request is made, naming the missing input.
//! 3. A config holding a literal secret is rejected.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;

fn base_yaml() -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("config")
        .join("base.yaml")
        .to_string_lossy()
        .to_string()
}

fn overlay(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    f.write_all(contents.as_bytes()).expect("write overlay");
    f
}

fn hash_line(out: &[u8]) -> String {
    String::from_utf8_lossy(out)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[test]
fn config_hash_is_stable() -> anyhow::Result<()> {
    let first = Command::cargo_bin("dsr")?
        .args(["config-hash", &base_yaml()])
        .output()?;
    assert!(first.status.success());
    let line = hash_line(&first.stdout);
    let hash = line.strip_prefix("config_hash=").expect("hash line first");
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

    let second = Command::cargo_bin("dsr")?
        .args(["config-hash", &base_yaml()])
        .output()?;
    assert_eq!(hash_line(&second.stdout), line);
    Ok(())
}

#[test]
fn overlay_changes_the_hash() -> anyhow::Result<()> {
    let extra = overlay("report:\n  chunk_chars: 1000\n");
    let base = Command::cargo_bin("dsr")?
        .args(["config-hash", &base_yaml()])
        .output()?;
    let layered = Command::cargo_bin("dsr")?
        .args(["config-hash", &base_yaml(), &extra.path().to_string_lossy()])
        .output()?;
    assert!(layered.status.success());
    assert_ne!(hash_line(&base.stdout), hash_line(&layered.stdout));
    Ok(())
}

#[test]
fn run_without_any_source_fails_fast() -> anyhow::Result<()> {
    let no_prompt = overlay("rule_source:\n  prompt_name: null\n");
    Command::cargo_bin("dsr")?
        .args([
            "run",
            "--config",
            &base_yaml(),
            "--config",
            &no_prompt.path().to_string_lossy(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NO_SOURCE"));
    Ok(())
}

#[test]
fn literal_secret_in_config_is_rejected() -> anyhow::Result<()> {
    let leaked = overlay("comparator:\n  api_key_env: \"sk-ant-REDACTED\"\n");
    Command::cargo_bin("dsr")?
        .args(["config-hash", &base_yaml(), &leaked.path().to_string_lossy()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"));
    Ok(())
}
