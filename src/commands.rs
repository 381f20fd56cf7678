use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use warden_audit::{AuditReader, AuditSummary, hash_args};
use warden_core::{Config, Confirmer, SecurityManager};
use warden_policy::{RiskClassifier, SecurityDecision};

pub fn classify(config: &Config, tools: &[String]) -> String {
    let classifier = RiskClassifier::from_config(&config.risk);
    let width = tools.iter().map(String::len).max().unwrap_or(0);
    tools
        .iter()
        .map(|tool| {
            let source = if classifier.is_curated(tool) {
                "table"
            } else if RiskClassifier::classify_by_pattern(tool).is_some() {
                "pattern"
            } else {
                "default"
            };
            format!(
                "{tool:<width$}  {:<9}  ({source})",
                classifier.classify(tool).as_str()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn check<C: Confirmer>(
    config: &Config,
    server: &str,
    tool: &str,
    args: &str,
    confirmer: Option<C>,
) -> anyhow::Result<String> {
    let args: Value = serde_json::from_str(args).context("--args must be valid JSON")?;
    let security = Arc::new(config.security.clone());
    let timeout = security.timeout_for(server);

    let mut out = String::new();
    let eval = match confirmer {
        Some(confirmer) => {
            let manager = SecurityManager::from_parts(
                security,
                RiskClassifier::from_config(&config.risk),
                confirmer,
                None,
            );
            let eval = manager.evaluate_detailed(tool, server, &args);
            write_evaluation(&mut out, server, tool, &eval, timeout.as_millis(), &args)?;
            if eval.decision == SecurityDecision::Prompt {
                let approved = manager.confirm(tool, server, &args).await;
                let resolved = if approved { "allow" } else { "deny" };
                writeln!(out, "resolved: {resolved}")?;
            }
            manager.shutdown().await;
            eval
        }
        None => {
            let engine = warden_policy::DecisionEngine::new(
                security,
                RiskClassifier::from_config(&config.risk),
            );
            let eval = engine.evaluate_detailed(tool, server, &args);
            write_evaluation(&mut out, server, tool, &eval, timeout.as_millis(), &args)?;
            eval
        }
    };
    tracing::debug!(server, tool, decision = %eval.decision, "checked tool call");
    Ok(out.trim_end().to_owned())
}

fn write_evaluation(
    out: &mut String,
    server: &str,
    tool: &str,
    eval: &warden_policy::Evaluation,
    timeout_ms: u128,
    args: &Value,
) -> std::fmt::Result {
    writeln!(out, "server:   {server}")?;
    writeln!(out, "tool:     {tool}")?;
    writeln!(out, "risk:     {}", eval.risk)?;
    writeln!(out, "mode:     {}", eval.mode)?;
    writeln!(out, "decision: {}", eval.decision)?;
    writeln!(out, "reason:   {}", eval.reason)?;
    writeln!(out, "timeout:  {timeout_ms}ms")?;
    writeln!(out, "args:     {}", hash_args(args))
}

pub async fn audit(
    config: &Config,
    month: Option<String>,
    server: Option<&str>,
    list: bool,
) -> anyhow::Result<String> {
    let reader = AuditReader::new(&config.audit.directory);
    let mut out = String::new();

    if list {
        let months = reader
            .list_months()
            .await
            .context("failed to list audit files")?;
        if months.is_empty() {
            writeln!(out, "no audit files in {}", reader.directory().display())?;
        }
        for month in months {
            writeln!(out, "{month}")?;
        }
        return Ok(out.trim_end().to_owned());
    }

    let month = month.unwrap_or_else(|| chrono::Utc::now().format("%Y-%m").to_string());
    let entries = reader
        .read_month(&month)
        .await
        .with_context(|| format!("failed to read audit month {month}"))?;
    let summary = AuditSummary::from_entries(
        entries
            .iter()
            .filter(|e| server.is_none_or(|s| e.server == s)),
    );

    writeln!(out, "audit {month} ({})", reader.directory().display())?;
    writeln!(out, "entries: {}", summary.total)?;
    for (outcome, count) in &summary.by_outcome {
        writeln!(out, "  {:<8} {count}", outcome.as_str())?;
    }
    if !summary.by_tool.is_empty() {
        writeln!(out, "by tool:")?;
        for (tool, count) in &summary.by_tool {
            writeln!(out, "  {tool}  {count}")?;
        }
    }
    if !summary.repeated.is_empty() {
        writeln!(out, "repeated identical calls:")?;
        for call in &summary.repeated {
            writeln!(
                out,
                "  {}/{} x{} (args {})",
                call.server,
                call.tool,
                call.count,
                &call.args_hash[..12.min(call.args_hash.len())]
            )?;
        }
    }
    Ok(out.trim_end().to_owned())
}

pub fn show_config(config: &Config) -> anyhow::Result<String> {
    for issue in config.misconfigurations() {
        tracing::warn!("{issue}");
    }
    config.to_toml()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use warden_audit::{AuditEntry, AuditLogger, AuditOutcome};
    use warden_core::{ConfirmError, ConfirmRequest, NoConfirmer};
    use warden_policy::{PolicyMode, ServerPolicy};

    use super::*;

    struct Yes;

    impl Confirmer for Yes {
        async fn ask(&self, _request: &ConfirmRequest) -> Result<bool, ConfirmError> {
            Ok(true)
        }
    }

    fn config_with_audit(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.audit.directory = dir.to_path_buf();
        config
    }

    #[test]
    fn classify_reports_source() {
        let out = classify(
            &Config::default(),
            &["read_file".into(), "purgeCache".into(), "frobnicate".into()],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("safe") && lines[0].ends_with("(table)"));
        assert!(lines[1].contains("sensitive") && lines[1].ends_with("(pattern)"));
        assert!(lines[2].contains("moderate") && lines[2].ends_with("(default)"));
    }

    #[tokio::test]
    async fn check_reports_blocked_tool() {
        let mut config = Config::default();
        config.security = config.security.with_server(
            "shell",
            ServerPolicy::default()
                .with_mode(PolicyMode::Trusted)
                .block(["execute_command"]),
        );
        let out = check(&config, "shell", "execute_command", "{}", None::<NoConfirmer>)
            .await
            .unwrap();
        assert!(out.contains("decision: deny"));
        assert!(out.contains("reason:   blocked"));
        assert!(out.contains("mode:     trusted"));
    }

    #[tokio::test]
    async fn check_resolves_prompt_with_confirmer() {
        let out = check(&Config::default(), "fs", "delete_file", r#"{"path":"a"}"#, Some(Yes))
            .await
            .unwrap();
        assert!(out.contains("decision: prompt"));
        assert!(out.contains("resolved: allow"));
        assert!(out.contains(&hash_args(&json!({"path": "a"}))));

        let out = check(&Config::default(), "fs", "delete_file", "{}", Some(NoConfirmer))
            .await
            .unwrap();
        assert!(out.contains("resolved: deny"));
    }

    #[tokio::test]
    async fn check_rejects_bad_json() {
        let err = check(&Config::default(), "fs", "read_file", "{not json", None::<NoConfirmer>)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--args must be valid JSON"));
    }

    #[tokio::test]
    async fn audit_summarizes_month() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_audit(dir.path());
        let ts = Utc.with_ymd_and_hms(2026, 10, 3, 9, 0, 0).unwrap();
        let logger = AuditLogger::spawn(&config.audit);
        for (server, tool, outcome) in [
            ("fs", "read_file", AuditOutcome::Success),
            ("fs", "read_file", AuditOutcome::Success),
            ("shell", "execute_command", AuditOutcome::Blocked),
        ] {
            logger.record(AuditEntry::new(server, tool, outcome, &json!({})).with_timestamp(ts));
        }
        logger.shutdown().await;

        let out = audit(&config, Some("2026-10".into()), None, false)
            .await
            .unwrap();
        assert!(out.contains("entries: 3"));
        assert!(out.contains("fs/read_file  2"));
        assert!(out.contains("repeated identical calls:"));

        let out = audit(&config, Some("2026-10".into()), Some("shell"), false)
            .await
            .unwrap();
        assert!(out.contains("entries: 1"));
        assert!(!out.contains("fs/read_file"));

        let out = audit(&config, None, None, true).await.unwrap();
        assert_eq!(out, "2026-10");
    }

    #[tokio::test]
    async fn audit_rejects_bad_month() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_audit(dir.path());
        assert!(audit(&config, Some("10/2026".into()), None, false).await.is_err());
    }

    #[test]
    fn show_config_renders_toml() {
        let out = show_config(&Config::default()).unwrap();
        assert!(out.contains("[security]"));
        assert!(out.contains("default_mode = \"prompt\""));
        assert!(out.contains("[audit]"));
    }
}
