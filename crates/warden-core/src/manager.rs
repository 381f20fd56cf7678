use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use warden_audit::{AuditEntry, AuditLogger, AuditOutcome};
use warden_policy::{DecisionEngine, Evaluation, RiskClassifier, SecurityConfig, SecurityDecision};

use crate::config::Config;
use crate::confirm::{ConfirmRequest, Confirmation, ConfirmationGate, Confirmer};
use crate::error::{DenialReason, SecurityError, ToolCallError};
use crate::executor::{ToolCall, ToolExecutor};
use crate::guard::ExecutionGuard;

/// Entry point for the agent loop: decide, confirm, execute with a deadline,
/// and record the outcome.
///
/// Shared behind `Arc` by concurrent tool calls.
pub struct SecurityManager<C> {
    engine: DecisionEngine,
    gate: ConfirmationGate<C>,
    guard: ExecutionGuard,
    audit: Option<AuditLogger>,
    shutdown_tx: watch::Sender<bool>,
    in_flight: InFlight,
}

/// Counts `mediate` calls that have not yet written their audit entry.
#[derive(Default)]
struct InFlight {
    active: AtomicUsize,
    closed: AtomicBool,
    idle: Notify,
}

impl InFlight {
    /// Register a call. `Err` once [`close`](Self::close) has started; the
    /// ticket still holds `close` back until the refusal is logged.
    fn enter(&self) -> Result<Ticket<'_>, Ticket<'_>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let ticket = Ticket(self);
        if self.closed.load(Ordering::SeqCst) {
            return Err(ticket);
        }
        Ok(ticket)
    }

    /// Refuse new calls and wait for registered ones to finish.
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

struct Ticket<'a>(&'a InFlight);

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl<C: Confirmer> SecurityManager<C> {
    /// Build the pipeline from a loaded configuration.
    ///
    /// Spawns the audit writer when `security.audit_logging` is set, so it
    /// must be called inside a tokio runtime.
    #[must_use]
    pub fn new(config: &Config, confirmer: C) -> Self {
        let audit = config
            .security
            .audit_logging
            .then(|| AuditLogger::spawn(&config.audit));
        Self::from_parts(
            Arc::new(config.security.clone()),
            RiskClassifier::from_config(&config.risk),
            confirmer,
            audit,
        )
    }

    /// Assemble from explicit parts. `audit = None` disables the trail.
    #[must_use]
    pub fn from_parts(
        security: Arc<SecurityConfig>,
        classifier: RiskClassifier,
        confirmer: C,
        audit: Option<AuditLogger>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        for issue in security.misconfigured_modes() {
            tracing::warn!(
                scope = %issue.scope,
                mode = %issue.raw,
                "unrecognized policy mode, calls will require confirmation"
            );
        }
        Self {
            engine: DecisionEngine::new(Arc::clone(&security), classifier),
            gate: ConfirmationGate::new(confirmer, shutdown_rx),
            guard: ExecutionGuard::new(security),
            audit,
            shutdown_tx,
            in_flight: InFlight::default(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    #[must_use]
    pub fn audit(&self) -> Option<&AuditLogger> {
        self.audit.as_ref()
    }

    #[must_use]
    pub fn evaluate(&self, tool_name: &str, server_name: &str, args: &Value) -> SecurityDecision {
        self.engine.evaluate(tool_name, server_name, args)
    }

    #[must_use]
    pub fn evaluate_detailed(&self, tool_name: &str, server_name: &str, args: &Value) -> Evaluation {
        self.engine.evaluate_detailed(tool_name, server_name, args)
    }

    /// Ask the human about a call. Only meaningful after a `prompt` verdict.
    pub async fn confirm(&self, tool_name: &str, server_name: &str, args: &Value) -> bool {
        self.confirmation(tool_name, server_name, args)
            .await
            .is_approved()
    }

    async fn confirmation(&self, tool_name: &str, server_name: &str, args: &Value) -> Confirmation {
        let request = ConfirmRequest::new(
            server_name,
            tool_name,
            args.clone(),
            self.engine.classifier().classify(tool_name),
            self.engine.config().effective_mode(server_name).clone(),
        );
        self.gate.confirm(&request).await
    }

    /// Run `fut` under the server's deadline.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Timeout`] if the deadline elapses first.
    pub async fn guard<F: Future>(
        &self,
        server_name: &str,
        tool_name: &str,
        fut: F,
    ) -> Result<F::Output, SecurityError> {
        self.guard.run(server_name, tool_name, fut).await
    }

    /// Record one terminal outcome. No-op when auditing is disabled.
    pub fn log(
        &self,
        server_name: &str,
        tool_name: &str,
        outcome: AuditOutcome,
        args: &Value,
        duration: Option<Duration>,
        error: Option<&str>,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let mut entry = AuditEntry::new(server_name, tool_name, outcome, args);
        if let Some(duration) = duration {
            entry = entry.with_duration(duration);
        }
        if let Some(error) = error {
            entry = entry.with_error(error);
        }
        audit.record(entry);
    }

    /// Full pipeline for one call. Writes exactly one audit entry whatever
    /// the outcome.
    ///
    /// Calls started after [`shutdown`](Self::shutdown) are denied as
    /// cancelled without being evaluated. Their entry is persisted if they
    /// arrive before `shutdown` returns.
    ///
    /// # Errors
    ///
    /// Returns [`ToolCallError::Security`] when the call is blocked, denied,
    /// or times out, and [`ToolCallError::Tool`] when the executor fails.
    pub async fn mediate<E: ToolExecutor>(
        &self,
        executor: &E,
        call: &ToolCall,
    ) -> Result<Value, ToolCallError> {
        let _ticket = match self.in_flight.enter() {
            Ok(ticket) => ticket,
            Err(_refused) => return Err(self.deny(call, DenialReason::Cancelled).into()),
        };

        let eval = self.engine.evaluate_detailed(&call.tool, &call.server, &call.args);
        tracing::debug!(
            server = %call.server,
            tool = %call.tool,
            decision = %eval.decision,
            reason = %eval.reason,
            risk = %eval.risk,
            "evaluated tool call"
        );

        match eval.decision {
            SecurityDecision::Allow => {}
            SecurityDecision::Deny => {
                let err = SecurityError::Blocked {
                    server: call.server.clone(),
                    tool: call.tool.clone(),
                };
                tracing::info!(server = %call.server, tool = %call.tool, "tool call blocked");
                self.log(
                    &call.server,
                    &call.tool,
                    AuditOutcome::Blocked,
                    &call.args,
                    None,
                    Some(&err.to_string()),
                );
                return Err(err.into());
            }
            SecurityDecision::Prompt => {
                let request = ConfirmRequest::new(
                    call.server.clone(),
                    call.tool.clone(),
                    call.args.clone(),
                    eval.risk,
                    eval.mode,
                );
                let answer = self.gate.confirm(&request).await;
                if let Some(reason) = answer.denial_reason() {
                    return Err(self.deny(call, reason).into());
                }
            }
        }

        let started = Instant::now();
        let result = self
            .guard
            .run(&call.server, &call.tool, executor.execute(call))
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(Ok(value)) => {
                self.log(
                    &call.server,
                    &call.tool,
                    AuditOutcome::Success,
                    &call.args,
                    Some(elapsed),
                    None,
                );
                Ok(value)
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %call.server, tool = %call.tool, "tool call failed: {e}");
                self.log(
                    &call.server,
                    &call.tool,
                    AuditOutcome::Error,
                    &call.args,
                    Some(elapsed),
                    Some(&e.to_string()),
                );
                Err(e.into())
            }
            Err(e) => {
                self.log(
                    &call.server,
                    &call.tool,
                    AuditOutcome::Timeout,
                    &call.args,
                    Some(elapsed),
                    Some(&e.to_string()),
                );
                Err(e.into())
            }
        }
    }

    fn deny(&self, call: &ToolCall, reason: DenialReason) -> SecurityError {
        let err = SecurityError::Denied {
            server: call.server.clone(),
            tool: call.tool.clone(),
            reason,
        };
        tracing::info!(server = %call.server, tool = %call.tool, %reason, "tool call denied");
        self.log(
            &call.server,
            &call.tool,
            AuditOutcome::Denied,
            &call.args,
            None,
            Some(&err.to_string()),
        );
        err
    }

    /// Unrecognized modes in the active policy, as reportable errors.
    #[must_use]
    pub fn misconfigurations(&self) -> Vec<SecurityError> {
        self.engine
            .config()
            .misconfigured_modes()
            .into_iter()
            .map(|m| SecurityError::PolicyMisconfiguration {
                server: m.scope,
                mode: m.raw,
            })
            .collect()
    }

    /// Deny pending and future confirmations, wait for running calls to
    /// record their outcome, then drain the audit trail.
    ///
    /// Running executions are not interrupted, so this can take up to the
    /// longest remaining deadline.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.in_flight.close().await;
        if let Some(audit) = &self.audit {
            audit.shutdown().await;
        }
        tracing::debug!("security manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use warden_audit::{AuditConfig, AuditReader, Verdict};
    use warden_policy::{PolicyMode, ServerPolicy};

    use super::*;
    use crate::confirm::{ConfirmError, NoConfirmer};
    use crate::error::SecurityErrorKind;
    use crate::executor::ToolError;

    struct Answer(bool);

    struct Silent;

    impl Confirmer for Silent {
        async fn ask(&self, _request: &ConfirmRequest) -> Result<bool, ConfirmError> {
            std::future::pending().await
        }
    }

    impl Confirmer for Answer {
        async fn ask(&self, _request: &ConfirmRequest) -> Result<bool, ConfirmError> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    impl ToolExecutor for Echo {
        async fn execute(&self, call: &ToolCall) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match call.tool.as_str() {
                "fail_tool" => Err(ToolError::Execution {
                    message: "exit status 1".into(),
                }),
                "hang_tool" => std::future::pending().await,
                "slow_tool" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!({"slow": true}))
                }
                _ => Ok(json!({"echo": call.args})),
            }
        }
    }

    fn manager<C: Confirmer>(
        security: SecurityConfig,
        confirmer: C,
        dir: &std::path::Path,
    ) -> SecurityManager<C> {
        let audit = AuditLogger::spawn(&AuditConfig {
            directory: dir.to_path_buf(),
        });
        SecurityManager::from_parts(
            Arc::new(security),
            RiskClassifier::new(),
            confirmer,
            Some(audit),
        )
    }

    async fn entries(manager: &SecurityManager<impl Confirmer>, dir: &std::path::Path) -> Vec<AuditEntry> {
        manager.audit().unwrap().flush().await;
        let reader = AuditReader::new(dir);
        let mut all = Vec::new();
        for month in reader.list_months().await.unwrap() {
            all.extend(reader.read_month(&month).await.unwrap());
        }
        all
    }

    fn trusted() -> SecurityConfig {
        SecurityConfig {
            default_mode: PolicyMode::Trusted,
            ..SecurityConfig::default()
        }
    }

    #[tokio::test]
    async fn allowed_call_runs_and_logs_success() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(trusted(), NoConfirmer, dir.path());
        let exec = Echo::default();
        let call = ToolCall::new("fs", "read_file", json!({"path": "a.txt"}));

        let out = mgr.mediate(&exec, &call).await.unwrap();
        assert_eq!(out["echo"]["path"], "a.txt");

        let log = entries(&mgr, dir.path()).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, AuditOutcome::Success);
        assert_eq!(log[0].decision, Verdict::Allow);
        assert!(log[0].duration_ms.is_some());
    }

    #[tokio::test]
    async fn blocked_call_never_executes() {
        let dir = tempfile::tempdir().unwrap();
        let security = trusted().with_server(
            "shell",
            ServerPolicy::default()
                .allow(["execute_command"])
                .block(["execute_command"]),
        );
        let mgr = manager(security, Answer(true), dir.path());
        let exec = Echo::default();
        let call = ToolCall::new("shell", "execute_command", json!({"cmd": "ls"}));

        let err = mgr.mediate(&exec, &call).await.unwrap_err();
        assert_eq!(err.security_kind(), Some(SecurityErrorKind::Blocked));
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);

        let log = entries(&mgr, dir.path()).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, AuditOutcome::Blocked);
        assert_eq!(log[0].decision, Verdict::Deny);
    }

    #[tokio::test]
    async fn rejected_confirmation_denies() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(SecurityConfig::default(), Answer(false), dir.path());
        let exec = Echo::default();
        let call = ToolCall::new("fs", "delete_file", json!({"path": "a.txt"}));

        let err = mgr.mediate(&exec, &call).await.unwrap_err();
        assert!(matches!(
            err,
            ToolCallError::Security(SecurityError::Denied {
                reason: DenialReason::Rejected,
                ..
            })
        ));
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);

        let log = entries(&mgr, dir.path()).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, AuditOutcome::Denied);
        assert_eq!(log[0].decision, Verdict::Deny);
        assert!(log[0].error.as_deref().unwrap().contains("rejected by user"));
    }

    #[tokio::test]
    async fn approved_confirmation_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(SecurityConfig::default(), Answer(true), dir.path());
        let exec = Echo::default();
        let call = ToolCall::new("fs", "delete_file", json!({"path": "a.txt"}));

        assert!(mgr.mediate(&exec, &call).await.is_ok());
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
        let log = entries(&mgr, dir.path()).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn missing_confirmer_denies_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(SecurityConfig::default(), NoConfirmer, dir.path());
        let call = ToolCall::new("fs", "write_file", json!({}));
        let err = mgr.mediate(&Echo::default(), &call).await.unwrap_err();
        assert!(matches!(
            err,
            ToolCallError::Security(SecurityError::Denied {
                reason: DenialReason::Unavailable,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn executor_error_is_logged_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(trusted(), NoConfirmer, dir.path());
        let call = ToolCall::new("fs", "fail_tool", json!({}));

        let err = mgr.mediate(&Echo::default(), &call).await.unwrap_err();
        assert!(matches!(err, ToolCallError::Tool(ToolError::Execution { .. })));

        let log = entries(&mgr, dir.path()).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, AuditOutcome::Error);
        assert_eq!(log[0].decision, Verdict::Allow);
        assert_eq!(log[0].error.as_deref(), Some("execution failed: exit status 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_logged_as_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let security = SecurityConfig {
            tool_timeout_ms: 50,
            ..trusted()
        };
        let mgr = manager(security, NoConfirmer, dir.path());
        let call = ToolCall::new("fs", "hang_tool", json!({}));

        let err = mgr.mediate(&Echo::default(), &call).await.unwrap_err();
        assert!(matches!(
            err,
            ToolCallError::Security(SecurityError::Timeout { timeout_ms: 50, .. })
        ));

        let log = entries(&mgr, dir.path()).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, AuditOutcome::Timeout);
        let ms = log[0].duration_ms.unwrap();
        assert!((50..60).contains(&ms));
    }

    #[tokio::test]
    async fn disabled_audit_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SecurityManager::from_parts(
            Arc::new(trusted()),
            RiskClassifier::new(),
            NoConfirmer,
            None,
        );
        let call = ToolCall::new("fs", "read_file", json!({}));
        mgr.mediate(&Echo::default(), &call).await.unwrap();
        assert!(mgr.audit().is_none());
        assert!(AuditReader::new(dir.path()).list_months().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirm_uses_effective_mode_and_risk() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(SecurityConfig::default(), Answer(true), dir.path());
        assert!(mgr.confirm("delete_file", "fs", &json!({})).await);

        let mgr = manager(SecurityConfig::default(), Answer(false), dir.path());
        assert!(!mgr.confirm("delete_file", "fs", &json!({})).await);
    }

    #[tokio::test]
    async fn shutdown_denies_later_confirmations() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(SecurityConfig::default(), Answer(true), dir.path());
        mgr.shutdown().await;
        assert!(!mgr.confirm("delete_file", "fs", &json!({})).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_waits_for_running_call_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(manager(trusted(), NoConfirmer, dir.path()));
        let exec = Arc::new(Echo::default());

        let call = {
            let mgr = Arc::clone(&mgr);
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                let call = ToolCall::new("fs", "slow_tool", json!({}));
                mgr.mediate(exec.as_ref(), &call).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.shutdown().await;

        assert!(call.await.unwrap().is_ok());
        let log = entries(&mgr, dir.path()).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, AuditOutcome::Success);
        assert_eq!(mgr.audit().unwrap().write_failures(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_logs_every_cancelled_confirmation() {
        for _ in 0..20 {
            let dir = tempfile::tempdir().unwrap();
            let mgr = Arc::new(manager(SecurityConfig::default(), Silent, dir.path()));
            let exec = Arc::new(Echo::default());

            let mut handles = Vec::new();
            for tool in ["delete_file", "delete_directory", "delete_branch", "delete_user"] {
                let mgr = Arc::clone(&mgr);
                let exec = Arc::clone(&exec);
                handles.push(tokio::spawn(async move {
                    let call = ToolCall::new("fs", tool, json!({}));
                    mgr.mediate(exec.as_ref(), &call).await
                }));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            mgr.shutdown().await;

            for h in handles {
                let err = h.await.unwrap().unwrap_err();
                assert!(matches!(
                    err,
                    ToolCallError::Security(SecurityError::Denied {
                        reason: DenialReason::Cancelled,
                        ..
                    })
                ));
            }
            assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
            let log = entries(&mgr, dir.path()).await;
            assert_eq!(log.len(), 4);
            assert!(log.iter().all(|e| e.outcome == AuditOutcome::Denied));
            assert_eq!(mgr.audit().unwrap().write_failures(), 0);
        }
    }

    #[tokio::test]
    async fn calls_after_shutdown_are_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(trusted(), NoConfirmer, dir.path());
        let exec = Echo::default();
        mgr.shutdown().await;

        let call = ToolCall::new("fs", "read_file", json!({}));
        let err = mgr.mediate(&exec, &call).await.unwrap_err();
        assert!(matches!(
            err,
            ToolCallError::Security(SecurityError::Denied {
                reason: DenialReason::Cancelled,
                ..
            })
        ));
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.audit().unwrap().write_failures(), 1);
    }

    #[test]
    fn misconfigurations_are_reported() {
        let security = SecurityConfig {
            default_mode: PolicyMode::from("paranoid"),
            ..SecurityConfig::default()
        };
        let mgr = SecurityManager::from_parts(
            Arc::new(security),
            RiskClassifier::new(),
            NoConfirmer,
            None,
        );
        let found = mgr.misconfigurations();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind(), SecurityErrorKind::Policy);
    }
}
