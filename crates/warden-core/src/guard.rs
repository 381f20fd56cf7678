use std::sync::Arc;
use std::time::Duration;

use warden_policy::SecurityConfig;

use crate::error::SecurityError;

/// Races tool execution against a per-server deadline.
///
/// Every call gets its own timer, so a slow call never delays another one.
/// On timeout the guard drops its handle on the future and returns; it does
/// not cancel work the future has already handed to another task or process.
/// Such work may still complete, and its side effects must be treated as
/// possibly applied. Nothing is retried.
#[derive(Debug, Clone)]
pub struct ExecutionGuard {
    config: Arc<SecurityConfig>,
}

impl ExecutionGuard {
    #[must_use]
    pub fn new(config: Arc<SecurityConfig>) -> Self {
        Self { config }
    }

    /// `servers[server].max_execution_time_ms`, else `tool_timeout_ms`.
    #[must_use]
    pub fn deadline(&self, server_name: &str) -> Duration {
        self.config.timeout_for(server_name)
    }

    /// Returns the future's output unchanged if it finishes in time.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Timeout`] when the deadline elapses first.
    pub async fn run<F>(
        &self,
        server_name: &str,
        tool_name: &str,
        fut: F,
    ) -> Result<F::Output, SecurityError>
    where
        F: Future,
    {
        let deadline = self.deadline(server_name);
        tokio::time::timeout(deadline, fut).await.map_err(|_| {
            let timeout_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                server = server_name,
                tool = tool_name,
                timeout_ms,
                "tool call exceeded deadline"
            );
            SecurityError::Timeout {
                server: server_name.to_owned(),
                tool: tool_name.to_owned(),
                timeout_ms,
            }
        })
    }
}
