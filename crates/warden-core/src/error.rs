use std::fmt;

use crate::executor::ToolError;

/// Why a call that required confirmation did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The human answered no.
    Rejected,
    /// No confirmation surface could be reached.
    Unavailable,
    /// The session was torn down while the request was pending.
    Cancelled,
}

impl DenialReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected by user",
            Self::Unavailable => "confirmation unavailable",
            Self::Cancelled => "confirmation cancelled",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed rejection of a tool call by the security layer.
///
/// The agent loop is expected to report these back as a tool-result error,
/// not to end the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    /// Vetoed by a block list. Only a configuration change can lift it.
    #[error("tool '{tool}' on server '{server}' is blocked by policy")]
    Blocked { server: String, tool: String },

    /// Refused or unanswered confirmation. A fresh call may prompt again.
    #[error("tool '{tool}' on server '{server}' denied: {reason}")]
    Denied {
        server: String,
        tool: String,
        reason: DenialReason,
    },

    /// The deadline elapsed. Side effects of the call are of unknown status.
    #[error("tool call timed out after {timeout_ms}ms: {server}/{tool}")]
    Timeout {
        server: String,
        tool: String,
        timeout_ms: u64,
    },

    /// An unrecognized mode string. Evaluation falls back to `prompt`; this
    /// variant is only used for reporting.
    #[error("unrecognized policy mode '{mode}' in '{server}'")]
    PolicyMisconfiguration { server: String, mode: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityErrorKind {
    Blocked,
    Denied,
    Timeout,
    Policy,
}

impl SecurityError {
    #[must_use]
    pub fn kind(&self) -> SecurityErrorKind {
        match self {
            Self::Blocked { .. } => SecurityErrorKind::Blocked,
            Self::Denied { .. } => SecurityErrorKind::Denied,
            Self::Timeout { .. } => SecurityErrorKind::Timeout,
            Self::PolicyMisconfiguration { .. } => SecurityErrorKind::Policy,
        }
    }

    /// Only a timeout may be retried by the caller without changing anything.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure of a mediated tool call: rejected by the security layer or failed
/// inside the executor.
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl ToolCallError {
    #[must_use]
    pub fn security_kind(&self) -> Option<SecurityErrorKind> {
        match self {
            Self::Security(e) => Some(e.kind()),
            Self::Tool(_) => None,
        }
    }
}
