//! Allow / deny / prompt verdicts for a tool call.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{PolicyMode, SecurityConfig};
use crate::risk::{RiskClassifier, RiskTier};

/// Verdict for a tool call. `Prompt` is never terminal: it resolves to allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityDecision {
    Allow,
    Deny,
    Prompt,
}

impl SecurityDecision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Prompt => "prompt",
        }
    }
}

impl fmt::Display for SecurityDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which precedence rule produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Blocked,
    AllowListed,
    SensitiveRisk,
    GlobalConfirmation,
    Mode,
    MisconfiguredMode,
}

impl DecisionReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::AllowListed => "allow_listed",
            Self::SensitiveRisk => "sensitive_risk",
            Self::GlobalConfirmation => "global_confirmation",
            Self::Mode => "mode",
            Self::MisconfiguredMode => "misconfigured_mode",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict plus the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: SecurityDecision,
    pub reason: DecisionReason,
    pub risk: RiskTier,
    pub mode: PolicyMode,
}

/// Stateless per call: combines the classifier, the policy snapshot, and the
/// per-server allow/block lists. Safe to share across concurrent calls.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: Arc<SecurityConfig>,
    classifier: RiskClassifier,
}

impl DecisionEngine {
    #[must_use]
    pub fn new(config: Arc<SecurityConfig>, classifier: RiskClassifier) -> Self {
        Self { config, classifier }
    }

    #[must_use]
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    #[must_use]
    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// `args` is accepted for argument-sensitive rules; the current ruleset only
    /// consumes the tool and server names.
    #[must_use]
    pub fn evaluate(
        &self,
        tool_name: &str,
        server_name: &str,
        args: &serde_json::Value,
    ) -> SecurityDecision {
        self.evaluate_detailed(tool_name, server_name, args)
            .decision
    }

    /// First match wins:
    /// 1. blocked list → deny
    /// 2. allowed list → allow
    /// 3. sensitive risk outside `trusted` → prompt
    /// 4. global confirmation → prompt
    /// 5. mode: `trusted` → allow, anything else (including unrecognized) → prompt
    #[must_use]
    pub fn evaluate_detailed(
        &self,
        tool_name: &str,
        server_name: &str,
        _args: &serde_json::Value,
    ) -> Evaluation {
        let risk = self.classifier.classify(tool_name);
        let mode = self.config.effective_mode(server_name).clone();
        let policy = self.config.server(server_name);

        let verdict = |decision, reason| Evaluation {
            decision,
            reason,
            risk,
            mode: mode.clone(),
        };

        if policy.is_some_and(|p| p.blocks(tool_name)) {
            return verdict(SecurityDecision::Deny, DecisionReason::Blocked);
        }
        if policy.is_some_and(|p| p.allows(tool_name)) {
            return verdict(SecurityDecision::Allow, DecisionReason::AllowListed);
        }
        if risk == RiskTier::Sensitive && mode != PolicyMode::Trusted {
            return verdict(SecurityDecision::Prompt, DecisionReason::SensitiveRisk);
        }
        if self.config.require_confirmation_globally {
            return verdict(SecurityDecision::Prompt, DecisionReason::GlobalConfirmation);
        }

        match &mode {
            PolicyMode::Trusted => verdict(SecurityDecision::Allow, DecisionReason::Mode),
            PolicyMode::Prompt | PolicyMode::Preview | PolicyMode::Strict => {
                verdict(SecurityDecision::Prompt, DecisionReason::Mode)
            }
            PolicyMode::Unrecognized(raw) => {
                tracing::warn!(
                    server = server_name,
                    tool = tool_name,
                    mode = raw.as_str(),
                    "unrecognized policy mode, requiring confirmation"
                );
                verdict(SecurityDecision::Prompt, DecisionReason::MisconfiguredMode)
            }
        }
    }
}
