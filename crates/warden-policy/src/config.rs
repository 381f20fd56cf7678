use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::risk::RiskTier;

pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

fn default_true() -> bool {
    true
}

fn default_tool_timeout_ms() -> u64 {
    DEFAULT_TOOL_TIMEOUT_MS
}

/// How much friction is applied before a tool runs.
///
/// Unknown strings deserialize to `Unrecognized` instead of failing, so a typo in
/// configuration degrades to confirmation rather than aborting startup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum PolicyMode {
    Trusted,
    #[default]
    Prompt,
    Preview,
    Strict,
    Unrecognized(String),
}

impl PolicyMode {
    /// Whether the full argument payload must be shown before the human decides.
    #[must_use]
    pub fn shows_full_args(&self) -> bool {
        matches!(self, Self::Preview | Self::Strict)
    }

    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Trusted => "trusted",
            Self::Prompt => "prompt",
            Self::Preview => "preview",
            Self::Strict => "strict",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for PolicyMode {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trusted" => Self::Trusted,
            "prompt" => Self::Prompt,
            "preview" => Self::Preview,
            "strict" => Self::Strict,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<&str> for PolicyMode {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_owned())
    }
}

impl From<PolicyMode> for String {
    fn from(mode: PolicyMode) -> Self {
        match mode {
            PolicyMode::Unrecognized(raw) => raw,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per capability-server overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PolicyMode>,
    /// Unconditional allow; bypasses risk elevation and global confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<BTreeSet<String>>,
    /// Unconditional deny; beats every other signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_tools: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time_ms: Option<u64>,
}

impl ServerPolicy {
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<PolicyMode>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    #[must_use]
    pub fn allow<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools
            .get_or_insert_with(BTreeSet::new)
            .extend(tools.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn block<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_tools
            .get_or_insert_with(BTreeSet::new)
            .extend(tools.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_max_execution_time_ms(mut self, ms: u64) -> Self {
        self.max_execution_time_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn allows(&self, tool_name: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_some_and(|set| set.contains(tool_name))
    }

    #[must_use]
    pub fn blocks(&self, tool_name: &str) -> bool {
        self.blocked_tools
            .as_ref()
            .is_some_and(|set| set.contains(tool_name))
    }
}

/// Process-wide effective policy. Loaded once and treated as read-only for the session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub default_mode: PolicyMode,
    /// Forces `prompt` for every tool not covered by an allow or block list.
    #[serde(default)]
    pub require_confirmation_globally: bool,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub audit_logging: bool,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerPolicy>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_mode: PolicyMode::default(),
            require_confirmation_globally: false,
            tool_timeout_ms: default_tool_timeout_ms(),
            audit_logging: true,
            servers: BTreeMap::new(),
        }
    }
}

impl SecurityConfig {
    #[must_use]
    pub fn with_server(mut self, name: impl Into<String>, policy: ServerPolicy) -> Self {
        self.servers.insert(name.into(), policy);
        self
    }

    #[must_use]
    pub fn server(&self, name: &str) -> Option<&ServerPolicy> {
        self.servers.get(name)
    }

    /// Server mode if set, otherwise the default mode.
    #[must_use]
    pub fn effective_mode(&self, server_name: &str) -> &PolicyMode {
        self.server(server_name)
            .and_then(|p| p.mode.as_ref())
            .unwrap_or(&self.default_mode)
    }

    /// Execution deadline for calls to `server_name`.
    #[must_use]
    pub fn timeout_for(&self, server_name: &str) -> Duration {
        let ms = self
            .server(server_name)
            .and_then(|p| p.max_execution_time_ms)
            .unwrap_or(self.tool_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Every mode value that failed to parse, with the scope it was found in.
    #[must_use]
    pub fn misconfigured_modes(&self) -> Vec<ModeMisconfiguration> {
        let mut found = Vec::new();
        if let PolicyMode::Unrecognized(raw) = &self.default_mode {
            found.push(ModeMisconfiguration {
                scope: "default_mode".to_owned(),
                raw: raw.clone(),
            });
        }
        for (name, policy) in &self.servers {
            if let Some(PolicyMode::Unrecognized(raw)) = &policy.mode {
                found.push(ModeMisconfiguration {
                    scope: name.clone(),
                    raw: raw.clone(),
                });
            }
        }
        found
    }
}

/// An unrecognized mode string found in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeMisconfiguration {
    /// `default_mode` or the server name.
    pub scope: String,
    pub raw: String,
}

/// Risk table configuration: whether the builtin table is used and which names are overridden.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RiskConfig {
    #[serde(default = "default_true")]
    pub builtin_table: bool,
    #[serde(default)]
    pub overrides: BTreeMap<String, RiskTier>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            builtin_table: true,
            overrides: BTreeMap::new(),
        }
    }
}
