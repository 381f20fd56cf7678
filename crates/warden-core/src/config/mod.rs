mod env;

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use warden_audit::AuditConfig;
use warden_policy::{RiskConfig, SecurityConfig};

use crate::error::SecurityError;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to sensible defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Unrecognized mode strings, each of which degrades to `prompt`.
    #[must_use]
    pub fn misconfigurations(&self) -> Vec<SecurityError> {
        self.security
            .misconfigured_modes()
            .into_iter()
            .map(|m| SecurityError::PolicyMisconfiguration {
                server: m.scope,
                mode: m.raw,
            })
            .collect()
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}
