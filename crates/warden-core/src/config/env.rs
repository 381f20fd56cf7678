use std::path::PathBuf;

use warden_policy::PolicyMode;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WARDEN_DEFAULT_MODE") {
            let mode = PolicyMode::from(v.as_str());
            if mode.is_recognized() {
                self.security.default_mode = mode;
            } else {
                tracing::warn!("ignoring invalid WARDEN_DEFAULT_MODE value: {v}");
            }
        }
        if let Ok(v) = std::env::var("WARDEN_REQUIRE_CONFIRMATION") {
            if let Ok(required) = v.parse::<bool>() {
                self.security.require_confirmation_globally = required;
            } else {
                tracing::warn!("ignoring invalid WARDEN_REQUIRE_CONFIRMATION value: {v}");
            }
        }
        if let Ok(v) = std::env::var("WARDEN_TOOL_TIMEOUT_MS") {
            match v.parse::<u64>() {
                Ok(ms) if ms > 0 => self.security.tool_timeout_ms = ms,
                _ => tracing::warn!("ignoring invalid WARDEN_TOOL_TIMEOUT_MS value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("WARDEN_AUDIT_ENABLED") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.security.audit_logging = enabled;
            } else {
                tracing::warn!("ignoring invalid WARDEN_AUDIT_ENABLED value: {v}");
            }
        }
        if let Ok(v) = std::env::var("WARDEN_AUDIT_DIR")
            && !v.trim().is_empty()
        {
            self.audit.directory = PathBuf::from(v);
        }
    }
}
