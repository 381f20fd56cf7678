//! Tool-name risk classification.
//!
//! Lookup order: curated exact-match table, then the ordered pattern families
//! (sensitive, moderate, safe), then `Moderate`. An unknown tool is never
//! assumed safe.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

/// Coarse potential for harmful side effects. Ordered `Safe < Moderate < Sensitive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Safe,
    Moderate,
    Sensitive,
}

impl RiskTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Moderate => "moderate",
            Self::Sensitive => "sensitive",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known tool semantics for common capability servers (filesystem, git, GitHub, shell, web).
const BUILTIN_TABLE: &[(&str, RiskTier)] = &[
    ("read_file", RiskTier::Safe),
    ("read_text_file", RiskTier::Safe),
    ("read_media_file", RiskTier::Safe),
    ("read_multiple_files", RiskTier::Safe),
    ("list_directory", RiskTier::Safe),
    ("list_directory_with_sizes", RiskTier::Safe),
    ("directory_tree", RiskTier::Safe),
    ("search_files", RiskTier::Safe),
    ("get_file_info", RiskTier::Safe),
    ("list_allowed_directories", RiskTier::Safe),
    ("write_file", RiskTier::Moderate),
    ("edit_file", RiskTier::Moderate),
    ("create_directory", RiskTier::Moderate),
    ("move_file", RiskTier::Sensitive),
    ("delete_file", RiskTier::Sensitive),
    ("delete_directory", RiskTier::Sensitive),
    ("git_status", RiskTier::Safe),
    ("git_diff", RiskTier::Safe),
    ("git_diff_staged", RiskTier::Safe),
    ("git_diff_unstaged", RiskTier::Safe),
    ("git_log", RiskTier::Safe),
    ("git_show", RiskTier::Safe),
    ("git_add", RiskTier::Moderate),
    ("git_commit", RiskTier::Moderate),
    ("git_create_branch", RiskTier::Moderate),
    ("git_checkout", RiskTier::Moderate),
    ("git_push", RiskTier::Moderate),
    ("git_reset", RiskTier::Sensitive),
    ("search_repositories", RiskTier::Safe),
    ("search_code", RiskTier::Safe),
    ("search_issues", RiskTier::Safe),
    ("get_issue", RiskTier::Safe),
    ("get_pull_request", RiskTier::Safe),
    ("list_commits", RiskTier::Safe),
    ("create_issue", RiskTier::Moderate),
    ("update_issue", RiskTier::Moderate),
    ("add_issue_comment", RiskTier::Moderate),
    ("create_pull_request", RiskTier::Moderate),
    ("merge_pull_request", RiskTier::Moderate),
    ("create_or_update_file", RiskTier::Moderate),
    ("push_files", RiskTier::Moderate),
    ("fork_repository", RiskTier::Moderate),
    ("execute_command", RiskTier::Sensitive),
    ("run_command", RiskTier::Sensitive),
    ("shell", RiskTier::Sensitive),
    ("bash", RiskTier::Sensitive),
    ("kill_process", RiskTier::Sensitive),
    ("fetch", RiskTier::Safe),
    ("web_search", RiskTier::Safe),
];

static SENSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:^|_)(?:",
        r"(?:delete|remove|unlink|erase|purge|wipe|destroy|truncate|kill|terminate|execute|shell",
        r"|spawn|sudo|move|rename|chmod|chown|uninstall|revoke|overwrite)[a-z0-9]*",
        r"|(?:rm|rmdir|del|drop|exec|eval|run|sh|bash|mv|reset|force)(?:_|$)",
        r"|(?:set|write|update|edit|modify|change|save)_(?:[a-z0-9]+_)*?",
        r"(?:config|configuration|settings|env|environment|permissions?|credentials?|secrets?)(?:_|$)",
        r"|(?:config|settings)_(?:set|write|update|edit)(?:_|$)",
        r")",
    ))
    .expect("sensitive pattern family is a valid regex")
});

static MODERATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:^|_)(?:",
        r"(?:create|insert|update|write|modify|upload|append|publish|generate|replace|install",
        r"|patch|post|send|save|edit|apply|push|copy|rebase|checkout)[a-z0-9]*",
        r"|(?:add|put|set|new|make|mkdir|cp|tag|fork|commit|merge)(?:_|$)",
        r")",
    ))
    .expect("moderate pattern family is a valid regex")
});

static SAFE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:^|_)(?:",
        r"(?:read|get|list|search|find|fetch|query|show|view|describe|inspect|lookup|count",
        r"|check|status|browse|preview|explain|summari[sz]e|validate|grep|glob|whoami|version)[a-z0-9]*",
        r"|(?:ls|cat|log|logs|head|tail|stat|diff|tree|info|echo|ping|help)(?:_|$)",
        r")",
    ))
    .expect("safe pattern family is a valid regex")
});

/// Pattern families in precedence order: the most conservative match wins.
static FAMILIES: LazyLock<[(RiskTier, &'static Regex); 3]> = LazyLock::new(|| {
    [
        (RiskTier::Sensitive, &*SENSITIVE_RE),
        (RiskTier::Moderate, &*MODERATE_RE),
        (RiskTier::Safe, &*SAFE_RE),
    ]
});

/// Maps tool names to risk tiers. Total: never fails, never returns `Safe` for an unknown name.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    table: HashMap<String, RiskTier>,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskClassifier {
    /// Classifier backed by the builtin curated table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: BUILTIN_TABLE
                .iter()
                .map(|(name, tier)| ((*name).to_owned(), *tier))
                .collect(),
        }
    }

    /// Classifier with no curated entries; pattern families only.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RiskConfig) -> Self {
        let base = if config.builtin_table {
            Self::new()
        } else {
            Self::empty()
        };
        base.with_overrides(
            config
                .overrides
                .iter()
                .map(|(name, tier)| (name.clone(), *tier)),
        )
    }

    /// Merge entries over the curated table. Later entries replace earlier ones.
    #[must_use]
    pub fn with_overrides<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, RiskTier)>,
    {
        self.table.extend(entries);
        self
    }

    #[must_use]
    pub fn classify(&self, tool_name: &str) -> RiskTier {
        if let Some(tier) = self.table.get(tool_name) {
            return *tier;
        }
        Self::classify_by_pattern(tool_name).unwrap_or(RiskTier::Moderate)
    }

    #[must_use]
    pub fn is_curated(&self, tool_name: &str) -> bool {
        self.table.contains_key(tool_name)
    }

    #[must_use]
    pub fn curated_len(&self) -> usize {
        self.table.len()
    }

    /// First pattern family matching the normalized name, if any.
    #[must_use]
    pub fn classify_by_pattern(tool_name: &str) -> Option<RiskTier> {
        let normalized = normalize(tool_name);
        FAMILIES
            .iter()
            .find(|(_, re)| re.is_match(&normalized))
            .map(|(tier, _)| *tier)
    }
}

/// Lowercase snake form: camelCase boundaries and separators become `_`.
fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            prev_lower = true;
        } else {
            out.push('_');
            prev_lower = false;
        }
    }
    out
}
