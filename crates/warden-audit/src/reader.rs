use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::entry::{AuditEntry, AuditOutcome};
use crate::error::AuditError;
use crate::logger::log_file_name;

/// Read-only access to the monthly audit files.
#[derive(Debug, Clone)]
pub struct AuditReader {
    directory: PathBuf,
}

impl AuditReader {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Entries of `month` (`YYYY-MM`) in file order.
    ///
    /// A missing file yields no entries. Lines that fail to parse are skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if `month` is malformed or the file cannot be read.
    pub async fn read_month(&self, month: &str) -> Result<Vec<AuditEntry>, AuditError> {
        validate_month(month)?;
        let path = self.directory.join(log_file_name(month));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        "skipping malformed audit line: {e}"
                    );
                }
            }
        }
        Ok(entries)
    }

    /// Months that have an audit file, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub async fn list_months(&self) -> Result<Vec<String>, AuditError> {
        let mut dir = match tokio::fs::read_dir(&self.directory).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut months = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(month) = name
                .strip_prefix("audit-")
                .and_then(|rest| rest.strip_suffix(".jsonl"))
                && validate_month(month).is_ok()
            {
                months.push(month.to_owned());
            }
        }
        months.sort();
        Ok(months)
    }
}

fn validate_month(month: &str) -> Result<(), AuditError> {
    let shaped = month.len() == 7
        && month
            .char_indices()
            .all(|(i, c)| if i == 4 { c == '-' } else { c.is_ascii_digit() });
    if shaped && NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d").is_ok() {
        Ok(())
    } else {
        Err(AuditError::InvalidMonth(month.to_owned()))
    }
}

/// A call made more than once with identical arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedCall {
    pub server: String,
    pub tool: String,
    pub args_hash: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub total: usize,
    pub by_outcome: BTreeMap<AuditOutcome, usize>,
    /// Keyed by `server/tool`.
    pub by_tool: BTreeMap<String, usize>,
    pub repeated: Vec<RepeatedCall>,
}

impl AuditSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> Self {
        let mut summary = Self::default();
        let mut calls: BTreeMap<(&str, &str, &str), usize> = BTreeMap::new();
        for entry in entries {
            summary.total += 1;
            *summary.by_outcome.entry(entry.outcome).or_default() += 1;
            *summary
                .by_tool
                .entry(format!("{}/{}", entry.server, entry.tool))
                .or_default() += 1;
            *calls
                .entry((entry.server.as_str(), entry.tool.as_str(), entry.args_hash.as_str()))
                .or_default() += 1;
        }
        summary.repeated = calls
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((server, tool, args_hash), count)| RepeatedCall {
                server: server.to_owned(),
                tool: tool.to_owned(),
                args_hash: args_hash.to_owned(),
                count,
            })
            .collect();
        summary
    }

    #[must_use]
    pub fn count(&self, outcome: AuditOutcome) -> usize {
        self.by_outcome.get(&outcome).copied().unwrap_or(0)
    }
}
