//! Append-only audit trail: one JSON line per terminal tool-call outcome,
//! grouped into monthly files.

mod entry;
mod error;
mod logger;
mod reader;

pub use entry::{AuditEntry, AuditOutcome, Verdict, hash_args};
pub use error::AuditError;
pub use logger::{AuditConfig, AuditLogger, log_file_name};
pub use reader::{AuditReader, AuditSummary, RepeatedCall};
