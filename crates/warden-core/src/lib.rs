//! Tool-call mediation: decide, confirm, execute with a deadline, audit.

pub mod config;
pub mod confirm;
pub mod error;
pub mod executor;
pub mod guard;
pub mod manager;

pub use config::Config;
pub use confirm::{
    ArgsView, ConfirmError, ConfirmRequest, Confirmation, ConfirmationGate, Confirmer, NoConfirmer,
};
pub use error::{DenialReason, SecurityError, SecurityErrorKind, ToolCallError};
pub use executor::{ToolCall, ToolError, ToolExecutor};
pub use guard::ExecutionGuard;
pub use manager::SecurityManager;
pub use warden_audit as audit;
pub use warden_policy as policy;
