//! Human confirmation for calls evaluated as `prompt`.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, watch};
use warden_policy::{PolicyMode, RiskTier};

use crate::error::DenialReason;

/// How the argument payload must be presented to the human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgsView {
    /// Show the complete payload before asking (`preview`, `strict`).
    Full,
    /// Collapsed by default, revealable through a sub-action.
    OnRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmRequest {
    pub server: String,
    pub tool: String,
    pub args: Value,
    pub risk: RiskTier,
    pub mode: PolicyMode,
    pub args_view: ArgsView,
}

impl ConfirmRequest {
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        tool: impl Into<String>,
        args: Value,
        risk: RiskTier,
        mode: PolicyMode,
    ) -> Self {
        let args_view = if mode.shows_full_args() {
            ArgsView::Full
        } else {
            ArgsView::OnRequest
        };
        Self {
            server: server.into(),
            tool: tool.into(),
            args,
            risk,
            mode,
            args_view,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    /// Non-interactive session or detached presentation layer.
    #[error("no confirmation surface available")]
    Unavailable,

    #[error("confirmation I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Presentation layer contract: ask a human whether a tool call may run.
///
/// Implementations must honor [`ConfirmRequest::args_view`]: with
/// [`ArgsView::Full`] the payload is displayed before the question.
pub trait Confirmer: Send + Sync {
    /// # Errors
    ///
    /// Any error is treated as a denial.
    fn ask(
        &self,
        request: &ConfirmRequest,
    ) -> impl Future<Output = Result<bool, ConfirmError>> + Send;
}

impl<C: Confirmer + ?Sized> Confirmer for Arc<C> {
    fn ask(
        &self,
        request: &ConfirmRequest,
    ) -> impl Future<Output = Result<bool, ConfirmError>> + Send {
        (**self).ask(request)
    }
}

/// Confirmer for sessions without a human. Every request is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConfirmer;

impl Confirmer for NoConfirmer {
    async fn ask(&self, _request: &ConfirmRequest) -> Result<bool, ConfirmError> {
        Err(ConfirmError::Unavailable)
    }
}

/// Resolved answer of the gate. Only `Approved` lets the call run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Approved,
    Rejected,
    Unavailable,
    Cancelled,
}

impl Confirmation {
    #[must_use]
    pub fn is_approved(self) -> bool {
        self == Self::Approved
    }

    #[must_use]
    pub fn denial_reason(self) -> Option<DenialReason> {
        match self {
            Self::Approved => None,
            Self::Rejected => Some(DenialReason::Rejected),
            Self::Unavailable => Some(DenialReason::Unavailable),
            Self::Cancelled => Some(DenialReason::Cancelled),
        }
    }
}

/// Serializes confirmation requests through a single slot.
///
/// Requests are presented one at a time in the order they reached the gate
/// (the slot is a fair mutex). Once the shutdown signal fires, queued and
/// in-flight requests resolve as [`Confirmation::Cancelled`].
#[derive(Debug)]
pub struct ConfirmationGate<C> {
    confirmer: C,
    slot: Mutex<()>,
    shutdown: watch::Receiver<bool>,
}

impl<C: Confirmer> ConfirmationGate<C> {
    #[must_use]
    pub fn new(confirmer: C, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            confirmer,
            slot: Mutex::new(()),
            shutdown,
        }
    }

    #[must_use]
    pub fn confirmer(&self) -> &C {
        &self.confirmer
    }

    pub async fn confirm(&self, request: &ConfirmRequest) -> Confirmation {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Confirmation::Cancelled;
        }

        let _slot = tokio::select! {
            biased;
            () = shutdown_signal(&mut shutdown) => return Confirmation::Cancelled,
            slot = self.slot.lock() => slot,
        };

        tracing::debug!(
            server = %request.server,
            tool = %request.tool,
            risk = %request.risk,
            mode = %request.mode,
            "awaiting confirmation"
        );

        let answer = tokio::select! {
            biased;
            () = shutdown_signal(&mut shutdown) => return Confirmation::Cancelled,
            answer = self.confirmer.ask(request) => answer,
        };

        match answer {
            Ok(true) => Confirmation::Approved,
            Ok(false) => Confirmation::Rejected,
            Err(e) => {
                tracing::warn!(
                    server = %request.server,
                    tool = %request.tool,
                    "confirmation failed, denying: {e}"
                );
                Confirmation::Unavailable
            }
        }
    }
}

/// Resolves once the flag is set. A dropped sender never resolves.
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
