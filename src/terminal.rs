use std::io::IsTerminal;

use dialoguer::Confirm;
use warden_core::{ArgsView, ConfirmError, ConfirmRequest, Confirmer};

/// Asks the operator on the controlling terminal.
///
/// Unavailable when stdin is not a terminal, so piped sessions always deny.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    async fn ask(&self, request: &ConfirmRequest) -> Result<bool, ConfirmError> {
        if !std::io::stdin().is_terminal() {
            return Err(ConfirmError::Unavailable);
        }

        let args = serde_json::to_string_pretty(&request.args)
            .map_err(|e| ConfirmError::Other(e.to_string()))?;
        let prompt = format!(
            "Allow {}/{} (risk: {}, mode: {})?",
            request.server, request.tool, request.risk, request.mode
        );
        let full = request.args_view == ArgsView::Full;

        tokio::task::spawn_blocking(move || {
            if full {
                eprintln!("{args}");
            } else if Confirm::new()
                .with_prompt("Show arguments first?")
                .default(false)
                .interact()
                .map_err(map_dialoguer)?
            {
                eprintln!("{args}");
            }
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .map_err(map_dialoguer)
        })
        .await
        .map_err(|e| ConfirmError::Other(e.to_string()))?
    }
}

fn map_dialoguer(err: dialoguer::Error) -> ConfirmError {
    ConfirmError::Io(std::io::Error::from(err))
}
