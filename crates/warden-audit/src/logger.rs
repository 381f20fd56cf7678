use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::entry::AuditEntry;
use crate::error::AuditError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_dir")]
    pub directory: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            directory: default_audit_dir(),
        }
    }
}

fn default_audit_dir() -> PathBuf {
    dirs::data_local_dir().map_or_else(
        || PathBuf::from(".warden").join("audit"),
        |d| d.join("warden").join("audit"),
    )
}

/// File name holding the entries of `month` (`YYYY-MM`).
#[must_use]
pub fn log_file_name(month: &str) -> String {
    format!("audit-{month}.jsonl")
}

#[derive(Debug)]
enum Command {
    Record(Box<AuditEntry>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the audit writer task.
///
/// Every entry goes through a single task, so lines are appended whole and
/// in the order [`record`](Self::record) was called. Recording never fails
/// from the caller's point of view: write errors are logged, counted, and
/// dropped.
#[derive(Debug)]
pub struct AuditLogger {
    tx: mpsc::UnboundedSender<Command>,
    directory: PathBuf,
    failures: Arc<AtomicU64>,
}

impl AuditLogger {
    /// Start the writer task. Must be called inside a tokio runtime.
    ///
    /// The directory is created lazily on the first write.
    #[must_use]
    pub fn spawn(config: &AuditConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let failures = Arc::new(AtomicU64::new(0));
        let writer = Writer {
            directory: config.directory.clone(),
            current: None,
            torn: None,
            failures: Arc::clone(&failures),
        };
        tokio::spawn(writer.run(rx));
        Self {
            tx,
            directory: config.directory.clone(),
            failures,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn record(&self, entry: AuditEntry) {
        if self.tx.send(Command::Record(Box::new(entry))).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(target: "audit", "audit writer stopped, entry dropped");
        }
    }

    /// Wait until every entry recorded before this call has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Drain pending entries and stop the writer. Later records are dropped.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Number of entries that could not be persisted.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

struct Writer {
    directory: PathBuf,
    current: Option<(String, tokio::fs::File)>,
    /// Month whose file may end in a partial line after a failed write.
    torn: Option<String>,
    failures: Arc<AtomicU64>,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Record(entry) => {
                    if let Err(e) = self.append(&entry).await {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        self.current = None;
                        tracing::error!(
                            target: "audit",
                            server = %entry.server,
                            tool = %entry.tool,
                            "failed to write audit entry: {e}"
                        );
                    }
                }
                Command::Flush(ack) => {
                    let _ = ack.send(());
                }
                Command::Shutdown(ack) => {
                    rx.close();
                    while let Ok(pending) = rx.try_recv() {
                        match pending {
                            Command::Record(entry) => {
                                if let Err(e) = self.append(&entry).await {
                                    self.failures.fetch_add(1, Ordering::Relaxed);
                                    tracing::error!(target: "audit", "failed to write audit entry: {e}");
                                }
                            }
                            Command::Flush(other) | Command::Shutdown(other) => {
                                let _ = other.send(());
                            }
                        }
                    }
                    let _ = ack.send(());
                    break;
                }
            }
        }
        tracing::debug!(target: "audit", "audit writer stopped");
    }

    async fn append(&mut self, entry: &AuditEntry) -> Result<(), AuditError> {
        let month = entry.month_key();
        let json = serde_json::to_string(entry)?;
        let resume = self.torn.as_deref() == Some(month.as_str());
        let mut line = String::with_capacity(json.len() + 2);
        if resume {
            line.push('\n');
        }
        line.push_str(&json);
        line.push('\n');

        let file = self.file_for(&month).await?;
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        match written {
            Ok(()) => {
                if resume {
                    self.torn = None;
                }
                Ok(())
            }
            Err(e) => {
                self.torn = Some(month);
                Err(e.into())
            }
        }
    }

    async fn file_for(&mut self, month: &str) -> Result<&mut tokio::fs::File, AuditError> {
        let file = match self.current.take() {
            Some((open_month, file)) if open_month == month => file,
            _ => {
                tokio::fs::create_dir_all(&self.directory).await?;
                let path = self.directory.join(log_file_name(month));
                tracing::debug!(target: "audit", path = %path.display(), "opening audit file");
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?
            }
        };
        let (_, file) = self.current.insert((month.to_owned(), file));
        Ok(file)
    }
}
