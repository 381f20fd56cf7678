use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Warden - security mediation for agent tool calls
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (falls back to WARDEN_CONFIG, then config/default.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the risk tier of one or more tool names
    Classify {
        /// Tool names as advertised by a capability server
        #[arg(required = true)]
        tools: Vec<String>,
    },

    /// Evaluate a tool call against the active policy without running it
    Check {
        /// Capability server name
        #[arg(short, long)]
        server: String,

        /// Tool name
        #[arg(short, long)]
        tool: String,

        /// Call arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Resolve a `prompt` verdict by asking on this terminal
        #[arg(long)]
        ask: bool,
    },

    /// Summarize the audit trail of one month
    Audit {
        /// Month to read (YYYY-MM, defaults to the current month)
        #[arg(short, long)]
        month: Option<String>,

        /// Only include entries for this server
        #[arg(short, long)]
        server: Option<String>,

        /// List available months instead of summarizing
        #[arg(long)]
        list: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}
