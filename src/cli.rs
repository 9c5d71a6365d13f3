//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Mibuntu - lesson planning with a curriculum-grounded AI assistant
#[derive(Parser)]
#[command(
    name = "mibuntu",
    about = "Plan lessons with an AI assistant grounded in curriculum modules and your own documents",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/mibuntu/logs/mibuntu.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (overrides config)
    #[arg(short, long, global = true, help = "Log level: trace, debug, info, warn, error")]
    pub log_level: Option<String>,

    /// Enable verbose output (same as --log-level debug)
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start an interactive planning session
    Plan {
        /// Curriculum module id (repeatable)
        #[arg(short, long = "module", value_name = "ID")]
        modules: Vec<String>,

        /// Education cycle, e.g. cycle1, cycle2, cycle3
        #[arg(long)]
        cycle: String,

        /// What the lesson should cover; sent as the opening message
        #[arg(short, long)]
        wishes: Option<String>,

        /// Reference file to upload before the session starts (repeatable)
        #[arg(short, long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
    },

    /// Browse saved conversations
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Show the interaction counter and subscription tier
    Usage {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// History subcommands
#[derive(Subcommand)]
pub enum HistoryCommand {
    /// List saved conversations grouped by age
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print a saved conversation
    Show {
        /// Conversation id
        id: String,
    },

    /// Delete a saved conversation
    Delete {
        /// Conversation id
        id: String,
    },

    /// Continue a saved conversation interactively
    Resume {
        /// Conversation id
        id: String,
    },
}

/// Output format for history/usage commands
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mibuntu")
        .join("logs")
        .join("mibuntu.log");
    debug!(?path, "get_log_path: returning path");
    path
}
