//! Zustand command-line interface
//!
//! Zustand inspects the execution history recorded by `convenient-history`:
//! - `show`: Print the recorded execution of a task
//! - `diff`: Compare files on disk against the recorded execution
//! - `forget`: Remove the history of a task
//! - `list`: List tasks with recorded history

use clap::{Parser, Subcommand, ValueEnum};
use convenient_history::{HistoryConfig, HistoryResult, PathNormalization};
use std::path::PathBuf;

pub mod diff;
pub mod forget;
pub mod list;
pub mod show;

/// Result type shared by all commands
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Errors raised by the command layer itself
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// A `--input`/`--output` argument was not `NAME=PATH`
    #[error("Invalid property '{0}', expected NAME=PATH")]
    InvalidProperty(String),

    /// The task has no recorded execution
    #[error("No execution history for task '{0}'")]
    NoHistory(String),
}

/// Zustand - inspect incremental build execution history
#[derive(Parser)]
#[command(name = "zustand")]
#[command(about = "Inspect, diff and clear recorded task execution history")]
#[command(version)]
pub struct Cli {
    /// History directory (defaults to $ZUSTAND_HISTORY_DIR or .zustand)
    #[arg(long, global = true)]
    pub history_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Effective history configuration
    pub fn config(&self) -> HistoryConfig {
        let config = HistoryConfig::from_env();
        match &self.history_dir {
            Some(dir) => config.with_root(dir),
            None => config,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the recorded execution of a task
    Show {
        /// Task path, e.g. ":app:compile"
        task: String,

        /// Print the raw history entry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare input and output files against the recorded execution
    Diff {
        /// Task path
        task: String,

        /// Input file property as NAME=PATH (repeatable)
        #[arg(short, long = "input", value_name = "NAME=PATH")]
        inputs: Vec<String>,

        /// Output file property as NAME=PATH (repeatable)
        #[arg(short, long = "output", value_name = "NAME=PATH")]
        outputs: Vec<String>,

        /// Path normalization applied to input files
        #[arg(long, value_enum, default_value = "relative")]
        normalization: Normalization,
    },

    /// Remove the recorded execution of a task
    Forget {
        /// Task path
        task: String,
    },

    /// List tasks with recorded executions
    List,
}

/// Command-line spelling of [`PathNormalization`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Normalization {
    /// Full absolute path
    Absolute,
    /// Path relative to the root
    Relative,
    /// File name only
    NameOnly,
    /// Content only
    Ignored,
}

impl From<Normalization> for PathNormalization {
    fn from(value: Normalization) -> Self {
        match value {
            Normalization::Absolute => Self::Absolute,
            Normalization::Relative => Self::Relative,
            Normalization::NameOnly => Self::NameOnly,
            Normalization::Ignored => Self::Ignored,
        }
    }
}

/// Run blocking store work off the async runtime
pub async fn blocking<T, F>(work: F) -> CommandResult<T>
where
    F: FnOnce() -> HistoryResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}

/// Split `NAME=PATH` into its parts
pub fn parse_property(spec: &str) -> Result<(String, PathBuf), CliError> {
    match spec.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(CliError::InvalidProperty(spec.to_string())),
    }
}

/// Render a unix timestamp in milliseconds
pub fn format_millis(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map_or_else(|| format!("{millis} ms"), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
