//! History configuration

use crate::changes::MAX_REASONS;
use std::path::PathBuf;

/// Environment variable overriding the history directory
pub const HISTORY_DIR_ENV: &str = "ZUSTAND_HISTORY_DIR";

/// Where history lives and how change detection reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Directory holding execution history and the output index
    pub root: PathBuf,
    /// Maximum number of rebuild reasons reported per task
    pub max_reasons: usize,
    /// Persist the output index next to the history instead of keeping it in memory
    pub persist_output_index: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".zustand"),
            max_reasons: MAX_REASONS,
            persist_output_index: true,
        }
    }
}

impl HistoryConfig {
    /// Defaults, with the root taken from `ZUSTAND_HISTORY_DIR` when set
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = std::env::var_os(HISTORY_DIR_ENV).filter(|v| !v.is_empty()) {
            config.root = PathBuf::from(root);
        }
        config
    }

    /// Set the history directory
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the reason cap; values below one are raised to one
    #[must_use]
    pub fn with_max_reasons(mut self, max_reasons: usize) -> Self {
        self.max_reasons = max_reasons.max(1);
        self
    }

    /// Keep the output index in memory only
    #[must_use]
    pub fn with_in_memory_output_index(mut self) -> Self {
        self.persist_output_index = false;
        self
    }
}
