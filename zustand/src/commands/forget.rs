//! Remove the recorded execution of a task

use super::{blocking, CommandResult};
use convenient_history::{ExecutionHistoryStore, FileExecutionHistoryStore, HistoryConfig};

/// Forget `task`; succeeds whether or not history existed
pub async fn execute(config: &HistoryConfig, task: &str) -> CommandResult {
    let root = config.root.clone();
    let task_path = task.to_string();
    let removed = blocking(move || FileExecutionHistoryStore::new(root)?.remove(&task_path)).await?;

    if removed {
        println!("Removed execution history of '{task}'");
    } else {
        println!("No execution history recorded for '{task}'");
    }
    Ok(())
}
