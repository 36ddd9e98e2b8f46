//! List tasks with recorded history

use super::{blocking, format_millis, CommandResult};
use convenient_history::{ExecutionHistoryStore, FileExecutionHistoryStore, HistoryConfig};

/// Print every recorded task with its timestamp and outcome
pub async fn execute(config: &HistoryConfig) -> CommandResult {
    let root = config.root.clone();
    let records = blocking(move || {
        let store = FileExecutionHistoryStore::new(root)?;
        let mut records = Vec::new();
        for task_path in store.task_paths()? {
            if let Some(record) = store.load_record(&task_path)? {
                records.push(record);
            }
        }
        Ok(records)
    })
    .await?;

    if records.is_empty() {
        println!("No execution history in {}", config.root.display());
        return Ok(());
    }

    for record in &records {
        println!(
            "{:<40} {}  {}",
            record.task_path,
            format_millis(record.stored_at_millis),
            if record.state.successful { "ok" } else { "FAILED" }
        );
    }
    println!();
    println!("{} task(s)", records.len());
    Ok(())
}
