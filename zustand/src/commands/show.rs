//! Show the recorded execution of a task

use super::{blocking, format_millis, CliError, CommandResult};
use convenient_history::{ExecutionHistoryStore, FileExecutionHistoryStore, HistoryConfig};

/// Print the history entry of `task`
pub async fn execute(config: &HistoryConfig, task: &str, json: bool) -> CommandResult {
    let root = config.root.clone();
    let task_path = task.to_string();
    let record =
        blocking(move || FileExecutionHistoryStore::new(root)?.load_record(&task_path)).await?;

    let Some(record) = record else {
        return Err(CliError::NoHistory(task.to_string()).into());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let state = &record.state;
    let snapshot = &state.snapshot;
    println!("Task:           {}", record.task_path);
    println!("Recorded:       {}", format_millis(record.stored_at_millis));
    println!("Build:          {}", state.origin.build_invocation_id);
    println!("Execution time: {:?}", state.origin.execution_time);
    println!("Successful:     {}", if state.successful { "yes" } else { "no" });
    println!("Implementation: {}", snapshot.implementation);
    for additional in &snapshot.additional_implementations {
        println!("  action:       {additional}");
    }

    println!();
    println!("Input properties:");
    for (name, value) in &snapshot.input_properties {
        println!("  {name}: {}", value.hash().short());
    }
    println!("Input files:");
    for (name, fingerprint) in &snapshot.input_file_properties {
        println!("  {name}: {fingerprint}");
    }
    println!("Output files:");
    for (name, fingerprint) in &snapshot.output_file_properties {
        println!("  {name}: {fingerprint}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_show_without_history_fails() {
        let tmp = TempDir::new().unwrap();
        let config = HistoryConfig::default().with_root(tmp.path());
        let err = execute(&config, ":missing", false).await.unwrap_err();
        assert_eq!(err.to_string(), "No execution history for task ':missing'");
    }
}
