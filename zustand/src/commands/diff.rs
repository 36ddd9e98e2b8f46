//! Compare files on disk against the recorded execution of a task
//!
//! Implementation and input values cannot be observed from the command line,
//! so the recorded ones are assumed unchanged and only files are compared.

use super::{blocking, parse_property, CliError, CommandResult, Normalization};
use convenient_history::{
    DetectionOptions, ExecutionHistoryStore, ExecutionSnapshot, ExecutionStateChanges,
    FileExecutionHistoryStore, FingerprinterRegistry, HistoryConfig, OverlappingOutputs,
    TaskIdentity, TaskProperties,
};
use tracing::debug;

/// Fingerprint the given roots and report changes against history
pub async fn execute(
    config: &HistoryConfig,
    task: &str,
    inputs: &[String],
    outputs: &[String],
    normalization: Normalization,
) -> CommandResult {
    let mut builder = TaskProperties::builder().incremental(true);
    for spec in inputs {
        let (name, root) = parse_property(spec)?;
        builder = builder.input_files(name, normalization.into(), [root]);
    }
    for spec in outputs {
        let (name, root) = parse_property(spec)?;
        builder = builder.output_files(name, [root]);
    }
    let properties = builder.build();

    let root = config.root.clone();
    let max_reasons = config.max_reasons;
    let identity = TaskIdentity::new(task);

    let report = blocking(move || {
        let Some(previous) = FileExecutionHistoryStore::new(root)?.load(identity.path())? else {
            return Ok(None);
        };

        let mut current = ExecutionSnapshot::capture(
            previous.snapshot.implementation.clone(),
            previous.snapshot.additional_implementations.clone(),
            Vec::new(),
            &properties,
            &FingerprinterRegistry::new(),
            Some(&previous),
        )?;
        current.input_properties = previous.snapshot.input_properties.clone();
        debug!(
            "Captured {} input and {} output propert(ies)",
            current.input_file_properties.len(),
            current.output_file_properties.len()
        );

        let overlap = OverlappingOutputs::detect(
            Some(&previous.snapshot.output_file_properties),
            &current.output_file_properties,
        );
        let changes = ExecutionStateChanges::detect(
            &identity,
            &previous,
            &current,
            DetectionOptions {
                incremental: true,
                allow_overlapping_outputs: overlap.is_some(),
                max_reasons,
            },
        );
        Ok(Some((changes, overlap)))
    })
    .await?;

    let Some((changes, overlap)) = report else {
        return Err(CliError::NoHistory(task.to_string()).into());
    };

    if let Some(overlap) = &overlap {
        println!("Overlapping outputs: {overlap}");
    }

    if changes.rebuild_required {
        println!("Task '{task}' requires a rebuild:");
        for reason in &changes.rebuild_reasons {
            println!("  - {reason}");
        }
    } else if changes.is_up_to_date() {
        println!("Task '{task}' is up to date");
    } else {
        println!("Task '{task}' can run incrementally");
    }

    if !changes.input_file_changes.is_empty() {
        println!();
        println!("Input changes ({}):", changes.input_file_changes.len());
        for change in &changes.input_file_changes {
            println!("  {change}");
        }
    }
    if !changes.output_file_changes.is_empty() {
        println!();
        println!("Output changes ({}):", changes.output_file_changes.len());
        for change in &changes.output_file_changes {
            println!("  {change}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_history::{
        BuildInvocationId, ImplementationSnapshot, OriginMetadata, PathNormalization,
    };
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_diff_against_recorded_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.c"), "int main;").unwrap();

        let history = tmp.path().join("history-root");
        let properties = TaskProperties::builder()
            .input_files("sources", PathNormalization::Relative, [src.clone()])
            .build();
        let snapshot = ExecutionSnapshot::capture(
            ImplementationSnapshot::from_source("Compile", "cc"),
            vec![],
            Vec::new(),
            &properties,
            &FingerprinterRegistry::new(),
            None,
        )
        .unwrap();
        FileExecutionHistoryStore::new(&history)
            .unwrap()
            .store(
                ":compile",
                OriginMetadata::new(BuildInvocationId::generate(), Duration::from_millis(1)),
                snapshot,
                true,
            )
            .unwrap();

        fs::write(src.join("main.c"), "int main = 1;").unwrap();

        let config = HistoryConfig::default().with_root(&history);
        let input = format!("sources={}", src.display());
        execute(&config, ":compile", &[input], &[], Normalization::Relative)
            .await
            .unwrap();

        let err = execute(&config, ":other", &[], &[], Normalization::Relative)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No execution history"));

        let missing_path = ["sources".to_string()];
        let err = execute(&config, ":compile", &missing_path, &[], Normalization::Relative)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected NAME=PATH"));
    }
}
