//! `ensemble run` implementation.

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use ensemble_orchestrator::{FailurePolicy, TaskOutcome, TaskStatus, WorkflowConfig};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Runs the workflow at `path` and prints every task's outcome.
///
/// With `progress`, status transitions are streamed to stderr while the run
/// is in flight. Returns `Ok(false)` when at least one task did not succeed.
pub async fn execute(
    path: &Path,
    json: bool,
    fail_fast: bool,
    max_parallel: Option<usize>,
    progress: bool,
) -> Result<bool> {
    let config = WorkflowConfig::load(path)
        .with_context(|| format!("Failed to load workflow {}", path.display()))?;
    let workflow = config.build().context("Failed to build workflow")?;

    if workflow.router.is_empty() {
        eprintln!(
            "{}",
            "Warning: no LLM backends available; every task will fail.".yellow()
        );
    }

    let mut executor = workflow.executor;
    if fail_fast {
        executor = executor.with_policy(FailurePolicy::FailFast);
    }
    if let Some(n) = max_parallel {
        executor = executor.with_max_parallel(n);
    }

    let order: Vec<String> =
        executor.graph().execution_order().into_iter().map(str::to_string).collect();
    let reporter = progress.then(|| {
        let mut events = executor.subscribe();
        tokio::spawn(async move {
            // Ends when the executor, and with it the sender, is dropped.
            while let Ok(event) = events.recv().await {
                eprintln!("[{}] {}", status_badge(event.status, status_name(event.status)), event.task);
            }
        })
    });
    let outcomes = executor.run().await;
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    workflow.memory.flush().await;
    info!(summaries = workflow.memory.summaries().len(), "Memory compactions settled");

    if json {
        print_json(&order, &outcomes)?;
    } else {
        print_text(&order, &outcomes);
    }

    Ok(outcomes.values().all(|o| !o.is_error()))
}

fn print_json(order: &[String], outcomes: &HashMap<String, TaskOutcome>) -> Result<()> {
    let mut map = serde_json::Map::with_capacity(order.len());
    for description in order {
        if let Some(outcome) = outcomes.get(description) {
            map.insert(description.clone(), serde_json::to_value(outcome)?);
        }
    }
    println!("{}", serde_json::to_string_pretty(&map)?);
    Ok(())
}

fn print_text(order: &[String], outcomes: &HashMap<String, TaskOutcome>) {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();

    for description in order {
        let Some(outcome) = outcomes.get(description) else { continue };
        let label = status_label(outcome);
        *counts.entry(label).or_default() += 1;

        println!("[{}] {}", status_badge(outcome.status(), label), description.bold());
        for line in outcome.text().lines() {
            println!("    {line}");
        }
    }

    println!();
    println!(
        "{} tasks: {} succeeded, {} failed, {} skipped, {} not executed",
        order.len(),
        counts.get("succeeded").copied().unwrap_or(0),
        counts.get("failed").copied().unwrap_or(0),
        counts.get("skipped").copied().unwrap_or(0),
        counts.get("not executed").copied().unwrap_or(0),
    );
}

fn status_badge(status: TaskStatus, label: &str) -> ColoredString {
    match status {
        TaskStatus::Succeeded => label.green(),
        TaskStatus::Skipped => label.yellow(),
        TaskStatus::Pending => label.dimmed(),
        TaskStatus::Executing => label.cyan(),
        TaskStatus::Failed => label.red(),
    }
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Executing => "executing",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::Failed => "failed",
        TaskStatus::Skipped => "skipped",
    }
}

fn status_label(outcome: &TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Succeeded { .. } => "succeeded",
        TaskOutcome::Failed { .. } => "failed",
        TaskOutcome::Skipped { .. } => "skipped",
        TaskOutcome::NotExecuted => "not executed",
    }
}
