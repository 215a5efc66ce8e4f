//! Dependency-ordered task execution.
//!
//! Tasks run in the graph's execution order. A task whose dependency failed
//! is skipped without invoking its agent, and the skip propagates to every
//! transitive dependent. Only successful dependency results are passed to an
//! agent.
//!
//! Status transitions are broadcast as [`TaskEvent`]s to subscribers of
//! [`TaskGraphExecutor::subscribe`].

use super::dag::TaskGraph;
use super::task::{Task, TaskOutcome, TaskStatus};
use crate::agents::Agent;
use ensemble_abstraction::is_failure_text;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

/// What to do after a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Keep going; dependents of the failed task are skipped.
    #[default]
    Continue,
    /// Stop scheduling new tasks; unreached tasks report `NotExecuted`.
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "continue" => Ok(Self::Continue),
            "fail_fast" => Ok(Self::FailFast),
            other => Err(format!("unknown failure policy '{other}' (expected continue or fail_fast)")),
        }
    }
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Failure handling.
    pub failure_policy: FailurePolicy,
    /// Maximum tasks in flight; 1 runs strictly sequentially.
    pub max_parallel: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { failure_policy: FailurePolicy::Continue, max_parallel: 1 }
    }
}

/// Minimum capacity of the event channel.
const EVENT_CAPACITY: usize = 64;

/// A task status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    /// Task description.
    pub task: String,
    /// Status entered.
    pub status: TaskStatus,
}

enum Readiness {
    Ready(Vec<String>),
    Skip(TaskOutcome),
}

/// Runs a [`TaskGraph`] to completion.
pub struct TaskGraphExecutor {
    graph: TaskGraph,
    config: ExecutorConfig,
    actuator: Arc<Mutex<()>>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskGraphExecutor {
    /// Creates a sequential, fail-soft executor.
    pub fn new(graph: TaskGraph) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY.max(graph.len() * 2));
        Self {
            graph,
            config: ExecutorConfig::default(),
            actuator: Arc::new(Mutex::new(())),
            events,
        }
    }

    /// Subscribes to status transitions of the next run.
    ///
    /// Each executed task reports `Executing` when its agent starts, then
    /// `Succeeded` or `Failed`. Skipped tasks report `Skipped` only. Tasks a
    /// fail-fast run never reaches report nothing.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Replaces the executor settings.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Allows up to `max_parallel` tasks in flight.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.config.max_parallel = max_parallel.max(1);
        self
    }

    /// The graph being executed.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Runs every task and returns outcomes keyed by task description.
    ///
    /// Every task appears in the map. Consumes the executor, so no task can
    /// run twice.
    pub async fn run(self) -> HashMap<String, TaskOutcome> {
        info!(
            tasks = self.graph.len(),
            max_parallel = self.config.max_parallel,
            policy = ?self.config.failure_policy,
            "Starting task graph run"
        );

        let mut outcomes = if self.config.max_parallel <= 1 {
            self.run_sequential().await
        } else {
            self.run_concurrent().await
        };

        for task in self.graph.tasks() {
            outcomes.entry(task.description.clone()).or_insert(TaskOutcome::NotExecuted);
        }

        let failed = outcomes.values().filter(|o| o.is_error()).count();
        info!(tasks = outcomes.len(), failed, "Task graph run finished");
        outcomes
    }

    async fn run_sequential(&self) -> HashMap<String, TaskOutcome> {
        let mut outcomes = HashMap::with_capacity(self.graph.len());

        for &i in self.graph.order_indices() {
            let task = &self.graph.tasks()[i];
            let outcome = match Self::readiness(task, &outcomes) {
                Readiness::Skip(outcome) => {
                    emit(&self.events, &task.description, outcome.status());
                    outcome
                }
                Readiness::Ready(deps) => {
                    execute_task(
                        Arc::clone(&task.agent),
                        task.description.clone(),
                        task.exclusive,
                        deps,
                        Arc::clone(&self.actuator),
                        self.events.clone(),
                    )
                    .await
                }
            };
            let stop = self.should_stop(&outcome);
            outcomes.insert(task.description.clone(), outcome);
            if stop {
                warn!(task = %task.description, "Fail-fast policy stopping run");
                break;
            }
        }
        outcomes
    }

    async fn run_concurrent(&self) -> HashMap<String, TaskOutcome> {
        let mut outcomes: HashMap<String, TaskOutcome> = HashMap::with_capacity(self.graph.len());
        let mut pending: Vec<usize> = self.graph.order_indices().to_vec();
        let mut in_flight = FuturesUnordered::new();
        let mut stopped = false;

        loop {
            if !stopped {
                let mut k = 0;
                while k < pending.len() && in_flight.len() < self.config.max_parallel {
                    let task = &self.graph.tasks()[pending[k]];
                    if !task.depends_on.iter().all(|d| outcomes.contains_key(d)) {
                        k += 1;
                        continue;
                    }
                    pending.remove(k);
                    match Self::readiness(task, &outcomes) {
                        Readiness::Skip(outcome) => {
                            emit(&self.events, &task.description, outcome.status());
                            outcomes.insert(task.description.clone(), outcome);
                        }
                        Readiness::Ready(deps) => {
                            let description = task.description.clone();
                            let run = execute_task(
                                Arc::clone(&task.agent),
                                description.clone(),
                                task.exclusive,
                                deps,
                                Arc::clone(&self.actuator),
                                self.events.clone(),
                            );
                            in_flight.push(async move { (description, run.await) });
                        }
                    }
                }
            }

            let Some((description, outcome)) = in_flight.next().await else { break };
            if self.should_stop(&outcome) && !stopped {
                warn!(task = %description, "Fail-fast policy stopping run");
                stopped = true;
            }
            outcomes.insert(description, outcome);
        }
        outcomes
    }

    fn should_stop(&self, outcome: &TaskOutcome) -> bool {
        self.config.failure_policy == FailurePolicy::FailFast && outcome.is_error()
    }

    fn readiness(task: &Task, outcomes: &HashMap<String, TaskOutcome>) -> Readiness {
        let mut results = Vec::with_capacity(task.depends_on.len());
        let mut failures = Vec::new();

        for dep in &task.depends_on {
            match outcomes.get(dep) {
                Some(TaskOutcome::Succeeded { output }) => results.push(output.clone()),
                Some(other) => failures.push((dep.clone(), other.text().to_string())),
                None => failures.push((dep.clone(), TaskOutcome::NotExecuted.text().to_string())),
            }
        }

        if failures.is_empty() {
            Readiness::Ready(results)
        } else {
            warn!(
                task = %task.description,
                failed_dependencies = failures.len(),
                "Skipping task due to dependency failure"
            );
            Readiness::Skip(TaskOutcome::skipped(failures))
        }
    }
}

fn emit(events: &broadcast::Sender<TaskEvent>, task: &str, status: TaskStatus) {
    // Sending fails only when nobody subscribed.
    let _ = events.send(TaskEvent { task: task.to_string(), status });
}

async fn execute_task(
    agent: Arc<dyn Agent>,
    description: String,
    exclusive: bool,
    dependency_results: Vec<String>,
    actuator: Arc<Mutex<()>>,
    events: broadcast::Sender<TaskEvent>,
) -> TaskOutcome {
    let _lease = if exclusive { Some(actuator.lock().await) } else { None };
    debug!(task = %description, agent = %agent.id(), exclusive, "Executing task");
    emit(&events, &description, TaskStatus::Executing);

    let result = AssertUnwindSafe(agent.execute(&description, &dependency_results))
        .catch_unwind()
        .await;

    let outcome = match result {
        Ok(Ok(output)) => {
            let text = output.into_text();
            if is_failure_text(&text) {
                TaskOutcome::Failed { error: text }
            } else {
                TaskOutcome::Succeeded { output: text }
            }
        }
        Ok(Err(e)) => TaskOutcome::failed(e.to_string()),
        Err(_) => TaskOutcome::failed(format!("agent '{}' panicked", agent.id())),
    };

    if let TaskOutcome::Failed { error } = &outcome {
        error!(task = %description, error = %error, "Task failed");
    } else {
        info!(task = %description, "Task succeeded");
    }
    emit(&events, &description, outcome.status());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("fail-fast".parse::<FailurePolicy>(), Ok(FailurePolicy::FailFast));
        assert_eq!("Continue".parse::<FailurePolicy>(), Ok(FailurePolicy::Continue));
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_default_config_is_sequential_fail_soft() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_parallel, 1);
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
    }
}
