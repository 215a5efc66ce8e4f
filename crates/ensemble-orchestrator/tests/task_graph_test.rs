//! Integration tests for dependency-ordered execution.

use async_trait::async_trait;
use ensemble_abstraction::Model;
use ensemble_models::MockModel;
use ensemble_orchestrator::{
    Agent, AgentError, AgentOutput, FailurePolicy, ResilientRouter, SimpleAgent, Task, TaskGraph,
    TaskEvent, TaskGraphExecutor, TaskOutcome, TaskStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Agent that records its inputs and answers from a fixed script.
///
/// Tasks named in `fail_on` fail immediately; all others wait `delay` first.
struct RecordingAgent {
    id: String,
    fail_on: Vec<&'static str>,
    delay: Duration,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingAgent {
    fn new(fail_on: Vec<&'static str>) -> Arc<Self> {
        Self::with_delay(fail_on, Duration::ZERO)
    }

    fn with_delay(fail_on: Vec<&'static str>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: "recorder".to_string(),
            fail_on,
            delay,
            calls: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    fn invoked(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(task, _)| task.clone()).collect()
    }

    fn inputs_for(&self, task: &str) -> Option<Vec<String>> {
        self.calls.lock().unwrap().iter().find(|(t, _)| t == task).map(|(_, deps)| deps.clone())
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "records calls"
    }

    async fn execute(
        &self,
        input: &str,
        dependency_results: &[String],
    ) -> Result<AgentOutput, AgentError> {
        self.calls.lock().unwrap().push((input.to_string(), dependency_results.to_vec()));
        if self.fail_on.contains(&input) {
            return Ok(AgentOutput::Text(format!("Error: {input} could not finish")));
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(AgentOutput::Text(format!("done: {input}")))
    }
}

fn as_agent(agent: &Arc<RecordingAgent>) -> Arc<dyn Agent> {
    Arc::clone(agent) as Arc<dyn Agent>
}

#[tokio::test]
async fn test_failure_skips_transitive_dependents() {
    let agent = RecordingAgent::new(vec!["A"]);
    let graph = TaskGraph::new(vec![
        Task::new("A", as_agent(&agent)),
        Task::new("B", as_agent(&agent)).depends_on("A"),
        Task::new("C", as_agent(&agent)).depends_on("B"),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph).run().await;

    assert_eq!(results["A"].status(), TaskStatus::Failed);
    assert_eq!(results["B"].status(), TaskStatus::Skipped);
    assert_eq!(results["C"].status(), TaskStatus::Skipped);
    assert!(results["B"].text().contains("Error: A could not finish"));
    assert!(results["C"].text().contains("Error: A could not finish"));
    assert!(results.values().all(|o| o.text().starts_with("Error")));
    assert_eq!(agent.invoked(), vec!["A"]);
}

#[tokio::test]
async fn test_independent_tasks_end_to_end() {
    let router: Arc<dyn Model> = Arc::new(
        ResilientRouter::new(vec![Arc::new(MockModel::new("mock".to_string())) as Arc<dyn Model>])
            .with_retry_backoff(Duration::ZERO),
    );
    let inner = Arc::new(SimpleAgent::new("worker".to_string(), "does work".to_string(), router));
    let agent = Arc::new(CountingAgent { inner, calls: AtomicUsize::new(0) });

    let graph = TaskGraph::new(vec![
        Task::new("Book hotel", Arc::clone(&agent) as Arc<dyn Agent>),
        Task::new("Rent car", Arc::clone(&agent) as Arc<dyn Agent>),
        Task::new("Buy tickets", Arc::clone(&agent) as Arc<dyn Agent>),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph).run().await;

    assert_eq!(results.len(), 3);
    assert!(results.values().all(|o| !o.is_error()));
    assert_eq!(results["Rent car"].text(), "Mock response for: Rent car");
    assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
}

struct CountingAgent {
    inner: Arc<SimpleAgent>,
    calls: AtomicUsize,
}

#[async_trait]
impl Agent for CountingAgent {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    async fn execute(
        &self,
        input: &str,
        dependency_results: &[String],
    ) -> Result<AgentOutput, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(input, dependency_results).await
    }
}

#[tokio::test]
async fn test_only_successful_dependency_results_are_passed() {
    let agent = RecordingAgent::new(vec![]);
    let graph = TaskGraph::new(vec![
        Task::new("fetch", as_agent(&agent)),
        Task::new("parse", as_agent(&agent)),
        Task::new("report", as_agent(&agent)).depends_on("fetch").depends_on("parse"),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph).run().await;

    assert_eq!(results["report"], TaskOutcome::Succeeded { output: "done: report".to_string() });
    assert_eq!(
        agent.inputs_for("report"),
        Some(vec!["done: fetch".to_string(), "done: parse".to_string()])
    );
}

#[tokio::test]
async fn test_fail_fast_stops_and_marks_unreached() {
    let agent = RecordingAgent::new(vec!["second"]);
    let graph = TaskGraph::new(vec![
        Task::new("first", as_agent(&agent)),
        Task::new("second", as_agent(&agent)),
        Task::new("third", as_agent(&agent)),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph).with_policy(FailurePolicy::FailFast).run().await;

    assert!(!results["first"].is_error());
    assert_eq!(results["second"].status(), TaskStatus::Failed);
    assert_eq!(results["third"], TaskOutcome::NotExecuted);
    assert_eq!(results["third"].text(), "Error: task not executed");
    assert_eq!(agent.invoked(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_continue_policy_runs_unrelated_tasks() {
    let agent = RecordingAgent::new(vec!["first"]);
    let graph = TaskGraph::new(vec![
        Task::new("first", as_agent(&agent)),
        Task::new("second", as_agent(&agent)),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph).run().await;

    assert!(results["first"].is_error());
    assert!(!results["second"].is_error());
}

#[tokio::test]
async fn test_agent_error_is_failure_marked() {
    struct Broken;

    #[async_trait]
    impl Agent for Broken {
        fn id(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always errors"
        }
        async fn execute(&self, _: &str, _: &[String]) -> Result<AgentOutput, AgentError> {
            Err(AgentError::Other("tool crashed".to_string()))
        }
    }

    let graph = TaskGraph::new(vec![Task::new("x", Arc::new(Broken))]).unwrap();
    let results = TaskGraphExecutor::new(graph).run().await;
    assert_eq!(
        results["x"],
        TaskOutcome::Failed { error: "Error executing task: Agent error: tool crashed".to_string() }
    );
}

#[tokio::test]
async fn test_concurrent_mode_respects_dependencies_and_limit() {
    let agent = RecordingAgent::with_delay(vec![], Duration::from_millis(30));
    let graph = TaskGraph::new(vec![
        Task::new("a", as_agent(&agent)),
        Task::new("b", as_agent(&agent)),
        Task::new("c", as_agent(&agent)),
        Task::new("d", as_agent(&agent)),
        Task::new("join", as_agent(&agent)).depends_on("a").depends_on("b").depends_on("c"),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph).with_max_parallel(2).run().await;

    assert!(results.values().all(|o| !o.is_error()));
    assert!(agent.max_running.load(Ordering::SeqCst) <= 2);
    assert_eq!(agent.max_running.load(Ordering::SeqCst), 2);
    assert_eq!(agent.inputs_for("join").map(|deps| deps.len()), Some(3));
    let order = agent.invoked();
    let join = order.iter().position(|t| t == "join").unwrap();
    for dep in ["a", "b", "c"] {
        assert!(order.iter().position(|t| t == dep).unwrap() < join);
    }
}

#[tokio::test]
async fn test_exclusive_tasks_never_overlap() {
    let agent = RecordingAgent::with_delay(vec![], Duration::from_millis(20));
    let graph = TaskGraph::new(vec![
        Task::new("page 1", as_agent(&agent)).exclusive(),
        Task::new("page 2", as_agent(&agent)).exclusive(),
        Task::new("page 3", as_agent(&agent)).exclusive(),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph).with_max_parallel(3).run().await;

    assert_eq!(results.len(), 3);
    assert_eq!(agent.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_failure_skips_transitive_dependents() {
    let agent = RecordingAgent::new(vec!["A"]);
    let graph = TaskGraph::new(vec![
        Task::new("A", as_agent(&agent)),
        Task::new("B", as_agent(&agent)).depends_on("A"),
        Task::new("C", as_agent(&agent)).depends_on("B"),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph).with_max_parallel(3).run().await;

    assert_eq!(results["A"].status(), TaskStatus::Failed);
    assert_eq!(results["B"].status(), TaskStatus::Skipped);
    assert_eq!(results["C"].status(), TaskStatus::Skipped);
    assert!(results["C"].text().contains("Error: A could not finish"));
    assert_eq!(agent.invoked(), vec!["A"]);
}

#[tokio::test]
async fn test_concurrent_fail_fast_keeps_in_flight_outcomes() {
    let agent = RecordingAgent::with_delay(vec!["boom"], Duration::from_millis(50));
    let graph = TaskGraph::new(vec![
        Task::new("slow a", as_agent(&agent)),
        Task::new("boom", as_agent(&agent)),
        Task::new("slow b", as_agent(&agent)),
        Task::new("later c", as_agent(&agent)),
        Task::new("later d", as_agent(&agent)),
    ])
    .unwrap();

    let results = TaskGraphExecutor::new(graph)
        .with_policy(FailurePolicy::FailFast)
        .with_max_parallel(3)
        .run()
        .await;

    assert_eq!(results.len(), 5);
    assert_eq!(results["boom"].status(), TaskStatus::Failed);
    // Already running when "boom" failed; their results are kept.
    assert_eq!(results["slow a"], TaskOutcome::Succeeded { output: "done: slow a".to_string() });
    assert_eq!(results["slow b"], TaskOutcome::Succeeded { output: "done: slow b".to_string() });
    assert_eq!(results["later c"], TaskOutcome::NotExecuted);
    assert_eq!(results["later d"], TaskOutcome::NotExecuted);

    let mut invoked = agent.invoked();
    invoked.sort();
    assert_eq!(invoked, vec!["boom", "slow a", "slow b"]);
}

#[tokio::test]
async fn test_status_events_report_lifecycle() {
    let agent = RecordingAgent::new(vec!["A"]);
    let graph = TaskGraph::new(vec![
        Task::new("A", as_agent(&agent)),
        Task::new("B", as_agent(&agent)).depends_on("A"),
        Task::new("C", as_agent(&agent)),
    ])
    .unwrap();

    let executor = TaskGraphExecutor::new(graph);
    let mut events = executor.subscribe();
    executor.run().await;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    let statuses = |task: &str| -> Vec<TaskStatus> {
        received.iter().filter(|e: &&TaskEvent| e.task == task).map(|e| e.status).collect()
    };

    assert_eq!(statuses("A"), vec![TaskStatus::Executing, TaskStatus::Failed]);
    assert_eq!(statuses("B"), vec![TaskStatus::Skipped]);
    assert_eq!(statuses("C"), vec![TaskStatus::Executing, TaskStatus::Succeeded]);
}
