//! Loads workflow files from disk and runs them against mock backends.

use ensemble_orchestrator::{ConfigError, GraphError, TaskStatus, WorkflowConfig};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_workflow(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const TRIP: &str = r#"
[[backends]]
kind = "mock"
model = "mock-a"

[[backends]]
kind = "mock"
model = "mock-b"

[router]
retry_backoff_ms = 0

[[agents]]
name = "planner"
role = "Plans trips"

[[tasks]]
description = "Choose destination"
agent = "planner"

[[tasks]]
description = "Book hotel"
agent = "planner"
depends_on = ["Choose destination"]

[[tasks]]
description = "Rent car"
agent = "planner"
"#;

#[tokio::test]
async fn test_load_build_and_run() {
    let file = write_workflow(TRIP);
    let config = WorkflowConfig::load(file.path()).unwrap();
    let workflow = config.build().unwrap();

    assert_eq!(workflow.router.backend_ids(), vec!["mock:mock-a", "mock:mock-b"]);
    assert_eq!(
        workflow.executor.graph().execution_order(),
        vec!["Choose destination", "Book hotel", "Rent car"]
    );

    let results = workflow.executor.run().await;

    assert_eq!(results.len(), 3);
    assert!(results.values().all(|o| o.status() == TaskStatus::Succeeded));
    assert_eq!(results["Rent car"].text(), "Mock response for: Rent car");
    assert!(results["Book hotel"].text().contains("Mock response for: Choose destination"));
}

#[tokio::test]
async fn test_empty_router_fails_every_task() {
    let config = WorkflowConfig::from_toml_str(
        r#"
[[agents]]
name = "writer"

[[tasks]]
description = "Draft"
agent = "writer"

[[tasks]]
description = "Polish"
agent = "writer"
depends_on = ["Draft"]
"#,
    )
    .unwrap();

    let workflow = config.build().unwrap();
    assert!(workflow.router.is_empty());

    let results = workflow.executor.run().await;
    assert_eq!(results["Draft"].status(), TaskStatus::Failed);
    assert!(results["Draft"].text().contains("no LLM backends available"));
    assert_eq!(results["Polish"].status(), TaskStatus::Skipped);
}

#[test]
fn test_cycle_is_rejected_at_build() {
    let config = WorkflowConfig::from_toml_str(
        r#"
[[agents]]
name = "a"

[[tasks]]
description = "x"
agent = "a"
depends_on = ["y"]

[[tasks]]
description = "y"
agent = "a"
depends_on = ["x"]
"#,
    )
    .unwrap();

    match config.build() {
        Err(ConfigError::Graph(GraphError::CycleDetected(path))) => {
            assert!(path.contains('x') && path.contains('y'));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("cycle accepted"),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let err = WorkflowConfig::load(std::path::Path::new("/nonexistent/workflow.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_unknown_tool_rejected() {
    let err = WorkflowConfig::from_toml_str(
        r#"
[[agents]]
name = "scout"
kind = "tool"
tools = ["teleport"]
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("unknown tool 'teleport'"));
}
