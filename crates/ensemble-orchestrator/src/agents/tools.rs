//! Tool interface and name-keyed registry.
//!
//! Tools report failures as failure-marked text rather than as errors, so
//! their results can be classified the same way as backend output.

use async_trait::async_trait;
use ensemble_abstraction::FAILURE_MARKER;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Named parameters passed to a tool.
pub type ToolParameters = serde_json::Map<String, serde_json::Value>;

/// An external capability an agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// One-line description shown to the planning model.
    fn description(&self) -> &str;

    /// Parameters that must be present before the tool runs.
    fn required_parameters(&self) -> &[&'static str] {
        &[]
    }

    /// Runs the tool. Failures are returned as failure-marked text.
    async fn run(&self, parameters: &ToolParameters) -> String;
}

/// Tools available to an agent, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool`, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Registered tool names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Returns `true` if no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Renders one `- name(params): description` line per tool.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for tool in self.tools.values() {
            let _ = writeln!(
                out,
                "- {}({}): {}",
                tool.name(),
                tool.required_parameters().join(", "),
                tool.description()
            );
        }
        out
    }

    /// Validates `parameters` against the named tool and runs it.
    ///
    /// Unknown tools and missing required parameters produce failure-marked
    /// text; the tool is not invoked in either case.
    pub async fn dispatch(&self, name: &str, parameters: &ToolParameters) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = %name, "Unknown tool requested");
            return format!(
                "{FAILURE_MARKER}: unknown tool '{name}'. Available tools: [{}]",
                self.names().join(", ")
            );
        };

        let missing: Vec<&str> = tool
            .required_parameters()
            .iter()
            .copied()
            .filter(|param| !parameters.contains_key(*param))
            .collect();
        if !missing.is_empty() {
            warn!(tool = %name, missing = ?missing, "Tool parameters failed validation");
            return format!(
                "{FAILURE_MARKER}: tool '{name}' is missing required parameter(s): {}",
                missing.join(", ")
            );
        }

        debug!(tool = %name, "Running tool");
        tool.run(parameters).await
    }
}

/// Returns its `text` parameter unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the given text unchanged"
    }

    fn required_parameters(&self) -> &[&'static str] {
        &["text"]
    }

    async fn run(&self, parameters: &ToolParameters) -> String {
        match parameters.get("text") {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => format!("{FAILURE_MARKER}: echo requires a 'text' parameter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    fn params(value: serde_json::Value) -> ToolParameters {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_dispatch_runs_tool() {
        let out = registry().dispatch("echo", &params(json!({"text": "hi"}))).await;
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_text() {
        let out = registry().dispatch("browser", &ToolParameters::new()).await;
        assert_eq!(out, "Error: unknown tool 'browser'. Available tools: [echo]");
    }

    #[tokio::test]
    async fn test_missing_parameter_is_error_text() {
        let out = registry().dispatch("echo", &params(json!({"txt": "hi"}))).await;
        assert_eq!(out, "Error: tool 'echo' is missing required parameter(s): text");
    }

    #[test]
    fn test_describe_lists_parameters() {
        assert_eq!(registry().describe(), "- echo(text): Returns the given text unchanged\n");
    }
}
