//! TOML workflow configuration.
//!
//! A workflow file lists backends, memory and executor settings, agents and
//! tasks. [`WorkflowConfig::build`] turns it into a ready-to-run
//! [`Workflow`].

use crate::agents::{Agent, EchoTool, SimpleAgent, Tool, ToolAgent, ToolRegistry};
use crate::error::GraphError;
use crate::graph::{ExecutorConfig, FailurePolicy, Task, TaskGraph, TaskGraphExecutor};
use crate::memory::{ContextMemory, MemoryConfig};
use crate::routing::{DEFAULT_RETRY_BACKOFF, ResilientRouter};
use ensemble_abstraction::{Model, ModelError};
use ensemble_models::{ModelConfig, ModelFactory, ModelType};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// A backend could not be described.
    #[error("Invalid backend: {0}")]
    Model(#[from] ModelError),

    /// The task list does not form a valid graph.
    #[error("Invalid task graph: {0}")]
    Graph(#[from] GraphError),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// One `[[backends]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Backend kind, e.g. "openai", "groq", "claude", "mock".
    pub kind: String,
    /// Model identifier; defaults to the kind's default model.
    pub model: Option<String>,
    /// Inline credential.
    pub api_key: Option<String>,
    /// Environment variable holding the credential.
    pub api_key_env: Option<String>,
    /// Endpoint override.
    pub base_url: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Completion token cap.
    pub max_tokens: Option<u32>,
    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl BackendConfig {
    /// Resolves this entry into a factory configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::Model` if the kind is unknown.
    pub fn to_model_config(&self) -> Result<ModelConfig> {
        let kind = ModelType::from_str(&self.kind)?;
        let model_id = self.model.clone().unwrap_or_else(|| kind.default_model().to_string());

        let mut config = ModelConfig::new(kind, model_id);
        config.api_key = self
            .api_key
            .clone()
            .or_else(|| self.api_key_env.as_deref().and_then(|var| std::env::var(var).ok()));
        config.base_url = self.base_url.clone();
        config.temperature = self.temperature;
        config.max_tokens = self.max_tokens;
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// `[router]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Pause after a retryable failure, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Also add every backend discovered from the environment.
    pub discover_env: bool,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self { retry_backoff_ms: DEFAULT_RETRY_BACKOFF.as_millis() as u64, discover_env: false }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// `continue` or `fail_fast`.
    pub failure_policy: String,
    /// Maximum tasks in flight.
    pub max_parallel: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self { failure_policy: "continue".to_string(), max_parallel: 1 }
    }
}

/// Agent implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// [`SimpleAgent`]: one model call per task.
    #[default]
    Simple,
    /// [`ToolAgent`]: plan, tool dispatch and summary.
    Tool,
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Unique agent name referenced by tasks.
    pub name: String,
    /// Role description given to the model.
    #[serde(default)]
    pub role: String,
    /// Implementation.
    #[serde(default)]
    pub kind: AgentKind,
    /// Built-in tools available to a tool agent.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Whether a tool agent reads and writes the shared memory.
    #[serde(default = "default_true")]
    pub use_memory: bool,
}

fn default_true() -> bool {
    true
}

/// One `[[tasks]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Identity key and agent input.
    pub description: String,
    /// Name of the assigned agent.
    pub agent: String,
    /// Informational priority.
    #[serde(default)]
    pub priority: i32,
    /// Descriptions of prerequisite tasks.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Needs the shared actuator lease.
    #[serde(default)]
    pub exclusive: bool,
}

/// A complete workflow file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowConfig {
    /// Backends in priority order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// Router settings.
    #[serde(default)]
    pub router: RouterSection,
    /// Memory settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Executor settings.
    #[serde(default)]
    pub executor: ExecutorSection,
    /// Agents.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Tasks in input order.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Everything needed to run a workflow.
pub struct Workflow {
    /// The shared router.
    pub router: Arc<ResilientRouter>,
    /// The shared memory.
    pub memory: Arc<ContextMemory>,
    /// The executor, ready to run.
    pub executor: TaskGraphExecutor,
}

const BUILTIN_TOOLS: &[&str] = &["echo"];

fn builtin_tool(name: &str) -> Option<Arc<dyn Tool>> {
    match name {
        "echo" => Some(Arc::new(EchoTool)),
        _ => None,
    }
}

impl WorkflowConfig {
    /// Loads and validates a workflow file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), tasks = config.tasks.len(), "Workflow configuration loaded");
        Ok(config)
    }

    /// Parses and validates a workflow from TOML text.
    ///
    /// # Errors
    /// Returns error if the text cannot be parsed or validated.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The executor settings this file describes.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for an unknown policy or zero parallelism.
    pub fn executor_config(&self) -> Result<ExecutorConfig> {
        let failure_policy =
            FailurePolicy::from_str(&self.executor.failure_policy).map_err(ConfigError::Validation)?;
        if self.executor.max_parallel == 0 {
            return Err(ConfigError::Validation("executor.max_parallel must be at least 1".to_string()));
        }
        Ok(ExecutorConfig { failure_policy, max_parallel: self.executor.max_parallel })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for backend in &self.backends {
            ModelType::from_str(&backend.kind)?;
        }

        self.memory.validate()?;
        self.executor_config()?;

        let mut agent_names = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::Validation("agent name cannot be empty".to_string()));
            }
            if !agent_names.insert(agent.name.as_str()) {
                return Err(ConfigError::Validation(format!("duplicate agent name: {}", agent.name)));
            }
            for tool in &agent.tools {
                if builtin_tool(tool).is_none() {
                    return Err(ConfigError::Validation(format!(
                        "agent '{}' uses unknown tool '{tool}'. Available tools: {}",
                        agent.name,
                        BUILTIN_TOOLS.join(", ")
                    )));
                }
            }
        }

        for task in &self.tasks {
            if task.description.trim().is_empty() {
                return Err(ConfigError::Validation("task description cannot be empty".to_string()));
            }
            if !agent_names.contains(task.agent.as_str()) {
                return Err(GraphError::UnknownAgent {
                    task: task.description.clone(),
                    agent: task.agent.clone(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Builds the router, memory, agents and task graph.
    ///
    /// Backends that cannot be created (for example because their credential
    /// is missing) are skipped; a router with no backends is valid.
    ///
    /// # Errors
    /// Returns error if validation fails or the tasks do not form a DAG.
    pub fn build(&self) -> Result<Workflow> {
        self.validate()?;

        let mut model_configs = self
            .backends
            .iter()
            .map(BackendConfig::to_model_config)
            .collect::<Result<Vec<_>>>()?;
        if self.router.discover_env {
            model_configs.extend(ModelFactory::discover_from_env());
        }

        let router = Arc::new(
            ResilientRouter::from_configs(model_configs)
                .with_retry_backoff(Duration::from_millis(self.router.retry_backoff_ms)),
        );
        let model: Arc<dyn Model> = router.clone();
        let memory =
            Arc::new(ContextMemory::new(self.memory.clone()).with_model(Arc::clone(&model)));

        let mut agents: HashMap<&str, Arc<dyn Agent>> = HashMap::with_capacity(self.agents.len());
        for agent in &self.agents {
            let built: Arc<dyn Agent> = match agent.kind {
                AgentKind::Simple => Arc::new(SimpleAgent::new(
                    agent.name.clone(),
                    agent.role.clone(),
                    Arc::clone(&model),
                )),
                AgentKind::Tool => {
                    let mut registry = ToolRegistry::new();
                    for tool in agent.tools.iter().filter_map(|name| builtin_tool(name)) {
                        registry.register(tool);
                    }
                    let mut tool_agent =
                        ToolAgent::new(agent.name.clone(), agent.role.clone(), Arc::clone(&model))
                            .with_tools(registry);
                    if agent.use_memory {
                        tool_agent = tool_agent.with_memory(Arc::clone(&memory));
                    }
                    Arc::new(tool_agent)
                }
            };
            debug!(agent = %agent.name, kind = ?agent.kind, "Agent built");
            agents.insert(agent.name.as_str(), built);
        }

        let mut tasks = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let agent = agents.get(task.agent.as_str()).cloned().ok_or_else(|| {
                GraphError::UnknownAgent { task: task.description.clone(), agent: task.agent.clone() }
            })?;
            let mut built = Task::new(task.description.clone(), agent).with_priority(task.priority);
            built.depends_on.clone_from(&task.depends_on);
            built.exclusive = task.exclusive;
            tasks.push(built);
        }

        let graph = TaskGraph::new(tasks)?;
        let executor = TaskGraphExecutor::new(graph).with_config(self.executor_config()?);
        info!(
            backends = router.len(),
            agents = agents.len(),
            tasks = self.tasks.len(),
            "Workflow built"
        );

        Ok(Workflow { router, memory, executor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[backends]]
kind = "mock"
model = "mock-a"

[router]
retry_backoff_ms = 0

[memory]
max_items = 10
keep_recent_items = 3

[executor]
failure_policy = "fail_fast"

[[agents]]
name = "writer"
role = "Writes things"

[[tasks]]
description = "Draft"
agent = "writer"

[[tasks]]
description = "Polish"
agent = "writer"
depends_on = ["Draft"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = WorkflowConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.memory.max_items, 10);
        assert_eq!(config.memory.summarize_threshold, 30);
        assert_eq!(config.executor_config().unwrap().failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.tasks[1].depends_on, vec!["Draft"]);
    }

    #[test]
    fn test_unknown_agent_rejected() {
        let toml = SAMPLE.replace("agent = \"writer\"\ndepends_on", "agent = \"editor\"\ndepends_on");
        let err = WorkflowConfig::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Graph(GraphError::UnknownAgent { .. })));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let toml = SAMPLE.replace("fail_fast", "retry_forever");
        assert!(matches!(WorkflowConfig::from_toml_str(&toml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unknown_backend_kind_rejected() {
        let toml = SAMPLE.replace("kind = \"mock\"", "kind = \"telepathy\"");
        assert!(matches!(WorkflowConfig::from_toml_str(&toml), Err(ConfigError::Model(_))));
    }

    #[test]
    fn test_build_wires_router_and_graph() {
        let workflow = WorkflowConfig::from_toml_str(SAMPLE).unwrap().build().unwrap();
        assert_eq!(workflow.router.len(), 1);
        assert_eq!(workflow.executor.graph().execution_order(), vec!["Draft", "Polish"]);
    }
}
