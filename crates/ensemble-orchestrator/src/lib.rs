//! Workflow orchestration for Ensemble.
//!
//! Three components do the work:
//!
//! - [`ResilientRouter`] spreads generation calls across backends round-robin
//!   and fails over when a backend errors.
//! - [`ContextMemory`] keeps a bounded, importance-ranked history of typed
//!   items and compacts evicted items into summaries.
//! - [`TaskGraphExecutor`] runs a validated DAG of tasks, skipping the
//!   dependents of failed tasks and returning every task's outcome.
//!
//! Agents ([`SimpleAgent`], [`ToolAgent`]) sit between the executor and the
//! router, and [`WorkflowConfig`] wires everything from a TOML file.

pub mod agents;
pub mod config;
pub mod error;
pub mod graph;
pub mod memory;
pub mod routing;

pub use agents::{Agent, AgentOutput, EchoTool, SimpleAgent, Tool, ToolAgent, ToolParameters, ToolRegistry};
pub use config::{ConfigError, Workflow, WorkflowConfig};
pub use error::{AgentError, GraphError, RouterError};
pub use graph::{
    ExecutorConfig, FailurePolicy, NOT_EXECUTED, Task, TaskEvent, TaskGraph, TaskGraphExecutor,
    TaskOutcome, TaskStatus,
};
pub use memory::{ContextMemory, ImportanceWeights, MemoryConfig, MemoryItem, MemoryItemType, Summary};
pub use routing::{FailureClass, ResilientRouter};
