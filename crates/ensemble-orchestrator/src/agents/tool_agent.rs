//! Plan, act, summarize agent.
//!
//! The agent asks the model which tool to use, validates and dispatches the
//! call through its [`ToolRegistry`], then asks the model to summarize the
//! outcome. When a [`ContextMemory`] is attached the plan, the tool output
//! and the final answer are recorded in it.

use super::tools::{ToolParameters, ToolRegistry};
use super::{Agent, AgentOutput};
use crate::error::AgentError;
use crate::memory::{ContextMemory, MemoryItemType};
use async_trait::async_trait;
use ensemble_abstraction::{FAILURE_MARKER, Model, is_failure_text};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NO_TOOL: &str = "NO_TOOL";

/// Token budget for the memory context included in prompts.
const MEMORY_CONTEXT_TOKENS: usize = 1500;

static TOOL_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][\w-]*)\s*:\s*(.*?)\s*$").expect("plan regex should be valid")
});

/// A decoded planning response.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// The model chose not to use a tool.
    NoTool,
    /// The model chose a tool call.
    Call {
        /// Tool name.
        tool: String,
        /// Decoded parameters.
        parameters: ToolParameters,
    },
    /// Nothing usable could be extracted.
    Unparseable,
}

#[derive(Debug, Deserialize)]
struct PlanJson {
    tool: Option<String>,
    #[serde(default)]
    parameters: ToolParameters,
}

/// Decodes a planning response.
///
/// A JSON object `{"tool": ..., "parameters": {...}}` is preferred. Otherwise
/// the first line is read as `TOOL: PARAM`, with the parameter bound to the
/// tool's first required parameter (or `input` when it declares none). Only a
/// first line that is, or opens with, "no tool" declines to call a tool.
pub fn parse_plan(text: &str, registry: &ToolRegistry) -> Plan {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(plan) = serde_json::from_str::<PlanJson>(&text[start..=end]) {
                return match plan.tool {
                    Some(tool) if !is_no_tool(&tool) => Plan::Call { tool, parameters: plan.parameters },
                    _ => Plan::NoTool,
                };
            }
        }
    }

    let first_line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    if is_no_tool(first_line) || first_line.trim_start().to_lowercase().starts_with("no tool") {
        return Plan::NoTool;
    }

    let Some(caps) = TOOL_PARAM.captures(first_line) else {
        return Plan::Unparseable;
    };
    let tool = caps[1].to_string();
    let value = caps[2].trim_matches(|c| c == '"' || c == '\'').to_string();
    let key = registry
        .get(&tool)
        .and_then(|t| t.required_parameters().first().copied())
        .unwrap_or("input");

    let mut parameters = ToolParameters::new();
    parameters.insert(key.to_string(), serde_json::Value::String(value));
    Plan::Call { tool, parameters }
}

fn is_no_tool(text: &str) -> bool {
    let t = text.trim().trim_matches('"');
    t.eq_ignore_ascii_case(NO_TOOL) || t.eq_ignore_ascii_case("none")
}

/// An agent that plans a tool call, runs it and summarizes the result.
pub struct ToolAgent {
    name: String,
    role: String,
    model: Arc<dyn Model>,
    tools: ToolRegistry,
    memory: Option<Arc<ContextMemory>>,
}

impl ToolAgent {
    /// Creates an agent with no tools and no memory.
    pub fn new(name: impl Into<String>, role: impl Into<String>, model: Arc<dyn Model>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            model,
            tools: ToolRegistry::new(),
            memory: None,
        }
    }

    /// Sets the tools the agent may call.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Attaches a shared memory.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<ContextMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    fn remember(&self, kind: MemoryItemType, content: String) {
        if let Some(memory) = &self.memory {
            let metadata = HashMap::from([(
                "agent".to_string(),
                serde_json::Value::String(self.name.clone()),
            )]);
            memory.add(kind, content, Some(metadata));
        }
    }

    fn memory_context(&self) -> Option<String> {
        let memory = self.memory.as_ref()?;
        if memory.is_empty() {
            return None;
        }
        Some(memory.formatted_context(Some(MEMORY_CONTEXT_TOKENS)))
    }

    fn planning_prompt(&self, input: &str, dependency_results: &[String]) -> String {
        let mut parts = vec![format!("You are {}. Your role: {}.", self.name, self.role)];

        if self.tools.is_empty() {
            parts.push("\n--- Available tools ---\n(none)".to_string());
        } else {
            parts.push(format!("\n--- Available tools ---\n{}", self.tools.describe().trim_end()));
        }
        if let Some(context) = self.memory_context() {
            parts.push(format!("\n--- Memory ---\n{context}"));
        }
        if !dependency_results.is_empty() {
            parts.push(format!(
                "\n--- Results of previous tasks ---\n{}",
                dependency_results.join("\n")
            ));
        }
        parts.push(format!("\n--- Current task ---\n{input}"));
        parts.push(format!(
            "\n--- Instruction ---\n\
             Decide which tool, if any, to use for the current task. \
             Reply ONLY with JSON of the form {{\"tool\": \"NAME\", \"parameters\": {{...}}}}, \
             or with a single line TOOL: PARAMETER. \
             If no tool is needed, reply {NO_TOOL}."
        ));
        parts.join("\n")
    }

    fn summary_prompt(&self, input: &str, tool_used: Option<&str>, outcome: &str) -> String {
        let mut parts = vec![
            format!("You are {}. Your role: {}.", self.name, self.role),
            format!("Your task was: {input}"),
        ];
        if let Some(context) = self.memory_context() {
            parts.push(format!("\n--- Memory ---\n{context}"));
        }
        if let Some(tool) = tool_used {
            parts.push(format!("You used the tool '{tool}'."));
        }
        parts.push(format!("The result of the action was: {outcome}"));
        parts.push(
            "\n--- Instruction ---\n\
             Based on the task and the result, give a concise final answer on how the task concluded."
                .to_string(),
        );
        parts.join("\n")
    }
}

#[async_trait]
impl Agent for ToolAgent {
    fn id(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.role
    }

    async fn execute(
        &self,
        input: &str,
        dependency_results: &[String],
    ) -> Result<AgentOutput, AgentError> {
        info!(agent = %self.name, task = %input, "ToolAgent starting task");

        let plan_text = self
            .model
            .generate_text(&self.planning_prompt(input, dependency_results), None)
            .await?
            .content;
        debug!(agent = %self.name, plan = %plan_text, "Plan received");

        if is_failure_text(&plan_text) {
            self.remember(MemoryItemType::Error, plan_text.clone());
            return Ok(AgentOutput::Text(plan_text));
        }
        self.remember(MemoryItemType::Action, format!("Plan for '{input}': {plan_text}"));

        let (tool_used, outcome) = match parse_plan(&plan_text, &self.tools) {
            Plan::NoTool => (None, "No tool used.".to_string()),
            Plan::Call { tool, parameters } => {
                let output = self.tools.dispatch(&tool, &parameters).await;
                (Some(tool), output)
            }
            Plan::Unparseable => (
                None,
                format!("{FAILURE_MARKER}: could not extract a tool call from the plan: '{plan_text}'"),
            ),
        };

        if is_failure_text(&outcome) {
            warn!(agent = %self.name, outcome = %outcome, "Tool step failed");
            self.remember(MemoryItemType::Error, outcome.clone());
        } else {
            self.remember(MemoryItemType::Observation, outcome.clone());
        }

        let answer = self
            .model
            .generate_text(&self.summary_prompt(input, tool_used.as_deref(), &outcome), None)
            .await?
            .content;

        if is_failure_text(&answer) {
            self.remember(MemoryItemType::Error, answer.clone());
        } else {
            self.remember(MemoryItemType::Message, format!("[{}]: {answer}", self.name));
        }
        info!(agent = %self.name, "ToolAgent finished task");
        Ok(AgentOutput::Text(answer))
    }
}
