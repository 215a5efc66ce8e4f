//! Task graph construction and validation.
//!
//! Builds a directed graph from the tasks' declared dependencies, rejects
//! duplicates, dangling references and cycles, and computes the execution
//! order.

use super::task::Task;
use crate::error::GraphError;
use petgraph::algo::{is_cyclic_directed, kosaraju_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// A validated, acyclic set of tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
}

impl TaskGraph {
    /// Validates `tasks` and fixes their execution order.
    ///
    /// The order is topological; among tasks whose dependencies are all
    /// satisfied, input order wins. A list already in dependency order runs
    /// exactly as given.
    ///
    /// # Errors
    /// Returns a `GraphError` for duplicate descriptions, unknown
    /// dependencies or a dependency cycle.
    pub fn new(tasks: Vec<Task>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.description.clone(), i).is_some() {
                return Err(GraphError::DuplicateTask(task.description.clone()));
            }
        }

        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(tasks.len(), 0);
        let nodes: Vec<NodeIndex> = (0..tasks.len()).map(|i| graph.add_node(i)).collect();

        for (i, task) in tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let Some(&d) = index.get(dep) else {
                    return Err(GraphError::UnknownDependency {
                        task: task.description.clone(),
                        dependency: dep.clone(),
                    });
                };
                // Edge from dependency to dependent
                graph.update_edge(nodes[d], nodes[i], ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(GraphError::CycleDetected(Self::describe_cycle(&graph, &tasks)));
        }

        let order = Self::stable_order(&graph, &nodes);
        Ok(Self { tasks, index, order })
    }

    fn describe_cycle(graph: &DiGraph<usize, ()>, tasks: &[Task]) -> String {
        kosaraju_scc(graph)
            .into_iter()
            .find(|scc| scc.len() > 1 || scc.iter().any(|&n| graph.contains_edge(n, n)))
            .map_or_else(
                || "unknown cycle".to_string(),
                |mut scc| {
                    scc.sort_by_key(|n| graph[*n]);
                    scc.iter()
                        .map(|n| tasks[graph[*n]].description.clone())
                        .collect::<Vec<_>>()
                        .join(" -> ")
                },
            )
    }

    // Kahn's algorithm, always taking the lowest input index that is ready.
    fn stable_order(graph: &DiGraph<usize, ()>, nodes: &[NodeIndex]) -> Vec<usize> {
        let mut in_degree: Vec<usize> = nodes
            .iter()
            .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<usize> =
            in_degree.iter().enumerate().filter(|(_, d)| **d == 0).map(|(i, _)| i).collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for next in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
                let j = graph[next];
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.insert(j);
                }
            }
        }
        order
    }

    /// Tasks in input order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Looks up a task by description.
    pub fn get(&self, description: &str) -> Option<&Task> {
        self.index.get(description).map(|&i| &self.tasks[i])
    }

    /// Task descriptions in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.tasks[i].description.as_str()).collect()
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SimpleAgent;
    use crate::agents::Agent;
    use ensemble_models::MockModel;
    use std::sync::Arc;

    fn agent() -> Arc<dyn Agent> {
        Arc::new(SimpleAgent::new(
            "a".to_string(),
            "test".to_string(),
            Arc::new(MockModel::new("m".to_string())),
        ))
    }

    #[test]
    fn test_input_order_kept_when_consistent() {
        let graph = TaskGraph::new(vec![
            Task::new("A", agent()),
            Task::new("B", agent()).depends_on("A"),
            Task::new("C", agent()),
        ])
        .unwrap();
        assert_eq!(graph.execution_order(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_out_of_order_input_is_resolved() {
        let graph = TaskGraph::new(vec![
            Task::new("report", agent()).depends_on("fetch"),
            Task::new("fetch", agent()),
            Task::new("notify", agent()),
        ])
        .unwrap();
        assert_eq!(graph.execution_order(), vec!["fetch", "report", "notify"]);
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let dup = TaskGraph::new(vec![Task::new("A", agent()), Task::new("A", agent())]);
        assert_eq!(dup.unwrap_err(), GraphError::DuplicateTask("A".to_string()));

        let unknown = TaskGraph::new(vec![Task::new("A", agent()).depends_on("Z")]);
        assert_eq!(
            unknown.unwrap_err(),
            GraphError::UnknownDependency { task: "A".to_string(), dependency: "Z".to_string() }
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let result = TaskGraph::new(vec![
            Task::new("A", agent()).depends_on("C"),
            Task::new("B", agent()).depends_on("A"),
            Task::new("C", agent()).depends_on("B"),
        ]);
        match result.unwrap_err() {
            GraphError::CycleDetected(path) => assert_eq!(path, "A -> B -> C"),
            other => panic!("unexpected error: {other}"),
        }

        let self_loop = TaskGraph::new(vec![Task::new("A", agent()).depends_on("A")]);
        assert_eq!(self_loop.unwrap_err(), GraphError::CycleDetected("A".to_string()));
    }
}
