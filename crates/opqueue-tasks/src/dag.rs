//! Task DAG construction and execution planning

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::task::{Task, TaskId, TaskPriority};

/// A node in the task execution DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Task identifier
    pub id: TaskId,
    /// Task name
    pub name: String,
    /// Scheduling priority
    pub priority: TaskPriority,
    /// Tasks that must reach a terminal state before this one
    pub dependencies: BTreeSet<TaskId>,
    /// Tasks waiting on this one
    pub dependents: BTreeSet<TaskId>,
    /// Execution wave (tasks in the same wave can run in parallel)
    pub wave: usize,
}

impl TaskNode {
    /// Create a node with no edges
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            priority: TaskPriority::default(),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            wave: 0,
        }
    }
}

/// Static plan for a set of tasks: topological order and parallel waves
#[derive(Debug, Clone)]
pub struct TaskDag {
    /// All nodes in the DAG
    nodes: HashMap<TaskId, TaskNode>,
    /// Tasks grouped by execution wave (wave 0 runs first, then wave 1, etc.)
    waves: Vec<Vec<TaskId>>,
    /// Topologically sorted task order
    sorted_order: Vec<TaskId>,
}

impl TaskDag {
    /// Snapshot the dependency edges among `tasks` into a plan.
    ///
    /// Edges to tasks outside the given set are ignored; they do not
    /// constrain ordering within the plan.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub fn build(tasks: &[Task]) -> Result<Self, DagError> {
        let nodes = tasks
            .iter()
            .map(|task| {
                let mut node = TaskNode::new(task.id(), task.name());
                node.priority = task.priority();
                node.dependencies = task.dependency_ids().into_iter().collect();
                node
            })
            .collect();
        Self::from_nodes(nodes)
    }

    /// Build a plan from pre-made nodes; `dependents` and `wave` are recomputed
    #[instrument(skip_all, fields(node_count = input.len()))]
    pub fn from_nodes(input: Vec<TaskNode>) -> Result<Self, DagError> {
        let mut order: Vec<TaskId> = Vec::with_capacity(input.len());
        let mut nodes: HashMap<TaskId, TaskNode> = HashMap::new();

        for mut node in input {
            if nodes.contains_key(&node.id) {
                return Err(DagError::DuplicateTask(node.name));
            }
            node.dependents.clear();
            node.wave = 0;
            order.push(node.id);
            nodes.insert(node.id, node);
        }

        // Drop edges leaving the set
        let known: HashSet<TaskId> = nodes.keys().copied().collect();
        for node in nodes.values_mut() {
            node.dependencies.retain(|d| known.contains(d));
        }

        // Build reverse dependency map (dependents)
        let all_deps: Vec<(TaskId, BTreeSet<TaskId>)> = nodes
            .iter()
            .map(|(id, node)| (*id, node.dependencies.clone()))
            .collect();

        for (id, deps) in &all_deps {
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.insert(*id);
                }
            }
        }

        let sorted_order = Self::topological_sort(&nodes, &order)?;
        let waves = Self::compute_waves(&nodes, &sorted_order);

        for (wave_idx, wave_tasks) in waves.iter().enumerate() {
            for task_id in wave_tasks {
                if let Some(node) = nodes.get_mut(task_id) {
                    node.wave = wave_idx;
                }
            }
        }

        info!(
            task_count = nodes.len(),
            wave_count = waves.len(),
            "task DAG built"
        );

        Ok(Self {
            nodes,
            waves,
            sorted_order,
        })
    }

    /// Topological sort using Kahn's algorithm, seeded in input order
    fn topological_sort(
        nodes: &HashMap<TaskId, TaskNode>,
        order: &[TaskId],
    ) -> Result<Vec<TaskId>, DagError> {
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        let mut queue: VecDeque<TaskId> = VecDeque::new();
        let mut sorted: Vec<TaskId> = Vec::new();

        for id in order {
            let degree = nodes[id].dependencies.len();
            in_degree.insert(*id, degree);
            if degree == 0 {
                queue.push_back(*id);
            }
        }

        while let Some(id) = queue.pop_front() {
            sorted.push(id);

            if let Some(node) = nodes.get(&id) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        if sorted.len() != nodes.len() {
            let in_sorted: HashSet<_> = sorted.iter().collect();
            let cyclic: Vec<String> = order
                .iter()
                .filter(|id| !in_sorted.contains(id))
                .map(|id| format!("{} ({})", nodes[id].name, id))
                .collect();
            return Err(DagError::CyclicDependency(cyclic.join(", ")));
        }

        Ok(sorted)
    }

    /// Compute execution waves (groups of tasks that can run in parallel)
    fn compute_waves(nodes: &HashMap<TaskId, TaskNode>, sorted: &[TaskId]) -> Vec<Vec<TaskId>> {
        if sorted.is_empty() {
            return Vec::new();
        }

        let mut wave_map: HashMap<TaskId, usize> = HashMap::new();

        for id in sorted {
            if let Some(node) = nodes.get(id) {
                let wave = node
                    .dependencies
                    .iter()
                    .filter_map(|dep| wave_map.get(dep))
                    .max()
                    .map(|w| w + 1)
                    .unwrap_or(0);
                wave_map.insert(*id, wave);
            }
        }

        let max_wave = wave_map.values().max().copied().unwrap_or(0);
        let mut waves: Vec<Vec<TaskId>> = vec![Vec::new(); max_wave + 1];

        for id in sorted {
            if let Some(&wave) = wave_map.get(id) {
                waves[wave].push(*id);
            }
        }

        waves
    }

    /// Get all task nodes
    pub fn nodes(&self) -> &HashMap<TaskId, TaskNode> {
        &self.nodes
    }

    /// Get a specific task node
    pub fn get(&self, id: &TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Get execution waves
    pub fn waves(&self) -> &[Vec<TaskId>] {
        &self.waves
    }

    /// Get the total number of tasks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the DAG is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get topologically sorted order
    pub fn sorted(&self) -> &[TaskId] {
        &self.sorted_order
    }

    /// Length of the longest dependency chain
    pub fn critical_path_len(&self) -> usize {
        self.waves.len()
    }

    /// Get a human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves.iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for id in wave {
                if let Some(node) = self.nodes.get(id) {
                    let deps: Vec<String> = node
                        .dependencies
                        .iter()
                        .filter_map(|d| self.nodes.get(d))
                        .map(|d| d.name.clone())
                        .collect();
                    if deps.is_empty() {
                        plan.push_str(&format!("  {} {}\n", id, node.name));
                    } else {
                        plan.push_str(&format!(
                            "  {} {} (after: {})\n",
                            id,
                            node.name,
                            deps.join(", ")
                        ));
                    }
                }
            }
        }
        plan
    }

    /// Plan as JSON: one entry per wave with the task names in it
    pub fn to_json(&self) -> serde_json::Value {
        let waves: Vec<serde_json::Value> = self
            .waves
            .iter()
            .enumerate()
            .map(|(i, wave)| {
                serde_json::json!({
                    "wave": i,
                    "tasks": wave
                        .iter()
                        .filter_map(|id| self.nodes.get(id))
                        .map(|n| n.name.clone())
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        serde_json::json!({
            "task_count": self.len(),
            "waves": waves,
        })
    }
}

/// Errors during DAG construction
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// Cyclic dependency detected
    #[error("Cyclic dependency detected among tasks: {0}")]
    CyclicDependency(String),

    /// The same task appears twice
    #[error("Task '{0}' appears more than once")]
    DuplicateTask(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Vec<Task> {
        let fetch = Task::noop("fetch");
        let parse = Task::noop("parse");
        let lint = Task::noop("lint");
        let report = Task::noop("report");
        parse.add_dependency(&fetch).unwrap();
        report.add_dependency(&parse).unwrap();
        report.add_dependency(&lint).unwrap();
        vec![fetch, parse, lint, report]
    }

    #[test]
    fn test_build_dag() {
        let tasks = pipeline();
        let dag = TaskDag::build(&tasks).unwrap();

        assert_eq!(dag.len(), 4);
        assert!(!dag.is_empty());
        assert_eq!(dag.waves().len(), 3);
        assert_eq!(dag.critical_path_len(), 3);
    }

    #[test]
    fn test_dag_waves() {
        let tasks = pipeline();
        let dag = TaskDag::build(&tasks).unwrap();

        let wave_of = |t: &Task| dag.get(&t.id()).unwrap().wave;
        assert_eq!(wave_of(&tasks[0]), 0); // fetch
        assert_eq!(wave_of(&tasks[1]), 1); // parse
        assert_eq!(wave_of(&tasks[2]), 0); // lint
        assert_eq!(wave_of(&tasks[3]), 2); // report

        let report = dag.get(&tasks[3].id()).unwrap();
        assert!(report.dependencies.contains(&tasks[1].id()));
        assert!(report.dependencies.contains(&tasks[2].id()));
        let fetch = dag.get(&tasks[0].id()).unwrap();
        assert!(fetch.dependents.contains(&tasks[1].id()));
    }

    #[test]
    fn test_sorted_order_respects_edges_and_input_order() {
        let tasks = pipeline();
        let dag = TaskDag::build(&tasks).unwrap();
        let ids: Vec<TaskId> = tasks.iter().map(Task::id).collect();

        assert_eq!(dag.sorted(), &[ids[0], ids[2], ids[1], ids[3]]);
    }

    #[test]
    fn test_edges_outside_set_ignored() {
        let external = Task::noop("external");
        let inner = Task::noop("inner");
        inner.add_dependency(&external).unwrap();

        let dag = TaskDag::build(std::slice::from_ref(&inner)).unwrap();
        assert_eq!(dag.len(), 1);
        assert!(dag.get(&inner.id()).unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_cycle_detected_from_nodes() {
        let a = Task::noop("a").id();
        let b = Task::noop("b").id();
        let mut node_a = TaskNode::new(a, "a");
        node_a.dependencies.insert(b);
        let mut node_b = TaskNode::new(b, "b");
        node_b.dependencies.insert(a);

        let err = TaskDag::from_nodes(vec![node_a, node_b]).unwrap_err();
        match err {
            DagError::CyclicDependency(names) => {
                assert!(names.contains("a"));
                assert!(names.contains("b"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let a = Task::noop("a").id();
        let result = TaskDag::from_nodes(vec![TaskNode::new(a, "a"), TaskNode::new(a, "a")]);
        assert!(matches!(result, Err(DagError::DuplicateTask(_))));
    }

    #[test]
    fn test_empty_dag() {
        let dag = TaskDag::build(&[]).unwrap();
        assert!(dag.is_empty());
        assert!(dag.waves().is_empty());
        assert_eq!(dag.execution_plan(), "");
    }

    #[test]
    fn test_execution_plan_output() {
        let tasks = pipeline();
        let dag = TaskDag::build(&tasks).unwrap();
        let plan = dag.execution_plan();

        assert!(plan.contains("Wave 0 (2 tasks)"));
        assert!(plan.contains("parse (after: fetch)"));
        assert!(plan.contains("report (after: parse, lint)") || plan.contains("report (after: lint, parse)"));
    }

    #[test]
    fn test_plan_json() {
        let tasks = pipeline();
        let dag = TaskDag::build(&tasks).unwrap();
        let json = dag.to_json();

        assert_eq!(json["task_count"], 4);
        assert_eq!(json["waves"][0]["tasks"], serde_json::json!(["fetch", "lint"]));
        assert_eq!(json["waves"][2]["tasks"], serde_json::json!(["report"]));
    }
}
