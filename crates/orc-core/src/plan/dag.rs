//! DAG construction from a validated [`Plan`]: topological ordering via
//! Kahn's algorithm, plus grouping into maximum-parallelism layers.

use std::collections::{HashMap, HashSet, VecDeque};

use orc_store::models::Plan;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("dependency cycle detected involving tasks: {0}")]
    CycleDetected(String),

    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task {0:?} depends on itself")]
    SelfDependency(String),
}

/// The execution graph built from a plan's tasks.
#[derive(Debug, Clone)]
pub struct Dag {
    pub nodes: Vec<String>,
    pub edges: HashMap<String, Vec<String>>,
    pub reverse_edges: HashMap<String, Vec<String>>,
    pub root_nodes: Vec<String>,
    pub leaf_nodes: Vec<String>,
    pub execution_order: Vec<String>,
    pub layers: Vec<Vec<String>>,
}

impl Dag {
    /// The zero-based layer index a task was placed in.
    pub fn layer_of(&self, task_id: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|t| t == task_id))
    }
}

/// Build a [`Dag`] from a plan whose tasks have already passed
/// `validate_plan`. Still defends against unknown/self dependencies so
/// the builder is safe to call standalone.
pub fn build_dag(plan: &Plan) -> Result<Dag, DagError> {
    let nodes: Vec<String> = plan.tasks.iter().map(|t| t.task_id.clone()).collect();
    let known: HashSet<&str> = nodes.iter().map(|s| s.as_str()).collect();

    let mut edges: HashMap<String, Vec<String>> =
        nodes.iter().map(|n| (n.clone(), Vec::new())).collect();
    let mut reverse_edges: HashMap<String, Vec<String>> =
        nodes.iter().map(|n| (n.clone(), Vec::new())).collect();

    for task in &plan.tasks {
        for dep in &task.dependencies {
            if dep == &task.task_id {
                return Err(DagError::SelfDependency(task.task_id.clone()));
            }
            if !known.contains(dep.as_str()) {
                return Err(DagError::UnknownDependency {
                    task: task.task_id.clone(),
                    dependency: dep.clone(),
                });
            }
            // Edge dep -> task: dep must complete before task runs.
            edges.get_mut(dep).unwrap().push(task.task_id.clone());
            reverse_edges
                .get_mut(&task.task_id)
                .unwrap()
                .push(dep.clone());
        }
    }

    let execution_order = topological_sort(&nodes, &edges, &reverse_edges)?;
    let layers = execution_layers(&nodes, &reverse_edges);

    let root_nodes = nodes
        .iter()
        .filter(|n| reverse_edges[*n].is_empty())
        .cloned()
        .collect();
    let leaf_nodes = nodes
        .iter()
        .filter(|n| edges[*n].is_empty())
        .cloned()
        .collect();

    Ok(Dag {
        nodes,
        edges,
        reverse_edges,
        root_nodes,
        leaf_nodes,
        execution_order,
        layers,
    })
}

/// Kahn's algorithm: process nodes whose dependencies are all satisfied,
/// in FIFO order of when they became ready. A cycle leaves nodes
/// unprocessed, reported as `CycleDetected`.
fn topological_sort(
    nodes: &[String],
    edges: &HashMap<String, Vec<String>>,
    reverse_edges: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, DagError> {
    let mut in_degree: HashMap<&str, usize> = nodes
        .iter()
        .map(|n| (n.as_str(), reverse_edges[n].len()))
        .collect();

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .filter(|n| in_degree[n.as_str()] == 0)
        .map(|n| n.as_str())
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        for dependent in &edges[node] {
            let degree = in_degree.get_mut(dependent.as_str()).unwrap();
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent.as_str());
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = nodes
            .iter()
            .map(|n| n.as_str())
            .filter(|n| !order.iter().any(|o| o == n))
            .collect();
        return Err(DagError::CycleDetected(stuck.join(", ")));
    }

    Ok(order)
}

/// Group nodes into layers of maximum parallelism: repeatedly extract the
/// set of not-yet-placed nodes whose dependencies are all already placed.
fn execution_layers(
    nodes: &[String],
    reverse_edges: &HashMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&str> = nodes.iter().map(|n| n.as_str()).collect();
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|n| reverse_edges[*n].iter().all(|dep| placed.contains(dep.as_str())))
            .collect();

        // With a validated acyclic graph this never happens, but a stall
        // would otherwise spin forever.
        if ready.is_empty() {
            break;
        }

        for n in &ready {
            placed.insert(n);
        }
        remaining.retain(|n| !ready.contains(n));
        layers.push(ready.into_iter().map(|s| s.to_string()).collect());
    }

    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_store::models::TaskDef;

    fn task(id: &str, deps: &[&str]) -> TaskDef {
        TaskDef {
            task_id: id.into(),
            agent: "AGENT_A".into(),
            task_type: "build".into(),
            description: "desc".into(),
            priority: Default::default(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            when: None,
            unless: None,
            max_retries: 0,
            retry_delay: None,
            timeout: None,
            fallback_agent: None,
            deadline: None,
            content: Default::default(),
        }
    }

    fn plan(tasks: Vec<TaskDef>) -> Plan {
        Plan {
            plan_id: "PLAN_1".into(),
            name: "demo".into(),
            version: "1.0.0".into(),
            context: Default::default(),
            tasks,
        }
    }

    #[test]
    fn linear_chain_is_single_task_per_layer() {
        let p = plan(vec![task("A", &[]), task("B", &["A"]), task("C", &["B"])]);
        let dag = build_dag(&p).unwrap();
        assert_eq!(dag.layers, vec![vec!["A"], vec!["B"], vec!["C"]]);
        assert_eq!(dag.execution_order, vec!["A", "B", "C"]);
    }

    #[test]
    fn no_dependencies_places_task_in_layer_zero() {
        let p = plan(vec![task("A", &[])]);
        let dag = build_dag(&p).unwrap();
        assert_eq!(dag.layer_of("A"), Some(0));
    }

    #[test]
    fn diamond_dag_groups_parallel_branches_into_same_layer() {
        let p = plan(vec![
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["A"]),
            task("D", &["B", "C"]),
        ]);
        let dag = build_dag(&p).unwrap();
        assert_eq!(dag.layers.len(), 3);
        assert_eq!(dag.layers[0], vec!["A"]);
        let mut middle = dag.layers[1].clone();
        middle.sort();
        assert_eq!(middle, vec!["B", "C"]);
        assert_eq!(dag.layers[2], vec!["D"]);
    }

    #[test]
    fn execution_order_respects_every_edge() {
        let p = plan(vec![
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["A"]),
            task("D", &["B", "C"]),
        ]);
        let dag = build_dag(&p).unwrap();
        let index_of = |id: &str| dag.execution_order.iter().position(|n| n == id).unwrap();
        for (task_id, deps) in [("B", vec!["A"]), ("C", vec!["A"]), ("D", vec!["B", "C"])] {
            for dep in deps {
                assert!(index_of(dep) < index_of(task_id));
            }
        }
    }

    #[test]
    fn rejects_direct_cycle() {
        let p = plan(vec![task("A", &["B"]), task("B", &["A"])]);
        assert!(matches!(build_dag(&p), Err(DagError::CycleDetected(_))));
    }

    #[test]
    fn rejects_self_dependency() {
        let p = plan(vec![task("A", &["A"])]);
        assert!(matches!(build_dag(&p), Err(DagError::SelfDependency(_))));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let p = plan(vec![task("A", &["ghost"])]);
        assert!(matches!(
            build_dag(&p),
            Err(DagError::UnknownDependency { .. })
        ));
    }
}
