//! Plan loading from YAML and DAG integrity reporting (C3).

use std::collections::HashMap;
use std::path::Path;

use orc_store::models::Plan;
use thiserror::Error;

use crate::envelope::validate_plan;
use crate::plan::dag::{build_dag, Dag, DagError};

#[derive(Debug, Error)]
pub enum PlanLoadError {
    #[error("failed to read plan file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan YAML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("plan failed validation: {0:?}")]
    Invalid(Vec<String>),

    #[error(transparent)]
    Dag(#[from] DagError),
}

/// Load a plan from `path`, parse it, and run structural validation.
/// Nothing is persisted and no I/O beyond the read happens here.
pub fn load_and_validate(path: &Path) -> Result<Plan, PlanLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| PlanLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let plan: Plan = serde_yaml::from_str(&raw).map_err(|source| PlanLoadError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let errors = validate_plan(&plan);
    if !errors.is_empty() {
        return Err(PlanLoadError::Invalid(errors));
    }

    Ok(plan)
}

#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: HashMap<String, serde_json::Value>,
}

/// Report diagnostics about an already-built DAG: depth, root/leaf
/// counts, agents involved, and isolated (no-dependency, no-dependent)
/// nodes flagged as warnings rather than errors.
pub fn validate_integrity(dag: &Dag, plan: &Plan) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    let agent_by_task: HashMap<&str, &str> = plan
        .tasks
        .iter()
        .map(|t| (t.task_id.as_str(), t.agent.as_str()))
        .collect();

    let isolated: Vec<&String> = dag
        .nodes
        .iter()
        .filter(|n| dag.edges[*n].is_empty() && dag.reverse_edges[*n].is_empty())
        .collect();
    if !isolated.is_empty() {
        report.warnings.push(format!(
            "isolated tasks with no dependencies and no dependents: {}",
            isolated
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    let agents: std::collections::HashSet<&str> = dag
        .nodes
        .iter()
        .filter_map(|n| agent_by_task.get(n.as_str()).copied())
        .collect();

    report
        .stats
        .insert("max_depth".into(), serde_json::json!(dag.layers.len()));
    report
        .stats
        .insert("root_count".into(), serde_json::json!(dag.root_nodes.len()));
    report
        .stats
        .insert("leaf_count".into(), serde_json::json!(dag.leaf_nodes.len()));
    report
        .stats
        .insert("agents_involved".into(), serde_json::json!(agents.len()));
    report
        .stats
        .insert("task_count".into(), serde_json::json!(dag.nodes.len()));

    if dag.nodes.is_empty() {
        report.warnings.push("plan has no tasks".to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_plan(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_and_validates_well_formed_plan() {
        let file = write_plan(
            r#"
plan_id: PLAN_1
name: demo
tasks:
  - task_id: A
    agent: AGENT_A
    task_type: build
    description: build it
  - task_id: B
    agent: AGENT_B
    task_type: test
    description: test it
    dependencies: [A]
"#,
        );
        let plan = load_and_validate(file.path()).unwrap();
        assert_eq!(plan.tasks.len(), 2);
    }

    #[test]
    fn rejects_plan_with_unknown_dependency() {
        let file = write_plan(
            r#"
plan_id: PLAN_1
name: demo
tasks:
  - task_id: A
    agent: AGENT_A
    task_type: build
    description: build it
    dependencies: [ghost]
"#,
        );
        let err = load_and_validate(file.path()).unwrap_err();
        assert!(matches!(err, PlanLoadError::Invalid(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_and_validate(Path::new("/nonexistent/path.yaml")).unwrap_err();
        assert!(matches!(err, PlanLoadError::Io { .. }));
    }

    #[test]
    fn integrity_report_flags_isolated_tasks() {
        let file = write_plan(
            r#"
plan_id: PLAN_1
name: demo
tasks:
  - task_id: A
    agent: AGENT_A
    task_type: build
    description: build it
  - task_id: B
    agent: AGENT_B
    task_type: build
    description: isolated
"#,
        );
        let plan = load_and_validate(file.path()).unwrap();
        let dag = build_dag(&plan).unwrap();
        let report = validate_integrity(&dag, &plan);
        assert!(report.warnings.iter().any(|w| w.contains("isolated")));
        assert_eq!(report.stats["task_count"], serde_json::json!(2));
    }
}
