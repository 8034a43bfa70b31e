//! Envelope and plan structural validation (C1).
//!
//! This is the only component every message and every plan passes through
//! before it is trusted by the rest of the runtime. It never mutates its
//! input and never panics on a malformed-but-well-typed document — it
//! reports problems as a list of strings.

pub mod validator;

pub use validator::{validate, Direction, EnvelopeError, ORCHESTRATOR_ID};

use std::collections::HashSet;

use orc_store::models::Plan;
use regex::Regex;
use std::sync::OnceLock;

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9_-]+$").expect("static pattern is valid"))
}

/// Validate a plan document before it is handed to the DAG builder:
/// unique task ids, known dependency references, no self-dependencies,
/// and task_id/plan_id pattern compliance. Returns the list of problems
/// found; an empty list means the plan is valid.
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();

    if plan.plan_id.trim().is_empty() {
        errors.push("plan_id must not be empty".to_string());
    } else if !id_pattern().is_match(&plan.plan_id) {
        errors.push(format!(
            "plan_id {:?} does not match required pattern ^[A-Z0-9_-]+$",
            plan.plan_id
        ));
    }

    if plan.name.trim().is_empty() {
        errors.push("plan name must not be empty".to_string());
    }

    let mut seen_ids = HashSet::new();
    for task in &plan.tasks {
        if !id_pattern().is_match(&task.task_id) {
            errors.push(format!(
                "task_id {:?} does not match required pattern ^[A-Z0-9_-]+$",
                task.task_id
            ));
        }
        if !seen_ids.insert(task.task_id.as_str()) {
            errors.push(format!("duplicate task_id: {:?}", task.task_id));
        }
    }

    for task in &plan.tasks {
        for dep in &task.dependencies {
            if dep == &task.task_id {
                errors.push(format!("task {:?} depends on itself", task.task_id));
            } else if !seen_ids.contains(dep.as_str()) {
                errors.push(format!(
                    "task {:?} depends on unknown task {:?}",
                    task.task_id, dep
                ));
            }
        }
    }

    errors
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
    fn valid_plan_has_no_errors() {
        let p = plan(vec![task("A", &[]), task("B", &["A"])]);
        assert!(validate_plan(&p).is_empty());
    }

    #[test]
    fn rejects_duplicate_task_ids() {
        let p = plan(vec![task("A", &[]), task("A", &[])]);
        let errors = validate_plan(&p);
        assert!(errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn rejects_self_dependency() {
        let p = plan(vec![task("A", &["A"])]);
        let errors = validate_plan(&p);
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let p = plan(vec![task("A", &["ghost"])]);
        let errors = validate_plan(&p);
        assert!(errors.iter().any(|e| e.contains("unknown task")));
    }

    #[test]
    fn rejects_malformed_plan_id() {
        let mut p = plan(vec![task("A", &[])]);
        p.plan_id = "lower case".into();
        let errors = validate_plan(&p);
        assert!(errors.iter().any(|e| e.contains("plan_id")));
    }
}
