//! Plan Context Engine (C4): a mutable key/value context threaded through a
//! plan run, plus the `when`/`unless` guard evaluator the runner consults
//! before dispatching each task.

pub mod expr;

use std::collections::HashMap;

use orc_store::models::TaskDef;
use serde_json::Value;

/// Context accumulated across a single plan execution. Starts from the
/// plan's own `context` block and is updated after every task result.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    values: HashMap<String, Value>,
}

impl PlanContext {
    pub fn new(initial: HashMap<String, Value>) -> Self {
        PlanContext { values: initial }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn update(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> HashMap<String, Value> {
        self.values
    }

    /// Fold a `task_result` reply's payload content into the context:
    /// `<task_id>_status`, `<task_id>_score` + `last_score`, any
    /// `context_updates` the agent reported, then `<task_id>_completed`.
    ///
    /// Mirrors `PlanContextEngine.update_from_task_result` in the Python
    /// original: status and score are always recorded (score only when
    /// present), `context_updates` is merged key-by-key, and the completed
    /// flag is set last so a guard can check it immediately after.
    pub fn update_from_task_result(&mut self, task_id: &str, content: &Value) {
        if let Some(status) = content.get("status").and_then(Value::as_str) {
            self.update(format!("{task_id}_status"), Value::String(status.to_string()));
        }
        if let Some(score) = content.get("score") {
            self.update(format!("{task_id}_score"), score.clone());
            self.update("last_score", score.clone());
        }
        if let Some(Value::Object(updates)) = content.get("context_updates") {
            for (k, v) in updates {
                self.update(k.clone(), v.clone());
            }
        }
        self.update(format!("{task_id}_completed"), Value::Bool(true));
    }

    /// Evaluate a task's `when`/`unless` guards against the current
    /// context. Returns `(should_run, reason)`.
    ///
    /// Absent guards always pass. `when` is
    /// checked first and must be truthy or the task is skipped; `unless` is
    /// checked next and must be falsy or the task is skipped. A malformed
    /// guard expression is treated as a skip, carrying the parse/eval error
    /// in the reason, rather than aborting the whole plan run.
    pub fn evaluate(&self, task: &TaskDef) -> (bool, String) {
        if task.when.is_none() && task.unless.is_none() {
            return (true, "all conditions satisfied".to_string());
        }

        if let Some(when_expr) = &task.when {
            match self.eval_guard(when_expr) {
                Ok(true) => {}
                Ok(false) => {
                    return (false, format!("`when` condition not satisfied: {when_expr}"));
                }
                Err(e) => {
                    return (
                        false,
                        format!("`when` condition could not be evaluated ({when_expr}): {e}"),
                    );
                }
            }
        }

        if let Some(unless_expr) = &task.unless {
            match self.eval_guard(unless_expr) {
                Ok(false) => {}
                Ok(true) => {
                    return (
                        false,
                        format!("`unless` condition satisfied (task skipped): {unless_expr}"),
                    );
                }
                Err(e) => {
                    return (
                        false,
                        format!("`unless` condition could not be evaluated ({unless_expr}): {e}"),
                    );
                }
            }
        }

        (true, "all conditions satisfied".to_string())
    }

    fn eval_guard(&self, src: &str) -> Result<bool, String> {
        let ast = expr::parse(src).map_err(|e| e.to_string())?;
        let value = expr::eval(&ast, &self.values).map_err(|e| e.to_string())?;
        Ok(expr::is_truthy(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_store::models::{Priority, TaskContent};

    fn task(when: Option<&str>, unless: Option<&str>) -> TaskDef {
        TaskDef {
            task_id: "B".to_string(),
            agent: "AGENT_B".to_string(),
            task_type: "test".to_string(),
            description: "guarded".to_string(),
            priority: Priority::Medium,
            dependencies: vec!["A".to_string()],
            when: when.map(str::to_string),
            unless: unless.map(str::to_string),
            max_retries: 0,
            retry_delay: None,
            timeout: None,
            fallback_agent: None,
            deadline: None,
            content: TaskContent::default(),
        }
    }

    #[test]
    fn absent_guards_always_run() {
        let ctx = PlanContext::default();
        let (should_run, reason) = ctx.evaluate(&task(None, None));
        assert!(should_run);
        assert_eq!(reason, "all conditions satisfied");
    }

    #[test]
    fn update_from_task_result_sets_status_score_and_completed() {
        let mut ctx = PlanContext::default();
        ctx.update_from_task_result(
            "A",
            &serde_json::json!({"status": "success", "score": 0.9}),
        );
        assert_eq!(ctx.get("A_status"), Some(&Value::String("success".into())));
        assert_eq!(ctx.get("A_score"), Some(&Value::from(0.9)));
        assert_eq!(ctx.get("last_score"), Some(&Value::from(0.9)));
        assert_eq!(ctx.get("A_completed"), Some(&Value::Bool(true)));
    }

    #[test]
    fn update_from_task_result_merges_context_updates() {
        let mut ctx = PlanContext::default();
        ctx.update_from_task_result(
            "A",
            &serde_json::json!({"status": "success", "context_updates": {"data_quality": "high"}}),
        );
        assert_eq!(ctx.get("data_quality"), Some(&Value::String("high".into())));
    }

    #[test]
    fn when_guard_gates_on_prior_task_status() {
        let mut ctx = PlanContext::default();
        ctx.update_from_task_result("A", &serde_json::json!({"status": "success"}));
        let (should_run, _) = ctx.evaluate(&task(Some("A_status == 'success'"), None));
        assert!(should_run);

        let (should_run, reason) = ctx.evaluate(&task(Some("A_status == 'failed'"), None));
        assert!(!should_run);
        assert!(reason.contains("not satisfied"));
    }

    #[test]
    fn unless_guard_skips_when_truthy() {
        let mut ctx = PlanContext::default();
        ctx.update_from_task_result("A", &serde_json::json!({"status": "failed"}));
        let (should_run, reason) = ctx.evaluate(&task(None, Some("A_status == 'failed'")));
        assert!(!should_run);
        assert!(reason.contains("unless"));
    }

    #[test]
    fn malformed_guard_skips_rather_than_panics() {
        let ctx = PlanContext::default();
        let (should_run, reason) = ctx.evaluate(&task(Some("import os"), None));
        assert!(!should_run);
        assert!(reason.contains("could not be evaluated"));
    }
}
