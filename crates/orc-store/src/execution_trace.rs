//! Per-run execution trace: `logs/traces/execution_trace_<execution_id>.json`.
//!
//! Created at plan start, appended to as the run progresses, and finalized
//! with aggregate counters and status once every layer has been processed.

use std::path::PathBuf;

use anyhow::Result;

use crate::atomic::{read_json_or_default, write_json_atomic};
use crate::models::{PlanRunStatus, PlanTrace, PlanTraceSummary, TraceEvent};

#[derive(Debug, Clone)]
pub struct ExecutionTraceStore {
    root: PathBuf,
}

impl ExecutionTraceStore {
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        ExecutionTraceStore {
            root: logs_root.into(),
        }
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        self.root
            .join("traces")
            .join(format!("execution_trace_{execution_id}.json"))
    }

    pub fn read(&self, execution_id: &str) -> Result<Option<PlanTrace>> {
        read_json_or_default(&self.path_for(execution_id), None)
    }

    fn write(&self, trace: &PlanTrace) -> Result<()> {
        write_json_atomic(&self.path_for(&trace.execution_id), trace)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        execution_id: &str,
        plan_id: &str,
        plan_name: &str,
        plan_path: &str,
        total_tasks: usize,
        dag_structure: serde_json::Value,
        start_time: &str,
    ) -> Result<PlanTrace> {
        let trace = PlanTrace {
            execution_id: execution_id.to_string(),
            plan_id: plan_id.to_string(),
            plan_name: plan_name.to_string(),
            plan_path: plan_path.to_string(),
            start_time: start_time.to_string(),
            end_time: None,
            duration_sec: None,
            status: PlanRunStatus::Running,
            total_tasks,
            dag_structure,
            execution_timeline: Vec::new(),
            summary: PlanTraceSummary::default(),
            context: Default::default(),
            warnings: Vec::new(),
            errors: Vec::new(),
        };
        self.write(&trace)?;
        Ok(trace)
    }

    pub fn append_event(&self, mut trace: PlanTrace, event: TraceEvent) -> Result<PlanTrace> {
        match event.event_type.as_str() {
            "task_completed" => trace.summary.tasks_completed += 1,
            "task_failed" => trace.summary.tasks_failed += 1,
            "task_timeout" => trace.summary.tasks_timeout += 1,
            "task_skipped" => trace.summary.tasks_skipped += 1,
            "task_retry" => trace.summary.total_retries += 1,
            _ => {}
        }
        trace.execution_timeline.push(event);
        self.write(&trace)?;
        Ok(trace)
    }

    /// Compute the aggregate status: any failures with at least one
    /// completion is `partial`, failures with none is `failed`, otherwise
    /// `success`. Skipped-due-to-condition tasks never count as failures.
    pub fn finalize_status(summary: &PlanTraceSummary) -> PlanRunStatus {
        let failed = summary.tasks_failed + summary.tasks_timeout;
        if failed == 0 {
            PlanRunStatus::Success
        } else if summary.tasks_completed > 0 {
            PlanRunStatus::Partial
        } else {
            PlanRunStatus::Failed
        }
    }

    pub fn finalize(
        &self,
        mut trace: PlanTrace,
        end_time: &str,
        duration_sec: f64,
        context: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<PlanTrace> {
        trace.status = Self::finalize_status(&trace.summary);
        trace.end_time = Some(end_time.to_string());
        trace.duration_sec = Some(duration_sec);
        trace.context = context;
        self.write(&trace)?;
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_status_all_success_when_no_failures() {
        let summary = PlanTraceSummary {
            tasks_completed: 3,
            tasks_failed: 0,
            tasks_timeout: 0,
            tasks_skipped: 1,
            total_retries: 0,
        };
        assert_eq!(
            ExecutionTraceStore::finalize_status(&summary),
            PlanRunStatus::Success
        );
    }

    #[test]
    fn finalize_status_partial_when_mixed_outcomes() {
        let summary = PlanTraceSummary {
            tasks_completed: 2,
            tasks_failed: 1,
            tasks_timeout: 0,
            tasks_skipped: 0,
            total_retries: 0,
        };
        assert_eq!(
            ExecutionTraceStore::finalize_status(&summary),
            PlanRunStatus::Partial
        );
    }

    #[test]
    fn finalize_status_failed_when_nothing_completed() {
        let summary = PlanTraceSummary {
            tasks_completed: 0,
            tasks_failed: 2,
            tasks_timeout: 0,
            tasks_skipped: 0,
            total_retries: 0,
        };
        assert_eq!(
            ExecutionTraceStore::finalize_status(&summary),
            PlanRunStatus::Failed
        );
    }

    #[test]
    fn create_then_append_then_finalize_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExecutionTraceStore::new(dir.path());
        let trace = store
            .create(
                "exec-1",
                "plan-1",
                "demo",
                "plans/demo.yaml",
                2,
                serde_json::json!({}),
                "2026-01-01T00:00:00Z",
            )
            .unwrap();
        let trace = store
            .append_event(
                trace,
                TraceEvent {
                    timestamp: "2026-01-01T00:00:01Z".into(),
                    event_type: "task_completed".into(),
                    task_id: Some("T1".into()),
                    agent: Some("AGENT_A".into()),
                    execution_layer: Some(0),
                    details: None,
                    trace_id: Some("trace-1".into()),
                },
            )
            .unwrap();
        let trace = store
            .finalize(trace, "2026-01-01T00:01:00Z", 60.0, Default::default())
            .unwrap();
        assert_eq!(trace.status, PlanRunStatus::Success);
        assert_eq!(trace.summary.tasks_completed, 1);

        let reloaded = store.read("exec-1").unwrap().unwrap();
        assert_eq!(reloaded.execution_timeline.len(), 1);
    }
}
