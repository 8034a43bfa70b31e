//! Per-attempt task logs: `logs/tasks/<trace_id>.json`, created on dispatch
//! and mutated through atomic rewrites for the lifetime of that attempt
//! chain.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::atomic::{read_json_or_default, write_json_atomic};
use crate::models::{
    ExecutionMetadata, ExecutionResult, RetryEntry, StateTransition, TaskContent, TaskLog,
    TaskRunState, TaskTimestamps,
};

#[derive(Debug, Clone)]
pub struct TaskLogStore {
    root: PathBuf,
}

impl TaskLogStore {
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        TaskLogStore {
            root: logs_root.into(),
        }
    }

    fn path_for(&self, trace_id: &str) -> PathBuf {
        self.root.join("tasks").join(format!("{trace_id}.json"))
    }

    pub fn read(&self, trace_id: &str) -> Result<Option<TaskLog>> {
        let path = self.path_for(trace_id);
        if !path.exists() {
            return Ok(None);
        }
        read_json_or_default(&path, None)
    }

    fn write(&self, log: &TaskLog) -> Result<()> {
        write_json_atomic(&self.path_for(&log.trace_id), log)
    }

    /// Create the log file on dispatch, in the `pending` state.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        trace_id: &str,
        plan_id: &str,
        task_id: &str,
        agent: &str,
        content: TaskContent,
        metadata: ExecutionMetadata,
        now: &str,
    ) -> Result<TaskLog> {
        let log = TaskLog {
            trace_id: trace_id.to_string(),
            plan_id: plan_id.to_string(),
            task_id: task_id.to_string(),
            agent: agent.to_string(),
            execution_metadata: metadata,
            state_transitions: Vec::new(),
            timestamps: TaskTimestamps {
                created: now.to_string(),
                last_updated: now.to_string(),
                started: None,
                completed: None,
                skipped: None,
            },
            execution_result: ExecutionResult::default(),
            retry_history: Vec::new(),
            task_content: content,
        };
        self.write(&log)?;
        Ok(log)
    }

    /// Append a state transition. Idempotent: re-recording the same
    /// `(from, to, retry_count)` triple is a no-op rather than a duplicate
    /// entry.
    pub fn record_transition(
        &self,
        mut log: TaskLog,
        from: TaskRunState,
        to: TaskRunState,
        reason: Option<String>,
        retry_count: Option<u32>,
        now: &str,
    ) -> Result<TaskLog> {
        let already_recorded = log.state_transitions.last().is_some_and(|last| {
            last.from_state == from.to_string()
                && last.to_state == to.to_string()
                && last.retry_count == retry_count
        });
        if !already_recorded {
            log.state_transitions.push(StateTransition {
                from_state: from.to_string(),
                to_state: to.to_string(),
                timestamp: now.to_string(),
                reason,
                retry_count,
            });
        }
        log.timestamps.last_updated = now.to_string();
        if to == TaskRunState::Running && log.timestamps.started.is_none() {
            log.timestamps.started = Some(now.to_string());
        }
        if to.is_terminal() {
            match to {
                TaskRunState::SkippedDueToCondition => {
                    log.timestamps.skipped = Some(now.to_string())
                }
                _ => log.timestamps.completed = Some(now.to_string()),
            }
        }
        self.write(&log)?;
        Ok(log)
    }

    pub fn record_retry(&self, mut log: TaskLog, entry: RetryEntry) -> Result<TaskLog> {
        log.retry_history.push(entry);
        self.write(&log)?;
        Ok(log)
    }

    pub fn record_result(&self, mut log: TaskLog, result: ExecutionResult) -> Result<TaskLog> {
        log.execution_result = result;
        self.write(&log)?;
        Ok(log)
    }

    /// Directory this store writes into, exposed for log enumeration by
    /// callers.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
