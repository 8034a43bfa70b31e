//! Plan Runner (C6): drives a single plan execution layer-by-layer,
//! dispatching task assignments, waiting for replies, and applying
//! retries, fallback, guards, and context propagation along the way.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use orc_store::execution_trace::ExecutionTraceStore;
use orc_store::models::{
    Envelope, ExecutionMetadata, ExecutionResult, MessageType, Payload, PlanRunStatus, PlanTrace,
    Priority, RetryEntry, TaskDef, TaskLog, TaskRunState, TraceEvent,
};
use orc_store::task_log::TaskLogStore;
use orc_store::Postbox;
use tracing::{info, instrument, warn};

use crate::context::PlanContext;
use crate::envelope::{validate, Direction, ORCHESTRATOR_ID};
use crate::plan::{build_dag, load_and_validate};
use crate::router::Router;
use crate::trace_id;

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub default_timeout: Duration,
    pub default_retry_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            default_timeout: Duration::from_secs(60),
            default_retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub execution_id: String,
    pub status: PlanRunStatus,
    pub trace: PlanTrace,
    pub context: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
struct TaskOutcome {
    status: TaskRunState,
    agent_used: String,
    trace_id: Option<String>,
    reason: Option<String>,
}

pub struct PlanRunner {
    postbox: Postbox,
    task_logs: TaskLogStore,
    traces: ExecutionTraceStore,
    config: RunnerConfig,
    router: Option<Router>,
    /// The trace for the run currently in progress. Threaded through
    /// interior mutability rather than by value so `run_task`/`run_fallback`
    /// can append lifecycle events (`task_created`, `task_ready`,
    /// `task_started`, `task_retry`) without every helper having to pass the
    /// trace back up the call stack.
    current_trace: Mutex<Option<PlanTrace>>,
}

impl PlanRunner {
    pub fn new(postbox: Postbox, task_logs: TaskLogStore, traces: ExecutionTraceStore) -> Self {
        PlanRunner {
            postbox,
            task_logs,
            traces,
            config: RunnerConfig::default(),
            router: None,
            current_trace: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a router with this runner so every dispatch is recorded in
    /// its `ORIGINAL_RECIPIENT` history, letting a router processing this
    /// run's replies reassign errors precisely instead of guessing from
    /// keywords. Only useful when the runner and router share a process
    /// (e.g. `orc run` driving its own watch loop); a router consuming a
    /// postbox populated by a separate `orc run` invocation never sees
    /// these dispatches and falls back to the heuristic.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    fn record_dispatch(&self, task_id: &str, agent: &str) {
        if let Some(router) = &self.router {
            router.record_dispatch(task_id, agent);
        }
    }

    fn set_trace(&self, trace: PlanTrace) {
        *self.current_trace.lock().expect("trace mutex poisoned") = Some(trace);
    }

    /// Append one timeline event to the in-progress run's trace. A write
    /// failure is logged and the in-memory trace keeps the event so the run
    /// itself is never interrupted by a trace-logging problem.
    fn emit(&self, event: TraceEvent) {
        let mut guard = self.current_trace.lock().expect("trace mutex poisoned");
        if let Some(trace) = guard.take() {
            match self.traces.append_event(trace, event) {
                Ok(updated) => *guard = Some(updated),
                Err(e) => warn!(error = %e, "failed to append execution trace event"),
            }
        }
    }

    fn take_trace(&self) -> PlanTrace {
        self.current_trace
            .lock()
            .expect("trace mutex poisoned")
            .take()
            .expect("trace initialized at the start of run()")
    }

    /// Run the plan at `plan_path` to completion. Plan-level validation
    /// failures (`InvalidPlan`) abort before any I/O; everything past that
    /// point degrades to a partial/failed status rather than aborting.
    #[instrument(skip(self), fields(plan_path = %plan_path.display()))]
    pub async fn run(&self, plan_path: &Path) -> Result<RunOutcome> {
        let plan = load_and_validate(plan_path).context("failed to load and validate plan")?;
        let dag = build_dag(&plan).context("failed to build DAG from plan")?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let start_time = now();
        let dag_structure = serde_json::json!({
            "layers": dag.layers,
            "edges": dag.edges,
            "execution_order": dag.execution_order,
        });

        let trace = self
            .traces
            .create(
                &execution_id,
                &plan.plan_id,
                &plan.name,
                &plan_path.display().to_string(),
                plan.tasks.len(),
                dag_structure,
                &start_time,
            )
            .context("failed to create execution trace")?;
        self.set_trace(trace);

        let known_agents: Vec<String> = plan
            .tasks
            .iter()
            .flat_map(|t| std::iter::once(t.agent.clone()).chain(t.fallback_agent.clone()))
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();

        let mut context = PlanContext::new(plan.context.clone());
        let tasks_by_id: HashMap<&str, &TaskDef> = plan
            .tasks
            .iter()
            .map(|t| (t.task_id.as_str(), t))
            .collect();

        info!(plan_id = %plan.plan_id, execution_id = %execution_id, layers = dag.layers.len(), "starting plan run");

        for (layer_idx, layer) in dag.layers.iter().enumerate() {
            self.emit(TraceEvent {
                timestamp: now(),
                event_type: "layer_started".to_string(),
                task_id: None,
                agent: None,
                execution_layer: Some(layer_idx),
                details: Some(serde_json::json!({"tasks": layer})),
                trace_id: None,
            });

            for task_id in layer {
                let task = tasks_by_id
                    .get(task_id.as_str())
                    .expect("dag node always has a backing task definition");

                let outcome = self
                    .run_task(layer_idx, task, &plan.plan_id, &mut context, &known_agents, layer)
                    .await;

                let event_type = match outcome.status {
                    TaskRunState::Completed => "task_completed",
                    TaskRunState::Failed => "task_failed",
                    TaskRunState::Timeout => "task_timeout",
                    TaskRunState::SkippedDueToCondition => "task_skipped",
                    _ => "task_unknown",
                };
                self.emit(TraceEvent {
                    timestamp: now(),
                    event_type: event_type.to_string(),
                    task_id: Some(task.task_id.clone()),
                    agent: Some(outcome.agent_used.clone()),
                    execution_layer: Some(layer_idx),
                    details: outcome.reason.map(|r| serde_json::json!({"reason": r})),
                    trace_id: outcome.trace_id.clone(),
                });
            }

            self.emit(TraceEvent {
                timestamp: now(),
                event_type: "layer_completed".to_string(),
                task_id: None,
                agent: None,
                execution_layer: Some(layer_idx),
                details: None,
                trace_id: None,
            });
        }

        let end_time = now();
        let duration_sec = chrono::DateTime::parse_from_rfc3339(&end_time)
            .ok()
            .zip(chrono::DateTime::parse_from_rfc3339(&start_time).ok())
            .map(|(end, start)| (end - start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let final_context = context.into_map();
        let trace = self.take_trace();
        let trace = self
            .traces
            .finalize(trace, &end_time, duration_sec, final_context.clone())
            .context("failed to finalize execution trace")?;

        info!(status = %trace.status, "plan run finished");

        Ok(RunOutcome {
            execution_id,
            status: trace.status,
            trace,
            context: final_context,
        })
    }

    #[instrument(skip(self, context, known_agents, layer_peers), fields(task_id = %task.task_id, agent = %task.agent))]
    async fn run_task(
        &self,
        layer_idx: usize,
        task: &TaskDef,
        plan_id: &str,
        context: &mut PlanContext,
        known_agents: &[String],
        layer_peers: &[String],
    ) -> TaskOutcome {
        let metadata = ExecutionMetadata {
            execution_layer: layer_idx,
            dependencies: task.dependencies.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
            parallel_tasks: layer_peers
                .iter()
                .filter(|t| *t != &task.task_id)
                .cloned()
                .collect(),
            depth: layer_idx + 1,
        };

        let primary_trace_id = trace_id::generate(plan_id, &task.task_id, 0);
        let log = match self.task_logs.create(
            &primary_trace_id,
            plan_id,
            &task.task_id,
            &task.agent,
            task.content.clone(),
            metadata,
            &now(),
        ) {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "failed to create task log; continuing without one");
                return TaskOutcome {
                    status: TaskRunState::Failed,
                    agent_used: task.agent.clone(),
                    trace_id: None,
                    reason: Some(format!("failed to create task log: {e}")),
                };
            }
        };
        self.emit(TraceEvent {
            timestamp: now(),
            event_type: "task_created".to_string(),
            task_id: Some(task.task_id.clone()),
            agent: Some(task.agent.clone()),
            execution_layer: Some(layer_idx),
            details: None,
            trace_id: Some(primary_trace_id.clone()),
        });

        let log = self.transition(log, TaskRunState::Pending, TaskRunState::Waiting, None, None);
        let mut log = self.transition(log, TaskRunState::Waiting, TaskRunState::Ready, None, None);
        self.emit(TraceEvent {
            timestamp: now(),
            event_type: "task_ready".to_string(),
            task_id: Some(task.task_id.clone()),
            agent: Some(task.agent.clone()),
            execution_layer: Some(layer_idx),
            details: None,
            trace_id: Some(primary_trace_id.clone()),
        });

        let (should_run, reason) = context.evaluate(task);
        if !should_run {
            self.transition(
                log,
                TaskRunState::Ready,
                TaskRunState::SkippedDueToCondition,
                Some(reason.clone()),
                None,
            );
            return TaskOutcome {
                status: TaskRunState::SkippedDueToCondition,
                agent_used: task.agent.clone(),
                trace_id: Some(primary_trace_id),
                reason: Some(reason),
            };
        }

        let timeout = task
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_timeout);
        let retry_delay = task
            .retry_delay
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_retry_delay);
        let max_attempts = task.max_retries + 1;

        let mut final_status = TaskRunState::Failed;
        let mut final_error = String::new();

        'attempts: for attempt in 0..max_attempts {
            let from_state = if attempt == 0 {
                TaskRunState::Ready
            } else {
                TaskRunState::Retrying
            };
            log = self.transition(log, from_state, TaskRunState::Running, None, Some(attempt));
            if attempt == 0 {
                self.emit(TraceEvent {
                    timestamp: now(),
                    event_type: "task_started".to_string(),
                    task_id: Some(task.task_id.clone()),
                    agent: Some(task.agent.clone()),
                    execution_layer: Some(layer_idx),
                    details: None,
                    trace_id: Some(primary_trace_id.clone()),
                });
            }

            let envelope =
                build_task_assignment(task, &task.agent, &primary_trace_id, attempt, &now());
            let errors = validate(&envelope, Direction::Outbound, known_agents);
            if !errors.is_empty() {
                final_status = TaskRunState::Failed;
                final_error = format!("envelope failed validation: {}", errors.join("; "));
                self.record_result(log.clone(), failed_result(&final_error));
                self.transition(
                    log,
                    TaskRunState::Running,
                    final_status,
                    Some(final_error.clone()),
                    Some(attempt),
                );
                break 'attempts;
            }

            if let Err(e) = self.postbox.append_to_inbox(&task.agent, envelope) {
                warn!(error = %e, "failed to append task assignment to inbox");
                log = self.record_retry(
                    log,
                    RetryEntry {
                        attempt,
                        timestamp: now(),
                        result: "dispatch_io_error".to_string(),
                        error_message: Some(e.to_string()),
                        duration_sec: None,
                    },
                );
                if attempt + 1 < max_attempts {
                    log = self.transition(
                        log,
                        TaskRunState::Running,
                        TaskRunState::Retrying,
                        Some("dispatch I/O error".to_string()),
                        Some(attempt),
                    );
                    self.emit(TraceEvent {
                        timestamp: now(),
                        event_type: "task_retry".to_string(),
                        task_id: Some(task.task_id.clone()),
                        agent: Some(task.agent.clone()),
                        execution_layer: Some(layer_idx),
                        details: Some(serde_json::json!({"attempt": attempt, "reason": "dispatch I/O error"})),
                        trace_id: Some(primary_trace_id.clone()),
                    });
                    tokio::time::sleep(retry_delay).await;
                    continue 'attempts;
                }
                final_status = TaskRunState::Failed;
                final_error = format!("dispatch I/O error: {e}");
                self.record_result(log.clone(), failed_result(&final_error));
                self.transition(
                    log,
                    TaskRunState::Running,
                    final_status,
                    Some(final_error.clone()),
                    Some(attempt),
                );
                break 'attempts;
            }
            self.record_dispatch(&task.task_id, &task.agent);

            let waited = Instant::now();
            let reply = self
                .wait_for_reply(&task.agent, &primary_trace_id, timeout)
                .await;

            match reply {
                Ok(Some(reply)) if reply.message_type == MessageType::TaskResult => {
                    log = self.record_result(
                        log,
                        result_from_content(&reply.payload.content, Some(reply.clone())),
                    );
                    self.transition(
                        log,
                        TaskRunState::Running,
                        TaskRunState::Completed,
                        None,
                        Some(attempt),
                    );
                    context.update_from_task_result(&task.task_id, &reply.payload.content);
                    return TaskOutcome {
                        status: TaskRunState::Completed,
                        agent_used: task.agent.clone(),
                        trace_id: Some(primary_trace_id),
                        reason: None,
                    };
                }
                Ok(Some(reply)) => {
                    // error / needs_input: forward for routing, count as a
                    // failed attempt against the retry budget.
                    if let Err(e) = self.postbox.append_to_inbox(ORCHESTRATOR_ID, reply.clone()) {
                        warn!(error = %e, "failed to forward reply to orchestrator inbox");
                    }
                    let message = reply
                        .payload
                        .content
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("agent reported an error")
                        .to_string();
                    log = self.record_retry(
                        log,
                        RetryEntry {
                            attempt,
                            timestamp: now(),
                            result: reply.message_type.to_string(),
                            error_message: Some(message.clone()),
                            duration_sec: Some(waited.elapsed().as_secs_f64()),
                        },
                    );
                    final_error = message;
                    if attempt + 1 < max_attempts {
                        log = self.transition(
                            log,
                            TaskRunState::Running,
                            TaskRunState::Retrying,
                            Some(final_error.clone()),
                            Some(attempt),
                        );
                        self.emit(TraceEvent {
                            timestamp: now(),
                            event_type: "task_retry".to_string(),
                            task_id: Some(task.task_id.clone()),
                            agent: Some(task.agent.clone()),
                            execution_layer: Some(layer_idx),
                            details: Some(
                                serde_json::json!({"attempt": attempt, "reason": final_error}),
                            ),
                            trace_id: Some(primary_trace_id.clone()),
                        });
                        tokio::time::sleep(retry_delay).await;
                        continue 'attempts;
                    }
                    final_status = TaskRunState::Failed;
                    self.record_result(log.clone(), failed_result(&final_error));
                    self.transition(
                        log,
                        TaskRunState::Running,
                        final_status,
                        Some(final_error.clone()),
                        Some(attempt),
                    );
                    break 'attempts;
                }
                Ok(None) => {
                    log = self.record_retry(
                        log,
                        RetryEntry {
                            attempt,
                            timestamp: now(),
                            result: "timeout".to_string(),
                            error_message: Some(
                                "reply not observed within task timeout".to_string(),
                            ),
                            duration_sec: Some(waited.elapsed().as_secs_f64()),
                        },
                    );
                    final_error = "reply not observed within task timeout".to_string();
                    if attempt + 1 < max_attempts {
                        log = self.transition(
                            log,
                            TaskRunState::Running,
                            TaskRunState::Retrying,
                            Some(final_error.clone()),
                            Some(attempt),
                        );
                        self.emit(TraceEvent {
                            timestamp: now(),
                            event_type: "task_retry".to_string(),
                            task_id: Some(task.task_id.clone()),
                            agent: Some(task.agent.clone()),
                            execution_layer: Some(layer_idx),
                            details: Some(
                                serde_json::json!({"attempt": attempt, "reason": final_error}),
                            ),
                            trace_id: Some(primary_trace_id.clone()),
                        });
                        tokio::time::sleep(retry_delay).await;
                        continue 'attempts;
                    }
                    final_status = TaskRunState::Timeout;
                    self.record_result(log.clone(), failed_result(&final_error));
                    self.transition(
                        log,
                        TaskRunState::Running,
                        final_status,
                        Some(final_error.clone()),
                        Some(attempt),
                    );
                    break 'attempts;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read agent outbox while waiting for reply");
                    final_status = TaskRunState::Failed;
                    final_error = format!("failed to read outbox: {e}");
                    self.record_result(log.clone(), failed_result(&final_error));
                    self.transition(
                        log,
                        TaskRunState::Running,
                        final_status,
                        Some(final_error.clone()),
                        Some(attempt),
                    );
                    break 'attempts;
                }
            }
        }

        if let Some(fallback) = &task.fallback_agent {
            return self
                .run_fallback(layer_idx, task, plan_id, context, known_agents, fallback, timeout)
                .await;
        }

        TaskOutcome {
            status: final_status,
            agent_used: task.agent.clone(),
            trace_id: Some(primary_trace_id),
            reason: Some(final_error),
        }
    }

    #[instrument(skip(self, context, known_agents), fields(task_id = %task.task_id, fallback))]
    async fn run_fallback(
        &self,
        layer_idx: usize,
        task: &TaskDef,
        plan_id: &str,
        context: &mut PlanContext,
        known_agents: &[String],
        fallback: &str,
        timeout: Duration,
    ) -> TaskOutcome {
        let fallback_trace_id = trace_id::generate(plan_id, &task.task_id, 1);
        let metadata = ExecutionMetadata {
            execution_layer: layer_idx,
            dependencies: task.dependencies.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
            parallel_tasks: Vec::new(),
            depth: layer_idx + 1,
        };

        let log = match self.task_logs.create(
            &fallback_trace_id,
            plan_id,
            &task.task_id,
            fallback,
            task.content.clone(),
            metadata,
            &now(),
        ) {
            Ok(log) => log,
            Err(e) => {
                return TaskOutcome {
                    status: TaskRunState::Failed,
                    agent_used: fallback.to_string(),
                    trace_id: None,
                    reason: Some(format!("failed to create fallback task log: {e}")),
                };
            }
        };
        self.emit(TraceEvent {
            timestamp: now(),
            event_type: "task_created".to_string(),
            task_id: Some(task.task_id.clone()),
            agent: Some(fallback.to_string()),
            execution_layer: Some(layer_idx),
            details: Some(serde_json::json!({"fallback": true})),
            trace_id: Some(fallback_trace_id.clone()),
        });
        let log = self.transition(log, TaskRunState::Pending, TaskRunState::Running, None, Some(0));
        self.emit(TraceEvent {
            timestamp: now(),
            event_type: "task_started".to_string(),
            task_id: Some(task.task_id.clone()),
            agent: Some(fallback.to_string()),
            execution_layer: Some(layer_idx),
            details: Some(serde_json::json!({"fallback": true})),
            trace_id: Some(fallback_trace_id.clone()),
        });

        let envelope = build_task_assignment(task, fallback, &fallback_trace_id, 0, &now());
        let errors = validate(&envelope, Direction::Outbound, known_agents);
        if !errors.is_empty() {
            let reason = format!("fallback envelope failed validation: {}", errors.join("; "));
            self.transition(
                log,
                TaskRunState::Running,
                TaskRunState::Failed,
                Some(reason.clone()),
                Some(0),
            );
            return TaskOutcome {
                status: TaskRunState::Failed,
                agent_used: fallback.to_string(),
                trace_id: Some(fallback_trace_id),
                reason: Some(reason),
            };
        }

        if let Err(e) = self.postbox.append_to_inbox(fallback, envelope) {
            let reason = format!("fallback dispatch I/O error: {e}");
            self.transition(
                log,
                TaskRunState::Running,
                TaskRunState::Failed,
                Some(reason.clone()),
                Some(0),
            );
            return TaskOutcome {
                status: TaskRunState::Failed,
                agent_used: fallback.to_string(),
                trace_id: Some(fallback_trace_id),
                reason: Some(reason),
            };
        }
        self.record_dispatch(&task.task_id, fallback);

        match self.wait_for_reply(fallback, &fallback_trace_id, timeout).await {
            Ok(Some(reply)) if reply.message_type == MessageType::TaskResult => {
                let log = self.record_result(
                    log,
                    result_from_content(&reply.payload.content, Some(reply.clone())),
                );
                self.transition(log, TaskRunState::Running, TaskRunState::Completed, None, Some(0));
                context.update_from_task_result(&task.task_id, &reply.payload.content);
                TaskOutcome {
                    status: TaskRunState::Completed,
                    agent_used: fallback.to_string(),
                    trace_id: Some(fallback_trace_id),
                    reason: None,
                }
            }
            Ok(Some(reply)) => {
                if let Err(e) = self.postbox.append_to_inbox(ORCHESTRATOR_ID, reply.clone()) {
                    warn!(error = %e, "failed to forward fallback reply to orchestrator inbox");
                }
                let reason = format!("fallback agent reported {}", reply.message_type);
                self.transition(
                    log,
                    TaskRunState::Running,
                    TaskRunState::Failed,
                    Some(reason.clone()),
                    Some(0),
                );
                TaskOutcome {
                    status: TaskRunState::Failed,
                    agent_used: fallback.to_string(),
                    trace_id: Some(fallback_trace_id),
                    reason: Some(reason),
                }
            }
            Ok(None) => {
                let reason = "fallback reply not observed within timeout".to_string();
                self.transition(
                    log,
                    TaskRunState::Running,
                    TaskRunState::Timeout,
                    Some(reason.clone()),
                    Some(0),
                );
                TaskOutcome {
                    status: TaskRunState::Timeout,
                    agent_used: fallback.to_string(),
                    trace_id: Some(fallback_trace_id),
                    reason: Some(reason),
                }
            }
            Err(e) => {
                let reason = format!("failed to read fallback outbox: {e}");
                self.transition(
                    log,
                    TaskRunState::Running,
                    TaskRunState::Failed,
                    Some(reason.clone()),
                    Some(0),
                );
                TaskOutcome {
                    status: TaskRunState::Failed,
                    agent_used: fallback.to_string(),
                    trace_id: Some(fallback_trace_id),
                    reason: Some(reason),
                }
            }
        }
    }

    /// Record a state transition, logging (rather than propagating) a
    /// write failure — the in-memory `log` returned always reflects the
    /// intended state so the attempt loop can keep going.
    fn transition(
        &self,
        log: TaskLog,
        from: TaskRunState,
        to: TaskRunState,
        reason: Option<String>,
        retry_count: Option<u32>,
    ) -> TaskLog {
        let fallback = log.clone();
        match self
            .task_logs
            .record_transition(log, from, to, reason, retry_count, &now())
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!(error = %e, "failed to persist task log transition");
                fallback
            }
        }
    }

    fn record_retry(&self, log: TaskLog, entry: RetryEntry) -> TaskLog {
        let fallback = log.clone();
        match self.task_logs.record_retry(log, entry) {
            Ok(updated) => updated,
            Err(e) => {
                warn!(error = %e, "failed to persist retry entry");
                fallback
            }
        }
    }

    fn record_result(&self, log: TaskLog, result: ExecutionResult) -> TaskLog {
        let fallback = log.clone();
        match self.task_logs.record_result(log, result) {
            Ok(updated) => updated,
            Err(e) => {
                warn!(error = %e, "failed to persist execution result");
                fallback
            }
        }
    }

    async fn wait_for_reply(
        &self,
        agent: &str,
        trace_id: &str,
        timeout: Duration,
    ) -> Result<Option<Envelope>> {
        let start = Instant::now();
        loop {
            if let Some(envelope) = self.postbox.find_reply(agent, trace_id)? {
                return Ok(Some(envelope));
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(None);
            }
            let remaining = timeout - elapsed;
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
    }
}

fn failed_result(error_message: &str) -> ExecutionResult {
    ExecutionResult {
        status: "failed".to_string(),
        score: None,
        duration_sec: None,
        output_files: Vec::new(),
        error_message: Some(error_message.to_string()),
        raw_reply: None,
    }
}

fn result_from_content(content: &serde_json::Value, reply: Option<Envelope>) -> ExecutionResult {
    ExecutionResult {
        status: content
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("completed")
            .to_string(),
        score: content.get("score").and_then(|v| v.as_f64()),
        duration_sec: content.get("duration_sec").and_then(|v| v.as_f64()),
        output_files: content
            .get("output_files")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        error_message: content
            .get("error_message")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        raw_reply: reply,
    }
}

/// Build an outbound `task_assignment` envelope whose content mirrors the
/// task definition's own `content` plus `task_id`, `description`, `action`,
/// `priority`, `dependencies`.
fn build_task_assignment(
    task: &TaskDef,
    recipient: &str,
    trace_id: &str,
    retry_count: u32,
    timestamp: &str,
) -> Envelope {
    let content = serde_json::json!({
        "parameters": task.content.parameters,
        "requirements": task.content.requirements,
        "input_files": task.content.input_files,
        "output_files": task.content.output_files,
        "task_id": task.task_id,
        "description": task.description,
        "action": task.content.action.clone().unwrap_or_default(),
        "priority": priority_str(task.priority),
        "dependencies": task.dependencies,
    });

    Envelope {
        message_type: MessageType::TaskAssignment,
        protocol_version: "1.0".to_string(),
        sender_id: ORCHESTRATOR_ID.to_string(),
        recipient_id: recipient.to_string(),
        timestamp: timestamp.to_string(),
        task_id: task.task_id.clone(),
        trace_id: Some(trace_id.to_string()),
        retry_count,
        payload: Payload {
            payload_type: "task_assignment".to_string(),
            content,
        },
        escalation: None,
    }
}

fn priority_str(p: Priority) -> String {
    p.to_string()
}
