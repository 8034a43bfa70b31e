//! On-disk data model: envelopes, task logs, execution traces, and policy
//! documents.
//!
//! These types mirror the JSON shapes written to `postbox/`, `logs/`, and
//! the policy YAML files. Enums follow the same `Display` + `FromStr` +
//! dedicated parse-error pattern throughout, so callers can round-trip
//! through `serde` or through a bare string equally.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid priority: {0:?}")]
pub struct PriorityParseError(String);

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(PriorityParseError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssignment,
    TaskResult,
    Error,
    NeedsInput,
    Alert,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::TaskAssignment => "task_assignment",
            MessageType::TaskResult => "task_result",
            MessageType::Error => "error",
            MessageType::NeedsInput => "needs_input",
            MessageType::Alert => "alert",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid message type: {0:?}")]
pub struct MessageTypeParseError(String);

impl FromStr for MessageType {
    type Err = MessageTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_assignment" => Ok(MessageType::TaskAssignment),
            "task_result" => Ok(MessageType::TaskResult),
            "error" => Ok(MessageType::Error),
            "needs_input" => Ok(MessageType::NeedsInput),
            "alert" => Ok(MessageType::Alert),
            other => Err(MessageTypeParseError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// EscalationLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    None,
    Agent,
    Human,
}

impl Default for EscalationLevel {
    fn default() -> Self {
        EscalationLevel::None
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EscalationLevel::None => "none",
            EscalationLevel::Agent => "agent",
            EscalationLevel::Human => "human",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid escalation level: {0:?}")]
pub struct EscalationLevelParseError(String);

impl FromStr for EscalationLevel {
    type Err = EscalationLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(EscalationLevel::None),
            "agent" => Ok(EscalationLevel::Agent),
            "human" => Ok(EscalationLevel::Human),
            other => Err(EscalationLevelParseError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ConditionOperator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Lt,
    In,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionOperator::Eq => "eq",
            ConditionOperator::Neq => "neq",
            ConditionOperator::Gt => "gt",
            ConditionOperator::Lt => "lt",
            ConditionOperator::In => "in",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid condition operator: {0:?}")]
pub struct ConditionOperatorParseError(String);

impl FromStr for ConditionOperator {
    type Err = ConditionOperatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(ConditionOperator::Eq),
            "neq" => Ok(ConditionOperator::Neq),
            "gt" => Ok(ConditionOperator::Gt),
            "lt" => Ok(ConditionOperator::Lt),
            "in" => Ok(ConditionOperator::In),
            other => Err(ConditionOperatorParseError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRunState — the per-attempt state machine for a dispatched task.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunState {
    Pending,
    Waiting,
    Ready,
    Running,
    Retrying,
    Completed,
    Failed,
    Timeout,
    SkippedDueToCondition,
}

impl fmt::Display for TaskRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskRunState::Pending => "pending",
            TaskRunState::Waiting => "waiting",
            TaskRunState::Ready => "ready",
            TaskRunState::Running => "running",
            TaskRunState::Retrying => "retrying",
            TaskRunState::Completed => "completed",
            TaskRunState::Failed => "failed",
            TaskRunState::Timeout => "timeout",
            TaskRunState::SkippedDueToCondition => "skipped_due_to_condition",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid task run state: {0:?}")]
pub struct TaskRunStateParseError(String);

impl FromStr for TaskRunState {
    type Err = TaskRunStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskRunState::Pending),
            "waiting" => Ok(TaskRunState::Waiting),
            "ready" => Ok(TaskRunState::Ready),
            "running" => Ok(TaskRunState::Running),
            "retrying" => Ok(TaskRunState::Retrying),
            "completed" => Ok(TaskRunState::Completed),
            "failed" => Ok(TaskRunState::Failed),
            "timeout" => Ok(TaskRunState::Timeout),
            "skipped_due_to_condition" => Ok(TaskRunState::SkippedDueToCondition),
            other => Err(TaskRunStateParseError(other.to_string())),
        }
    }
}

impl TaskRunState {
    /// A terminal state ends the attempt chain for a task (exactly one
    /// terminal transition per attempt chain).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskRunState::Completed
                | TaskRunState::Failed
                | TaskRunState::Timeout
                | TaskRunState::SkippedDueToCondition
        )
    }
}

// ---------------------------------------------------------------------------
// PlanRunStatus — aggregate status of a plan execution.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanRunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl fmt::Display for PlanRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanRunStatus::Running => "running",
            PlanRunStatus::Success => "success",
            PlanRunStatus::Partial => "partial",
            PlanRunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Plan definition
// ---------------------------------------------------------------------------

/// A task definition as parsed from a plan YAML document, before DAG
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDef {
    pub task_id: String,
    pub agent: String,
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub unless: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_delay: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub fallback_agent: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub content: TaskContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub input_files: Vec<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub tasks: Vec<TaskDef>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

// ---------------------------------------------------------------------------
// Message envelope
// ---------------------------------------------------------------------------

/// The single envelope shape exchanged in both directions between the
/// orchestrator and an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub protocol_version: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub timestamp: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub reason: String,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Task execution record (per-attempt-chain task log)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: String,
    pub to_state: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryEntry {
    pub attempt: u32,
    pub timestamp: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_reply: Option<Envelope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub execution_layer: usize,
    pub dependencies: Vec<String>,
    pub task_type: String,
    pub priority: Priority,
    pub parallel_tasks: Vec<String>,
    pub depth: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTimestamps {
    pub created: String,
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

/// One file per `trace_id`, mutated in place through the task's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub trace_id: String,
    pub plan_id: String,
    pub task_id: String,
    pub agent: String,
    pub execution_metadata: ExecutionMetadata,
    pub state_transitions: Vec<StateTransition>,
    pub timestamps: TaskTimestamps,
    #[serde(default)]
    pub execution_result: ExecutionResult,
    #[serde(default)]
    pub retry_history: Vec<RetryEntry>,
    pub task_content: TaskContent,
}

// ---------------------------------------------------------------------------
// Plan execution trace (one per run)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_layer: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanTraceSummary {
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub tasks_timeout: u32,
    pub tasks_skipped: u32,
    pub total_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTrace {
    pub execution_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub plan_path: String,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    pub status: PlanRunStatus,
    pub total_tasks: usize,
    #[serde(default)]
    pub dag_structure: serde_json::Value,
    #[serde(default)]
    pub execution_timeline: Vec<TraceEvent>,
    #[serde(default)]
    pub summary: PlanTraceSummary,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Routing policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub destination: String,
    #[serde(default)]
    pub escalation_level: EscalationLevel,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay: Option<u64>,
    #[serde(default)]
    pub phase_overrides: Option<serde_json::Value>,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    #[serde(rename = "type")]
    pub error_kind: String,
    pub retry_count: u32,
    #[serde(default)]
    pub retry_delay: Option<u64>,
    #[serde(default)]
    pub notify_human: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasePolicy {
    #[serde(default)]
    pub task_result_rules: Vec<RoutingRule>,
    #[serde(default)]
    pub error_rules: Vec<RoutingRule>,
    #[serde(default)]
    pub input_rules: Vec<RoutingRule>,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

// ---------------------------------------------------------------------------
// Alert policy
// ---------------------------------------------------------------------------

fn default_agent_wildcard() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertCondition {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default = "default_agent_wildcard")]
    pub agent: String,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub score_below: Option<f64>,
    #[serde(default)]
    pub score_above: Option<f64>,
    #[serde(default)]
    pub duration_above: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertAction {
    pub notify: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub log_file: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub condition: AlertCondition,
    pub action: AlertAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertPolicy {
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLedgerEntry {
    pub timestamp: String,
    pub rule_name: String,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub action: serde_json::Value,
    pub context: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Output evaluation ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub timestamp: String,
    pub agent_id: String,
    pub task_id: String,
    pub plan_id: Option<String>,
    pub success: Option<bool>,
    pub score: Option<f64>,
    pub duration_sec: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingSummary {
    pub agent_id: String,
    pub count: usize,
    pub avg_score: Option<f64>,
    pub success_rate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_roundtrips_through_display_and_parse() {
        for p in [
            Priority::Low,
            Priority::Medium,
            Priority::High,
            Priority::Critical,
        ] {
            let s = p.to_string();
            assert_eq!(Priority::from_str(&s).unwrap(), p);
        }
    }

    #[test]
    fn message_type_rejects_unknown_value() {
        assert!(MessageType::from_str("bogus").is_err());
    }

    #[test]
    fn task_run_state_terminal_classification() {
        assert!(TaskRunState::Completed.is_terminal());
        assert!(TaskRunState::Failed.is_terminal());
        assert!(TaskRunState::Timeout.is_terminal());
        assert!(TaskRunState::SkippedDueToCondition.is_terminal());
        assert!(!TaskRunState::Running.is_terminal());
        assert!(!TaskRunState::Pending.is_terminal());
    }

    #[test]
    fn default_priority_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }
}
