//! Shared test fixtures for orc integration tests: a tempdir-backed
//! workspace laying out `postbox/`, `logs/`, and `plans/`, plus builders
//! for plans and envelopes so individual test modules don't hand-roll
//! the same YAML and JSON literals.

use std::path::{Path, PathBuf};

use orc_store::models::{
    Envelope, MessageType, Payload, Plan, Priority, TaskContent, TaskDef,
};
use orc_store::Postbox;
use tempfile::TempDir;

/// A tempdir laid out the way `orc run`/`orc watch` expect: `postbox/`,
/// `logs/`, and `plans/` siblings under one root. Dropping this removes
/// the whole tree.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create workspace tempdir");
        std::fs::create_dir_all(dir.path().join("postbox")).unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::create_dir_all(dir.path().join("plans")).unwrap();
        Workspace { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn postbox_root(&self) -> PathBuf {
        self.dir.path().join("postbox")
    }

    pub fn logs_root(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.dir.path().join("plans")
    }

    pub fn postbox(&self) -> Postbox {
        Postbox::new(self.postbox_root())
    }

    /// Write a plan YAML document under `plans/` and return its path.
    pub fn write_plan(&self, file_name: &str, yaml: &str) -> PathBuf {
        let path = self.plans_dir().join(file_name);
        std::fs::write(&path, yaml).unwrap();
        path
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a [`Plan`] with sane defaults, overridden incrementally.
/// Mirrors a test author writing plan YAML by hand, minus the
/// boilerplate every test would otherwise repeat.
pub struct PlanBuilder {
    plan_id: String,
    name: String,
    tasks: Vec<TaskDef>,
    context: std::collections::HashMap<String, serde_json::Value>,
}

impl PlanBuilder {
    pub fn new(plan_id: &str) -> Self {
        PlanBuilder {
            plan_id: plan_id.to_string(),
            name: format!("{plan_id} test plan"),
            tasks: Vec::new(),
            context: std::collections::HashMap::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn task(mut self, task: TaskDef) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Plan {
        Plan {
            plan_id: self.plan_id,
            name: self.name,
            version: "1.0.0".to_string(),
            context: self.context,
            tasks: self.tasks,
        }
    }
}

/// Builds a [`TaskDef`] with sane defaults.
pub struct TaskDefBuilder {
    task: TaskDef,
}

impl TaskDefBuilder {
    pub fn new(task_id: &str, agent: &str) -> Self {
        TaskDefBuilder {
            task: TaskDef {
                task_id: task_id.to_string(),
                agent: agent.to_string(),
                task_type: "build".to_string(),
                description: format!("{task_id} description"),
                priority: Priority::Medium,
                dependencies: Vec::new(),
                when: None,
                unless: None,
                max_retries: 0,
                retry_delay: None,
                timeout: None,
                fallback_agent: None,
                deadline: None,
                content: TaskContent::default(),
            },
        }
    }

    pub fn dependencies(mut self, deps: &[&str]) -> Self {
        self.task.dependencies = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.task.max_retries = n;
        self
    }

    pub fn fallback_agent(mut self, agent: &str) -> Self {
        self.task.fallback_agent = Some(agent.to_string());
        self
    }

    pub fn when(mut self, expr: &str) -> Self {
        self.task.when = Some(expr.to_string());
        self
    }

    pub fn unless(mut self, expr: &str) -> Self {
        self.task.unless = Some(expr.to_string());
        self
    }

    pub fn build(self) -> TaskDef {
        self.task
    }
}

/// Builds a sample [`Envelope`], defaulting to a `task_result` sent from
/// `agent` back to `ORCHESTRATOR`.
pub struct EnvelopeBuilder {
    envelope: Envelope,
}

impl EnvelopeBuilder {
    pub fn new(task_id: &str, agent: &str) -> Self {
        EnvelopeBuilder {
            envelope: Envelope {
                message_type: MessageType::TaskResult,
                protocol_version: "1.0".to_string(),
                sender_id: agent.to_string(),
                recipient_id: "ORCHESTRATOR".to_string(),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                task_id: task_id.to_string(),
                trace_id: Some(format!("{task_id}-trace")),
                retry_count: 0,
                payload: Payload {
                    payload_type: "task_result".to_string(),
                    content: serde_json::json!({"status": "success"}),
                },
                escalation: None,
            },
        }
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.envelope.message_type = message_type;
        self.envelope.payload.payload_type = message_type.to_string();
        self
    }

    pub fn recipient(mut self, recipient: &str) -> Self {
        self.envelope.recipient_id = recipient.to_string();
        self
    }

    pub fn trace_id(mut self, trace_id: &str) -> Self {
        self.envelope.trace_id = Some(trace_id.to_string());
        self
    }

    pub fn retry_count(mut self, n: u32) -> Self {
        self.envelope.retry_count = n;
        self
    }

    pub fn content(mut self, content: serde_json::Value) -> Self {
        self.envelope.payload.content = content;
        self
    }

    pub fn build(self) -> Envelope {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_builder_produces_a_loadable_plan() {
        let plan = PlanBuilder::new("PLAN_1")
            .task(TaskDefBuilder::new("A", "AGENT_A").build())
            .task(TaskDefBuilder::new("B", "AGENT_B").dependencies(&["A"]).build())
            .build();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].dependencies, vec!["A".to_string()]);
    }

    #[test]
    fn workspace_lays_out_expected_directories() {
        let ws = Workspace::new();
        assert!(ws.postbox_root().exists());
        assert!(ws.logs_root().exists());
        assert!(ws.plans_dir().exists());
    }

    #[test]
    fn envelope_builder_defaults_to_task_result() {
        let envelope = EnvelopeBuilder::new("T1", "CC").build();
        assert_eq!(envelope.message_type, MessageType::TaskResult);
        assert_eq!(envelope.recipient_id, "ORCHESTRATOR");
    }
}
