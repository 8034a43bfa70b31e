//! End-to-end integration test: load a two-task plan, run it with a
//! simulated agent replying on its own outbox, and check the resulting
//! execution trace and evaluation ledger.

use std::time::Duration;

use orc_core::runner::{PlanRunner, RunnerConfig};
use orc_store::execution_trace::ExecutionTraceStore;
use orc_store::ledger::EvaluationLedger;
use orc_store::models::{MessageType, Payload, PlanRunStatus};
use orc_store::task_log::TaskLogStore;
use orc_test_utils::{PlanBuilder, TaskDefBuilder, Workspace};

/// Poll `agent`'s inbox until a task assignment appears, then drop a
/// matching `task_result` reply into its outbox. Stands in for a real
/// agent process consuming its inbox and replying.
async fn simulate_agent(workspace_root: std::path::PathBuf, agent: &'static str, success: bool) {
    let postbox = orc_store::Postbox::new(workspace_root.join("postbox"));
    for _ in 0..200 {
        let inbox = postbox.read_inbox(agent).unwrap();
        if let Some(envelope) = inbox.into_iter().next_back() {
            let reply = orc_store::models::Envelope {
                message_type: MessageType::TaskResult,
                protocol_version: "1.0".to_string(),
                sender_id: agent.to_string(),
                recipient_id: "ORCHESTRATOR".to_string(),
                timestamp: "2026-01-01T00:00:01Z".to_string(),
                task_id: envelope.task_id.clone(),
                trace_id: envelope.trace_id.clone(),
                retry_count: 0,
                payload: Payload {
                    payload_type: "task_result".to_string(),
                    content: serde_json::json!({
                        "success": success,
                        "status": if success { "completed" } else { "failed" },
                        "score": if success { 0.9 } else { 0.1 },
                    }),
                },
                escalation: None,
            };
            postbox.append_to_outbox(agent, reply).unwrap();
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("agent {agent} never received a task assignment");
}

fn runner(ws: &Workspace) -> PlanRunner {
    let postbox = ws.postbox();
    let task_logs = TaskLogStore::new(ws.logs_root());
    let traces = ExecutionTraceStore::new(ws.logs_root());
    PlanRunner::new(postbox, task_logs, traces).with_config(RunnerConfig {
        default_timeout: Duration::from_secs(2),
        default_retry_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(10),
    })
}

#[tokio::test]
async fn two_task_chain_completes_successfully() {
    let ws = Workspace::new();
    let plan = PlanBuilder::new("PLAN_E2E")
        .task(TaskDefBuilder::new("A", "AGENT_A").build())
        .task(TaskDefBuilder::new("B", "AGENT_B").dependencies(&["A"]).build())
        .build();
    let plan_path = ws.write_plan("plan.yaml", &serde_yaml::to_string(&plan).unwrap());

    let agent_a = tokio::spawn(simulate_agent(ws.root().to_path_buf(), "AGENT_A", true));
    let agent_b = tokio::spawn(simulate_agent(ws.root().to_path_buf(), "AGENT_B", true));

    let outcome = runner(&ws).run(&plan_path).await.unwrap();

    agent_a.await.unwrap();
    agent_b.await.unwrap();

    assert_eq!(outcome.status, PlanRunStatus::Success);
    assert_eq!(outcome.trace.summary.tasks_completed, 2);
    assert_eq!(outcome.trace.summary.tasks_failed, 0);

    let traces = ExecutionTraceStore::new(ws.logs_root());
    let persisted = traces.read(&outcome.execution_id).unwrap().unwrap();
    assert_eq!(persisted.status, PlanRunStatus::Success);
}

#[tokio::test]
async fn failing_task_without_fallback_marks_plan_partial() {
    let ws = Workspace::new();
    let plan = PlanBuilder::new("PLAN_E2E_FAIL")
        .task(TaskDefBuilder::new("A", "AGENT_A").max_retries(0).build())
        .build();
    let plan_path = ws.write_plan("plan.yaml", &serde_yaml::to_string(&plan).unwrap());

    let agent_a = tokio::spawn(simulate_agent(ws.root().to_path_buf(), "AGENT_A", false));
    let outcome = runner(&ws).run(&plan_path).await.unwrap();
    agent_a.await.unwrap();

    assert_eq!(outcome.status, PlanRunStatus::Failed);
    assert_eq!(outcome.trace.summary.tasks_failed, 1);
}

#[tokio::test]
async fn task_result_lands_in_evaluation_ledger() {
    let ws = Workspace::new();
    let plan = PlanBuilder::new("PLAN_E2E_LEDGER")
        .task(TaskDefBuilder::new("A", "AGENT_A").build())
        .build();
    let plan_path = ws.write_plan("plan.yaml", &serde_yaml::to_string(&plan).unwrap());

    let router = orc_core::router::Router::new(
        ws.postbox(),
        orc_store::policy::default_phase_policy(),
        vec!["AGENT_A".to_string()],
        EvaluationLedger::new(ws.logs_root()),
    );
    let plan_runner = runner(&ws).with_router(router);

    let agent_a = tokio::spawn(simulate_agent(ws.root().to_path_buf(), "AGENT_A", true));
    plan_runner.run(&plan_path).await.unwrap();
    agent_a.await.unwrap();

    // The runner itself doesn't score task_results; a router draining
    // the orchestrator inbox does. Simulate that drain here.
    let postbox = ws.postbox();
    let router = orc_core::router::Router::new(
        postbox.clone(),
        orc_store::policy::default_phase_policy(),
        vec!["AGENT_A".to_string()],
        EvaluationLedger::new(ws.logs_root()),
    );
    for envelope in postbox.read_inbox("ORCHESTRATOR").unwrap() {
        router.route(&envelope).unwrap();
    }

    let ledger = EvaluationLedger::new(ws.logs_root());
    let records = ledger.all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].agent_id, "AGENT_A");
    assert_eq!(records[0].score, Some(0.9));
}
