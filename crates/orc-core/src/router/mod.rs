//! Message Router & Policy (C8): matches envelopes arriving in the
//! orchestrator's own inbox against phase-policy rules, reassigns retryable
//! errors back to their original recipient, and escalates exhausted
//! retries (or rule-less messages) to `HUMAN/inbox.json`.
//!
//! Routing is sequential: a single [`Router`] serializes calls through an
//! internal mutex so concurrent callers (the watcher loop, or a router
//! driven standalone) observe one decision at a time.

pub mod classify;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chrono::Utc;
use orc_store::models::{
    ConditionOperator, Envelope, EvaluationRecord, MessageType, PhasePolicy, RoutingRule,
};
use orc_store::ledger::EvaluationLedger;
use orc_store::Postbox;
use serde_json::Value;
use tracing::warn;

use classify::ErrorKind;

/// Sentinel destination meaning "route back to whichever agent originally
/// received the task this error refers to", resolved at route time via
/// [`Router::record_dispatch`] history or, failing that, a keyword guess.
pub const ORIGINAL_RECIPIENT: &str = "ORIGINAL_RECIPIENT";

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// The outcome of routing a single envelope, returned by value rather than
/// mutating the envelope in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Delivered { rule_id: String, destination: String },
    Retried { destination: String, attempt: u32 },
    Escalated { reason: String },
}

pub struct Router {
    postbox: Postbox,
    policy: PhasePolicy,
    known_agents: Vec<String>,
    evaluation_ledger: EvaluationLedger,
    dispatch_history: Mutex<HashMap<String, String>>,
    sequencer: Mutex<()>,
}

impl Router {
    pub fn new(
        postbox: Postbox,
        policy: PhasePolicy,
        known_agents: Vec<String>,
        evaluation_ledger: EvaluationLedger,
    ) -> Self {
        Router {
            postbox,
            policy,
            known_agents,
            evaluation_ledger,
            dispatch_history: Mutex::new(HashMap::new()),
            sequencer: Mutex::new(()),
        }
    }

    /// Register the agent a task was actually dispatched to, so a later
    /// error referencing that `task_id` can be reassigned to its exact
    /// original recipient instead of falling back to the keyword
    /// heuristic. The plan runner calls this on every dispatch; a router
    /// running standalone against a postbox it didn't dispatch into simply
    /// never populates this map and falls back to the heuristic.
    pub fn record_dispatch(&self, task_id: &str, agent: &str) {
        self.dispatch_history
            .lock()
            .expect("dispatch history mutex poisoned")
            .insert(task_id.to_string(), agent.to_string());
    }

    /// Route a single inbound envelope. Never panics on I/O failure; the
    /// caller (the inbox watcher) is expected to log and continue.
    pub fn route(&self, envelope: &Envelope) -> Result<RouteDecision> {
        let _guard = self.sequencer.lock().expect("router mutex poisoned");

        if envelope.message_type == MessageType::TaskResult {
            self.record_evaluation(envelope);
        }

        if envelope.message_type == MessageType::Error {
            return self.route_error(envelope);
        }

        let rules = match envelope.message_type {
            MessageType::TaskResult => &self.policy.task_result_rules,
            MessageType::NeedsInput => &self.policy.input_rules,
            _ => return self.deliver_direct(envelope),
        };

        let envelope_json = serde_json::to_value(envelope)?;
        match rules.iter().find(|rule| rule_matches(rule, &envelope_json)) {
            Some(rule) => {
                let destination = self.resolve_destination(&rule.destination, envelope);
                self.postbox.append_to_inbox(&destination, envelope.clone())?;
                Ok(RouteDecision::Delivered {
                    rule_id: rule.id.clone(),
                    destination,
                })
            }
            None => self.deliver_direct(envelope),
        }
    }

    /// No matching rule: fall back to the envelope's own `recipient_id`.
    /// An envelope with no recipient at all is escalated.
    fn deliver_direct(&self, envelope: &Envelope) -> Result<RouteDecision> {
        if envelope.recipient_id.trim().is_empty() {
            let reason = "no matching rule and no recipient_id on envelope".to_string();
            self.escalate(envelope, &reason)?;
            return Ok(RouteDecision::Escalated { reason });
        }
        self.postbox
            .append_to_inbox(&envelope.recipient_id, envelope.clone())?;
        Ok(RouteDecision::Delivered {
            rule_id: format!("route_{}", envelope.task_id),
            destination: envelope.recipient_id.clone(),
        })
    }

    fn resolve_destination(&self, destination: &str, envelope: &Envelope) -> String {
        if destination == ORIGINAL_RECIPIENT {
            self.original_recipient(envelope)
        } else {
            destination.to_string()
        }
    }

    fn original_recipient(&self, envelope: &Envelope) -> String {
        self.dispatch_history
            .lock()
            .expect("dispatch history mutex poisoned")
            .get(&envelope.task_id)
            .cloned()
            .or_else(|| guess_original_recipient(&envelope.payload.content, &self.known_agents))
            .or_else(|| self.known_agents.first().cloned())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }

    /// Classify the error, look up its retry budget, and either reassign
    /// back to the original recipient with an incremented `retry_count`,
    /// or escalate to `HUMAN` once the budget is exhausted.
    fn route_error(&self, envelope: &Envelope) -> Result<RouteDecision> {
        let content = &envelope.payload.content;
        let error_text = content
            .get("error")
            .or_else(|| content.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let kind = classify::classify(error_text);
        let budget = self.retry_budget(kind);

        if envelope.retry_count < budget {
            let destination = self.original_recipient(envelope);
            let mut reassigned = envelope.clone();
            reassigned.retry_count += 1;
            reassigned.recipient_id = destination.clone();
            self.postbox.append_to_inbox(&destination, reassigned)?;
            Ok(RouteDecision::Retried {
                destination,
                attempt: envelope.retry_count + 1,
            })
        } else {
            let reason = format!("Failed after {} retry attempts", envelope.retry_count);
            self.escalate(envelope, &reason)?;
            Ok(RouteDecision::Escalated { reason })
        }
    }

    fn retry_budget(&self, kind: ErrorKind) -> u32 {
        self.policy
            .escalation_rules
            .iter()
            .find(|rule| rule.error_kind == kind.escalation_key())
            .map(|rule| rule.retry_count)
            .unwrap_or(self.policy.retry.max_attempts)
    }

    fn escalate(&self, envelope: &Envelope, reason: &str) -> Result<()> {
        let mut escalated = envelope.clone();
        escalated.escalation = Some(orc_store::models::Escalation {
            reason: reason.to_string(),
            timestamp: now(),
        });
        self.postbox.append_to_human_inbox(escalated)
    }

    /// Output Tracker (C10): extract `{success, score, duration_sec,
    /// notes}` from every `task_result` envelope the router consumes and
    /// append it to the rolling per-agent ledger. Purely reflective.
    fn record_evaluation(&self, envelope: &Envelope) {
        let content = &envelope.payload.content;
        let success = content.get("success").and_then(Value::as_bool).or_else(|| {
            content
                .get("status")
                .and_then(Value::as_str)
                .map(|s| s == "completed" || s == "success")
        });
        let record = EvaluationRecord {
            timestamp: now(),
            agent_id: envelope.sender_id.clone(),
            task_id: envelope.task_id.clone(),
            plan_id: content.get("plan_id").and_then(Value::as_str).map(str::to_string),
            success,
            score: content.get("score").and_then(Value::as_f64),
            duration_sec: content.get("duration_sec").and_then(Value::as_f64),
            notes: content.get("notes").and_then(Value::as_str).map(str::to_string),
        };
        if let Err(e) = self.evaluation_ledger.append(record) {
            warn!(error = %e, "failed to append evaluation ledger record");
        }
    }
}

/// `_get_original_task_recipient` heuristic: scan the error content's
/// `task_id`/`related_task_id` and error text for a substring match
/// against a known agent id, case-insensitively.
fn guess_original_recipient(content: &Value, known_agents: &[String]) -> Option<String> {
    let task_id = content
        .get("task_id")
        .or_else(|| content.get("related_task_id"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let error_text = content.get("error").and_then(Value::as_str).unwrap_or("");
    let haystack = format!("{task_id} {error_text}").to_lowercase();
    known_agents
        .iter()
        .find(|agent| haystack.contains(&agent.to_lowercase()))
        .cloned()
}

fn rule_matches(rule: &RoutingRule, envelope_json: &Value) -> bool {
    rule.conditions.iter().all(|condition| {
        match get_field(envelope_json, &condition.field) {
            Some(value) => condition_matches(value, condition.operator, &condition.value),
            None => false,
        }
    })
}

fn get_field<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn condition_matches(value: &Value, operator: ConditionOperator, target: &Value) -> bool {
    match operator {
        ConditionOperator::Eq => value == target,
        ConditionOperator::Neq => value != target,
        ConditionOperator::Gt => as_f64(value)
            .zip(as_f64(target))
            .is_some_and(|(a, b)| a > b),
        ConditionOperator::Lt => as_f64(value)
            .zip(as_f64(target))
            .is_some_and(|(a, b)| a < b),
        ConditionOperator::In => target.as_array().is_some_and(|items| items.contains(value)),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_store::models::{Payload, RetryPolicy};
    use tempfile::tempdir;

    fn policy() -> PhasePolicy {
        orc_store::policy::default_phase_policy()
    }

    fn envelope(message_type: MessageType, sender: &str, task_id: &str, content: Value) -> Envelope {
        Envelope {
            message_type,
            protocol_version: "1.0".into(),
            sender_id: sender.into(),
            recipient_id: "ORCHESTRATOR".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            task_id: task_id.into(),
            trace_id: Some("trace-1".into()),
            retry_count: 0,
            payload: Payload {
                payload_type: message_type.to_string(),
                content,
            },
            escalation: None,
        }
    }

    fn router(dir: &std::path::Path, policy: PhasePolicy) -> Router {
        let postbox = Postbox::new(dir.join("postbox"));
        let ledger = EvaluationLedger::new(dir.join("logs"));
        Router::new(
            postbox,
            policy,
            vec!["CC".into(), "WA".into(), "CA".into()],
            ledger,
        )
    }

    #[test]
    fn task_result_routes_to_orchestrator_by_default() {
        let dir = tempdir().unwrap();
        let r = router(dir.path(), policy());
        let env = envelope(
            MessageType::TaskResult,
            "CC",
            "T1",
            serde_json::json!({"status": "success", "score": 0.9}),
        );
        let decision = r.route(&env).unwrap();
        assert_eq!(
            decision,
            RouteDecision::Delivered {
                rule_id: "default-task-result".into(),
                destination: "ORCHESTRATOR".into(),
            }
        );
        let inbox = Postbox::new(dir.path().join("postbox"))
            .read_inbox("ORCHESTRATOR")
            .unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn task_result_appends_evaluation_record() {
        let dir = tempdir().unwrap();
        let r = router(dir.path(), policy());
        let env = envelope(
            MessageType::TaskResult,
            "CC",
            "T1",
            serde_json::json!({"status": "success", "score": 0.8, "duration_sec": 12.0}),
        );
        r.route(&env).unwrap();
        let ledger = EvaluationLedger::new(dir.path().join("logs"));
        let records = ledger.all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, Some(0.8));
        assert_eq!(records[0].agent_id, "CC");
    }

    #[test]
    fn error_under_budget_reassigns_to_original_recipient() {
        let dir = tempdir().unwrap();
        let r = router(dir.path(), policy());
        r.record_dispatch("T1", "CC");
        let env = envelope(
            MessageType::Error,
            "CC",
            "T1",
            serde_json::json!({"error": "build failed"}),
        );
        let decision = r.route(&env).unwrap();
        assert_eq!(
            decision,
            RouteDecision::Retried {
                destination: "CC".into(),
                attempt: 1,
            }
        );
        let inbox = Postbox::new(dir.path().join("postbox")).read_inbox("CC").unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].retry_count, 1);
    }

    #[test]
    fn error_exceeding_budget_escalates_to_human() {
        let dir = tempdir().unwrap();
        let mut p = policy();
        p.retry = RetryPolicy { max_attempts: 2 };
        let r = router(dir.path(), p);
        r.record_dispatch("T1", "CC");
        let env = Envelope {
            retry_count: 3,
            ..envelope(
                MessageType::Error,
                "CC",
                "T1",
                serde_json::json!({"error": "build failed"}),
            )
        };
        let decision = r.route(&env).unwrap();
        match decision {
            RouteDecision::Escalated { reason } => {
                assert!(reason.contains("Failed after 3 retry attempts"))
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        let human = Postbox::new(dir.path().join("postbox"))
            .read_inbox(orc_store::postbox::HUMAN_AGENT)
            .unwrap();
        assert_eq!(human.len(), 1);
        assert!(human[0].escalation.is_some());
    }

    #[test]
    fn critical_error_keyword_escalates_with_zero_budget_override() {
        let dir = tempdir().unwrap();
        let mut p = policy();
        p.escalation_rules.push(orc_store::models::EscalationRule {
            error_kind: "critical_error".into(),
            retry_count: 0,
            retry_delay: None,
            notify_human: true,
        });
        let r = router(dir.path(), p);
        let env = envelope(
            MessageType::Error,
            "CC",
            "T1",
            serde_json::json!({"error": "fatal security breach"}),
        );
        let decision = r.route(&env).unwrap();
        assert!(matches!(decision, RouteDecision::Escalated { .. }));
    }

    #[test]
    fn needs_input_routes_to_orchestrator_by_default() {
        let dir = tempdir().unwrap();
        let r = router(dir.path(), policy());
        let env = envelope(MessageType::NeedsInput, "CC", "T1", serde_json::json!({}));
        let decision = r.route(&env).unwrap();
        assert_eq!(
            decision,
            RouteDecision::Delivered {
                rule_id: "default-needs-input".into(),
                destination: "ORCHESTRATOR".into(),
            }
        );
    }

    #[test]
    fn rule_conditions_must_all_match() {
        let mut p = policy();
        p.task_result_rules.insert(
            0,
            RoutingRule {
                id: "high-score-only".into(),
                destination: "METRICS".into(),
                escalation_level: Default::default(),
                max_retries: None,
                retry_delay: None,
                phase_overrides: None,
                conditions: vec![orc_store::models::RuleCondition {
                    field: "payload.content.score".into(),
                    operator: ConditionOperator::Gt,
                    value: serde_json::json!(0.95),
                }],
            },
        );
        let dir = tempdir().unwrap();
        let r = router(dir.path(), p);
        let env = envelope(
            MessageType::TaskResult,
            "CC",
            "T1",
            serde_json::json!({"score": 0.5}),
        );
        let decision = r.route(&env).unwrap();
        assert_eq!(
            decision,
            RouteDecision::Delivered {
                rule_id: "default-task-result".into(),
                destination: "ORCHESTRATOR".into(),
            }
        );
    }
}
