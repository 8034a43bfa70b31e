//! Alert Evaluator & Notifier (C9): matches envelopes the inbox watcher
//! hands it against the alert policy's rules, records a ledger entry for
//! every match, and dispatches through [`notifier::Notifier`].

pub mod notifier;

use anyhow::Result;
use orc_store::ledger::AlertLedger;
use orc_store::models::{AlertCondition, AlertLedgerEntry, AlertPolicy, Envelope, MessageType};
use orc_store::Postbox;
use serde_json::Value;
use tracing::warn;

use notifier::Notifier;

pub struct AlertEvaluator {
    policy: AlertPolicy,
    postbox: Postbox,
    ledger: AlertLedger,
    notifier: Notifier,
}

impl AlertEvaluator {
    pub fn new(policy: AlertPolicy, postbox: Postbox, ledger: AlertLedger) -> Self {
        AlertEvaluator {
            policy,
            postbox,
            ledger,
            notifier: Notifier::new(),
        }
    }

    /// Check every enabled rule against `envelope`. Every match is
    /// recorded in the alert ledger *before* delivery is attempted; a
    /// delivery failure is logged and does not stop evaluation of the
    /// remaining rules, nor propagate to the caller (the watch loop must
    /// keep polling regardless of notifier outages).
    pub async fn evaluate(&self, envelope: &Envelope) -> Result<usize> {
        let mut matched = 0;
        for rule in self.policy.rules.iter().filter(|r| r.enabled) {
            if !condition_matches(&rule.condition, envelope) {
                continue;
            }
            matched += 1;
            let context = alert_context(envelope);

            let entry = AlertLedgerEntry {
                timestamp: chrono::Utc::now().to_rfc3339(),
                rule_name: rule.name.clone(),
                task_id: Some(envelope.task_id.clone()),
                agent_id: Some(envelope.sender_id.clone()),
                action: serde_json::to_value(&rule.action)?,
                context: context.clone(),
            };
            if let Err(e) = self.ledger.append(entry) {
                warn!(error = %e, rule = %rule.name, "failed to append alert ledger entry");
            }

            let outcome = match rule.action.notify.as_str() {
                "human" => self
                    .notifier
                    .notify_human(&self.postbox, &rule.name, &rule.action, &context)
                    .map_err(anyhow::Error::from),
                "webhook" => self
                    .notifier
                    .notify_webhook(&rule.action, &context)
                    .await
                    .map_err(anyhow::Error::from),
                "file" => self
                    .notifier
                    .notify_file(&rule.action, &rule.name, &context)
                    .map_err(anyhow::Error::from),
                _ => {
                    self.notifier.notify_console(&rule.name, &context);
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                warn!(error = %e, rule = %rule.name, "alert delivery failed");
            }
        }
        Ok(matched)
    }
}

/// `_rule_matches`: message type must match exactly; `agent` is a `*`
/// wildcard or an exact sender match; the remaining fields only apply to
/// their respective message types and are skipped (treated as matching)
/// when unset on the rule.
fn condition_matches(condition: &AlertCondition, envelope: &Envelope) -> bool {
    if condition.message_type != envelope.payload.payload_type {
        return false;
    }
    if condition.agent != "*" && condition.agent != envelope.sender_id {
        return false;
    }

    match envelope.message_type {
        MessageType::Error => {
            if let Some(expected) = condition.retry_count {
                if envelope.retry_count < expected {
                    return false;
                }
            }
            if let Some(expected) = &condition.error_code {
                let actual = envelope
                    .payload
                    .content
                    .get("error_code")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if actual != expected {
                    return false;
                }
            }
            true
        }
        MessageType::TaskResult => {
            let content = &envelope.payload.content;
            if let Some(threshold) = condition.score_below {
                match content.get("score").and_then(Value::as_f64) {
                    Some(score) if score < threshold => {}
                    _ => return false,
                }
            }
            if let Some(threshold) = condition.score_above {
                match content.get("score").and_then(Value::as_f64) {
                    Some(score) if score > threshold => {}
                    _ => return false,
                }
            }
            if let Some(threshold) = condition.duration_above {
                match content.get("duration_sec").and_then(Value::as_f64) {
                    Some(duration) if duration > threshold => {}
                    _ => return false,
                }
            }
            if let Some(expected) = &condition.status {
                let actual = content.get("status").and_then(Value::as_str).unwrap_or("");
                if actual != expected {
                    return false;
                }
            }
            true
        }
        _ => true,
    }
}

fn alert_context(envelope: &Envelope) -> Value {
    serde_json::json!({
        "task_id": envelope.task_id,
        "agent_id": envelope.sender_id,
        "message_type": envelope.payload.payload_type,
        "timestamp": envelope.timestamp,
        "retry_count": envelope.retry_count,
        "content": envelope.payload.content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_store::models::{AlertAction, AlertRule, Payload};
    use tempfile::tempdir;

    fn envelope(message_type: MessageType, content: Value) -> Envelope {
        Envelope {
            message_type,
            protocol_version: "1.0".into(),
            sender_id: "CC".into(),
            recipient_id: "ORCHESTRATOR".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            task_id: "T1".into(),
            trace_id: Some("trace-1".into()),
            retry_count: 0,
            payload: Payload {
                payload_type: message_type.to_string(),
                content,
            },
            escalation: None,
        }
    }

    fn evaluator(dir: &std::path::Path, policy: AlertPolicy) -> AlertEvaluator {
        let postbox = Postbox::new(dir.join("postbox"));
        let ledger = orc_store::ledger::AlertLedger::new(dir.join("logs"));
        AlertEvaluator::new(policy, postbox, ledger)
    }

    fn rule(name: &str, condition: AlertCondition, action: AlertAction) -> AlertRule {
        AlertRule {
            name: name.into(),
            enabled: true,
            condition,
            action,
        }
    }

    #[tokio::test]
    async fn low_score_rule_matches_and_notifies_human() {
        let dir = tempdir().unwrap();
        let policy = AlertPolicy {
            rules: vec![rule(
                "low_score",
                AlertCondition {
                    message_type: "task_result".into(),
                    agent: "*".into(),
                    score_below: Some(0.5),
                    ..Default::default()
                },
                AlertAction {
                    notify: "human".into(),
                    message: Some("score dropped".into()),
                    ..Default::default()
                },
            )],
        };
        let evaluator = evaluator(dir.path(), policy);
        let env = envelope(MessageType::TaskResult, serde_json::json!({"score": 0.2}));
        let matched = evaluator.evaluate(&env).await.unwrap();
        assert_eq!(matched, 1);

        let human = evaluator.postbox.read_inbox("HUMAN").unwrap();
        assert_eq!(human.len(), 1);

        let ledger_entries = orc_store::ledger::AlertLedger::new(dir.path().join("logs"))
            .all()
            .unwrap();
        assert_eq!(ledger_entries.len(), 1);
        assert_eq!(ledger_entries[0].rule_name, "low_score");
    }

    #[tokio::test]
    async fn high_score_does_not_match_low_score_rule() {
        let dir = tempdir().unwrap();
        let policy = AlertPolicy {
            rules: vec![rule(
                "low_score",
                AlertCondition {
                    message_type: "task_result".into(),
                    agent: "*".into(),
                    score_below: Some(0.5),
                    ..Default::default()
                },
                AlertAction {
                    notify: "human".into(),
                    ..Default::default()
                },
            )],
        };
        let evaluator = evaluator(dir.path(), policy);
        let env = envelope(MessageType::TaskResult, serde_json::json!({"score": 0.9}));
        assert_eq!(evaluator.evaluate(&env).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn disabled_rule_never_matches() {
        let dir = tempdir().unwrap();
        let mut policy = AlertPolicy {
            rules: vec![rule(
                "low_score",
                AlertCondition {
                    message_type: "task_result".into(),
                    agent: "*".into(),
                    score_below: Some(0.5),
                    ..Default::default()
                },
                AlertAction {
                    notify: "human".into(),
                    ..Default::default()
                },
            )],
        };
        policy.rules[0].enabled = false;
        let evaluator = evaluator(dir.path(), policy);
        let env = envelope(MessageType::TaskResult, serde_json::json!({"score": 0.1}));
        assert_eq!(evaluator.evaluate(&env).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn agent_specific_rule_ignores_other_agents() {
        let dir = tempdir().unwrap();
        let policy = AlertPolicy {
            rules: vec![rule(
                "cc_errors",
                AlertCondition {
                    message_type: "error".into(),
                    agent: "WA".into(),
                    ..Default::default()
                },
                AlertAction {
                    notify: "console".into(),
                    ..Default::default()
                },
            )],
        };
        let evaluator = evaluator(dir.path(), policy);
        let env = envelope(MessageType::Error, serde_json::json!({"error": "boom"}));
        assert_eq!(evaluator.evaluate(&env).await.unwrap(), 0);
    }
}
