//! Envelope validation: structural checks plus message-type-specific
//! payload shape checks. The validator is side-effect free — it reports
//! problems, it never mutates or rejects malformed input by panicking.

use std::sync::OnceLock;

use orc_store::models::{Envelope, MessageType};
use regex::Regex;
use thiserror::Error;

pub const ORCHESTRATOR_ID: &str = "ORCHESTRATOR";

/// Direction an envelope is travelling, which determines which shape
/// rules apply (only `task_assignment` envelopes are orchestrator-issued,
/// so the `sender_id == ORCHESTRATOR` rule only binds outbound).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9_-]+$").expect("static pattern is valid"))
}

fn version_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+$").expect("static pattern is valid"))
}

/// Validate a single envelope's structure and payload shape. Returns the
/// list of problems found; an empty list means the envelope is valid.
/// `known_agents` is consulted for `recipient_id`/`sender_id` membership
/// checks.
pub fn validate(
    envelope: &Envelope,
    direction: Direction,
    known_agents: &[String],
) -> Vec<String> {
    let mut errors = Vec::new();

    if !id_pattern().is_match(&envelope.task_id) {
        errors.push(format!(
            "task_id {:?} does not match required pattern ^[A-Z0-9_-]+$",
            envelope.task_id
        ));
    }

    if !version_pattern().is_match(&envelope.protocol_version) {
        errors.push(format!(
            "protocol_version {:?} does not match required pattern ^\\d+\\.\\d+$",
            envelope.protocol_version
        ));
    }

    if envelope.payload.payload_type != envelope.message_type.to_string() {
        errors.push(format!(
            "payload.type {:?} does not match envelope type {:?}",
            envelope.payload.payload_type,
            envelope.message_type.to_string()
        ));
    }

    if envelope.sender_id.trim().is_empty() {
        errors.push("sender_id must not be empty".to_string());
    }
    if envelope.recipient_id.trim().is_empty() {
        errors.push("recipient_id must not be empty".to_string());
    }

    if envelope.message_type == MessageType::TaskAssignment {
        if direction == Direction::Outbound && envelope.sender_id != ORCHESTRATOR_ID {
            errors.push(format!(
                "task_assignment sender_id must be {:?}, got {:?}",
                ORCHESTRATOR_ID, envelope.sender_id
            ));
        }
        if !known_agents.iter().any(|a| a == &envelope.recipient_id) {
            errors.push(format!(
                "task_assignment recipient_id {:?} is not a known agent",
                envelope.recipient_id
            ));
        }
        let has_action = envelope
            .payload
            .content
            .get("action")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.is_empty());
        if !has_action {
            errors.push("task_assignment payload.content.action is required".to_string());
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_store::models::Payload;

    fn base_envelope() -> Envelope {
        Envelope {
            message_type: MessageType::TaskAssignment,
            protocol_version: "1.0".into(),
            sender_id: ORCHESTRATOR_ID.into(),
            recipient_id: "AGENT_A".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            task_id: "T1".into(),
            trace_id: Some("trace-1".into()),
            retry_count: 0,
            payload: Payload {
                payload_type: "task_assignment".into(),
                content: serde_json::json!({"action": "run_build"}),
            },
            escalation: None,
        }
    }

    #[test]
    fn valid_task_assignment_produces_no_errors() {
        let known = vec!["AGENT_A".to_string()];
        let errors = validate(&base_envelope(), Direction::Outbound, &known);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn rejects_bad_task_id_pattern() {
        let mut envelope = base_envelope();
        envelope.task_id = "not-upper-case!".into();
        let known = vec!["AGENT_A".to_string()];
        let errors = validate(&envelope, Direction::Outbound, &known);
        assert!(errors.iter().any(|e| e.contains("task_id")));
    }

    #[test]
    fn rejects_task_assignment_from_non_orchestrator_sender() {
        let mut envelope = base_envelope();
        envelope.sender_id = "AGENT_B".into();
        let known = vec!["AGENT_A".to_string()];
        let errors = validate(&envelope, Direction::Outbound, &known);
        assert!(errors.iter().any(|e| e.contains("sender_id")));
    }

    #[test]
    fn rejects_task_assignment_to_unknown_agent() {
        let envelope = base_envelope();
        let known = vec!["AGENT_B".to_string()];
        let errors = validate(&envelope, Direction::Outbound, &known);
        assert!(errors.iter().any(|e| e.contains("not a known agent")));
    }

    #[test]
    fn rejects_task_assignment_missing_action() {
        let mut envelope = base_envelope();
        envelope.payload.content = serde_json::json!({});
        let known = vec!["AGENT_A".to_string()];
        let errors = validate(&envelope, Direction::Outbound, &known);
        assert!(errors.iter().any(|e| e.contains("action")));
    }

    #[test]
    fn rejects_mismatched_payload_type() {
        let mut envelope = base_envelope();
        envelope.payload.payload_type = "task_result".into();
        let known = vec!["AGENT_A".to_string()];
        let errors = validate(&envelope, Direction::Outbound, &known);
        assert!(errors.iter().any(|e| e.contains("payload.type")));
    }

    #[test]
    fn rejects_bad_protocol_version() {
        let mut envelope = base_envelope();
        envelope.protocol_version = "v1".into();
        let known = vec!["AGENT_A".to_string()];
        let errors = validate(&envelope, Direction::Outbound, &known);
        assert!(errors.iter().any(|e| e.contains("protocol_version")));
    }
}
