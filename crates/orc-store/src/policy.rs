//! Loading `phase_policy.yaml` and `alert_policy.yaml` from disk.
//!
//! A missing or malformed policy file degrades to documented defaults
//! rather than aborting the run; callers are expected to log the
//! [`PolicyLoadError`] as a warning and proceed with what [`default`]
//! returns.

use std::path::Path;

use crate::models::{AlertPolicy, EscalationLevel, PhasePolicy, RoutingRule};

#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Load a phase (routing) policy from `path`. Returns `Ok(None)` if the
/// file does not exist, so the caller can fall back to hardcoded defaults.
pub fn load_phase_policy(path: &Path) -> Result<Option<PhasePolicy>, PolicyLoadError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|source| PolicyLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let policy: PhasePolicy =
        serde_yaml::from_str(&raw).map_err(|source| PolicyLoadError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    Ok(Some(policy))
}

pub fn load_alert_policy(path: &Path) -> Result<Option<AlertPolicy>, PolicyLoadError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|source| PolicyLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let policy: AlertPolicy =
        serde_yaml::from_str(&raw).map_err(|source| PolicyLoadError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    Ok(Some(policy))
}

/// The hardcoded routing defaults used when no phase policy is loaded:
/// `task_result` routes back to the orchestrator with no escalation,
/// `error` routes to the code-implementing agent with agent-level
/// escalation, `needs_input` routes to the orchestrator with human
/// escalation.
pub fn default_phase_policy() -> PhasePolicy {
    PhasePolicy {
        task_result_rules: vec![RoutingRule {
            id: "default-task-result".into(),
            destination: "ORCHESTRATOR".into(),
            escalation_level: EscalationLevel::None,
            max_retries: None,
            retry_delay: None,
            phase_overrides: None,
            conditions: Vec::new(),
        }],
        error_rules: vec![RoutingRule {
            id: "default-error".into(),
            destination: "ORIGINAL_RECIPIENT".into(),
            escalation_level: EscalationLevel::Agent,
            max_retries: None,
            retry_delay: None,
            phase_overrides: None,
            conditions: Vec::new(),
        }],
        input_rules: vec![RoutingRule {
            id: "default-needs-input".into(),
            destination: "ORCHESTRATOR".into(),
            escalation_level: EscalationLevel::Human,
            max_retries: None,
            retry_delay: None,
            phase_overrides: None,
            conditions: Vec::new(),
        }],
        escalation_rules: Vec::new(),
        retry: Default::default(),
    }
}
