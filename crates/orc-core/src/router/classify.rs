//! Error-kind classification for retry budgets (C8): a handful of
//! substring checks over the error message body, first match wins,
//! defaulting to a generic `error` bucket.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Critical,
    DependencyBlocked,
    ResourceConstraint,
    Generic,
}

impl ErrorKind {
    /// The `type` key an `EscalationRule` in the phase policy uses to
    /// override this kind's retry budget.
    pub fn escalation_key(self) -> &'static str {
        match self {
            ErrorKind::Critical => "critical_error",
            ErrorKind::DependencyBlocked => "dependency_blocked",
            ErrorKind::ResourceConstraint => "resource_constraint",
            ErrorKind::Generic => "error",
        }
    }
}

const CRITICAL_KEYWORDS: &[&str] = &["security", "data loss", "system breaking", "critical", "fatal"];
const DEPENDENCY_KEYWORDS: &[&str] = &["dependency", "blocked", "waiting for", "requires"];
const RESOURCE_KEYWORDS: &[&str] = &["quota", "limit", "memory", "disk", "cpu", "resource"];

pub fn classify(error_message: &str) -> ErrorKind {
    let lower = error_message.to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ErrorKind::Critical
    } else if DEPENDENCY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ErrorKind::DependencyBlocked
    } else if RESOURCE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ErrorKind::ResourceConstraint
    } else {
        ErrorKind::Generic
    }
}
