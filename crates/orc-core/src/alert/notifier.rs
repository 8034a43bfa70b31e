//! Alert delivery: human-inbox, webhook, console, and file notification
//! backends. Webhook delivery retries on 5xx with exponential backoff and
//! never retries on 4xx.

use std::time::Duration;

use chrono::Utc;
use orc_store::models::{AlertAction, Envelope, Escalation, MessageType, Payload};
use orc_store::Postbox;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook delivery requires a url")]
    MissingUrl,

    #[error("webhook transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned client error status {0}")]
    ClientError(u16),

    #[error("webhook returned server error status {0} after retries")]
    ServerError(u16),

    #[error("failed to write to HUMAN inbox: {0}")]
    HumanInbox(#[source] anyhow::Error),

    #[error("failed to write alert log file {path}: {source}")]
    FileLog {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

pub struct Notifier {
    http: reqwest::Client,
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier {
            http: reqwest::Client::new(),
        }
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesize an `alert` envelope and append it to `HUMAN/inbox.json`.
    pub fn notify_human(
        &self,
        postbox: &Postbox,
        rule_name: &str,
        action: &AlertAction,
        context: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let task_id = context
            .get("task_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let envelope = Envelope {
            message_type: MessageType::Alert,
            protocol_version: "1.0".to_string(),
            sender_id: "ORCHESTRATOR".to_string(),
            recipient_id: "HUMAN".to_string(),
            timestamp: now(),
            task_id: task_id.clone(),
            trace_id: Some(format!("alert-{task_id}-{}", uuid::Uuid::new_v4())),
            retry_count: 0,
            payload: Payload {
                payload_type: "alert".to_string(),
                content: serde_json::json!({
                    "level": action.level.clone().unwrap_or_else(|| "info".to_string()),
                    "message": action.message.clone().unwrap_or_else(|| format!("Alert: {rule_name}")),
                    "context": context,
                }),
            },
            escalation: Some(Escalation {
                reason: action
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("alert rule {rule_name} matched")),
                timestamp: now(),
            }),
        };
        postbox
            .append_to_human_inbox(envelope)
            .map_err(NotifyError::HumanInbox)
    }

    /// POST the alert context (optionally rendered through a simple
    /// `{field}`-substitution template) to `action.url`. 2xx/3xx is
    /// success; 5xx retries up to 2 more times with `2^attempt` second
    /// backoff; 4xx never retries — mirrors `_deliver_webhook`.
    pub async fn notify_webhook(
        &self,
        action: &AlertAction,
        context: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let url = action.url.as_deref().ok_or(NotifyError::MissingUrl)?;
        let body = render_body(action, context);
        let timeout = Duration::from_secs(action.timeout_seconds.unwrap_or(10));

        let mut last_status = 0u16;
        for attempt in 0..3u32 {
            let mut request = self.http.post(url).timeout(timeout).json(&body);
            if let Some(headers) = &action.headers {
                for (key, value) in headers {
                    request = request.header(key, value);
                }
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_client_error() {
                        return Err(NotifyError::ClientError(status.as_u16()));
                    }
                    if status.is_server_error() {
                        last_status = status.as_u16();
                        if attempt < 2 {
                            warn!(status = last_status, attempt, "webhook server error, retrying");
                            tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                            continue;
                        }
                        return Err(NotifyError::ServerError(last_status));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < 2 {
                        warn!(error = %e, attempt, "webhook transport error, retrying");
                        tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                        continue;
                    }
                    return Err(NotifyError::Transport(e));
                }
            }
        }
        Err(NotifyError::ServerError(last_status))
    }

    /// Console delivery: a structured log line, for operational alert
    /// variants that don't warrant a human-inbox entry.
    pub fn notify_console(&self, rule_name: &str, context: &serde_json::Value) {
        tracing::warn!(rule = rule_name, %context, "alert rule matched");
    }

    /// File delivery: append one JSON-line record to `action.log_file`.
    pub fn notify_file(
        &self,
        action: &AlertAction,
        rule_name: &str,
        context: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        use std::io::Write;

        let path = action
            .log_file
            .clone()
            .unwrap_or_else(|| "alerts.log".to_string());
        let line = serde_json::json!({
            "timestamp": now(),
            "rule": rule_name,
            "context": context,
        });
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| NotifyError::FileLog { path: path.clone(), source })?;
        writeln!(file, "{line}").map_err(|source| NotifyError::FileLog { path, source })?;
        Ok(())
    }
}

fn render_body(action: &AlertAction, context: &serde_json::Value) -> serde_json::Value {
    match &action.template {
        Some(template) => {
            let mut rendered = template.clone();
            if let Some(map) = context.as_object() {
                for (key, value) in map {
                    let placeholder = format!("{{{key}}}");
                    let replacement = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    rendered = rendered.replace(&placeholder, &replacement);
                }
            }
            serde_json::json!({ "text": rendered })
        }
        None => context.clone(),
    }
}
