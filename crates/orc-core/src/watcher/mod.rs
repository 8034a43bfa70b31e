//! Inbox Watcher (C7): polls the orchestrator's own inbox and hands each
//! unseen envelope to the Router (C8) and then the Alert Evaluator (C9),
//! in that order, deduplicated by `(trace_id, task_id)`.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use orc_store::Postbox;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::alert::AlertEvaluator;
use crate::router::Router;

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Identifies one already-processed envelope. `trace_id` is optional on
/// the wire, so envelopes without one dedupe on `task_id` alone paired
/// with an empty string — good enough for an in-memory, non-durable set.
type SeenKey = (String, String);

pub struct InboxWatcher {
    postbox: Postbox,
    router: Router,
    alerts: AlertEvaluator,
    config: WatcherConfig,
    seen: Mutex<HashSet<SeenKey>>,
}

impl InboxWatcher {
    pub fn new(postbox: Postbox, router: Router, alerts: AlertEvaluator) -> Self {
        InboxWatcher {
            postbox,
            router,
            alerts,
            config: WatcherConfig::default(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the poll loop until `cancel` fires. Each iteration drains every
    /// unseen envelope currently in the orchestrator's inbox before
    /// sleeping for `poll_interval`; cancellation is observed between
    /// iterations, never mid-batch.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("inbox watcher starting");
        loop {
            let processed = self.poll_once().await?;
            if processed > 0 {
                info!(processed, "inbox watcher processed envelopes");
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("inbox watcher stopping after current batch");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Process every envelope currently sitting in the orchestrator's own
    /// inbox that hasn't been seen before. Returns the count handled.
    pub async fn poll_once(&self) -> Result<usize> {
        let inbox = self
            .postbox
            .read_inbox(crate::envelope::ORCHESTRATOR_ID)?;
        let mut count = 0;

        for envelope in inbox {
            let key = (
                envelope.trace_id.clone().unwrap_or_default(),
                envelope.task_id.clone(),
            );
            {
                let mut seen = self.seen.lock().expect("seen-set mutex poisoned");
                if !seen.insert(key) {
                    continue;
                }
            }
            count += 1;

            match self.router.route(&envelope) {
                Ok(decision) => info!(?decision, task_id = %envelope.task_id, "routed envelope"),
                Err(e) => warn!(error = %e, task_id = %envelope.task_id, "routing failed"),
            }

            if let Err(e) = self.alerts.evaluate(&envelope).await {
                warn!(error = %e, task_id = %envelope.task_id, "alert evaluation failed");
            }
        }

        Ok(count)
    }
}
