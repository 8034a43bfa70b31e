//! Postbox I/O: per-agent `inbox.json` / `outbox.json` files under a root
//! directory, plus the `HUMAN` escalation inbox.
//!
//! The orchestrator is the sole writer of any agent's inbox and of its own
//! outbox; it only reads other agents' outboxes. All mutations go through
//! [`crate::atomic::modify_json_array`], which serializes same-process
//! writers and swaps the new file in with a rename.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::atomic::{append_json_array, read_json_array};
use crate::models::Envelope;

pub const HUMAN_AGENT: &str = "HUMAN";

/// A postbox root: `<root>/<AGENT>/{inbox,outbox}.json`.
#[derive(Debug, Clone)]
pub struct Postbox {
    root: PathBuf,
}

impl Postbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Postbox { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn inbox_path(&self, agent: &str) -> PathBuf {
        self.root.join(agent).join("inbox.json")
    }

    fn outbox_path(&self, agent: &str) -> PathBuf {
        self.root.join(agent).join("outbox.json")
    }

    /// Append an envelope to `agent`'s inbox, preserving append order.
    pub fn append_to_inbox(&self, agent: &str, envelope: Envelope) -> Result<()> {
        append_json_array(&self.inbox_path(agent), envelope)
    }

    /// Append an envelope to `agent`'s outbox (used by the orchestrator to
    /// record its own replies, and by test fixtures simulating agents).
    pub fn append_to_outbox(&self, agent: &str, envelope: Envelope) -> Result<()> {
        append_json_array(&self.outbox_path(agent), envelope)
    }

    pub fn read_inbox(&self, agent: &str) -> Result<Vec<Envelope>> {
        read_json_array(&self.inbox_path(agent))
    }

    pub fn read_outbox(&self, agent: &str) -> Result<Vec<Envelope>> {
        read_json_array(&self.outbox_path(agent))
    }

    /// Replace `agent`'s inbox wholesale. Used by the orchestrator after
    /// consuming envelopes it owns (e.g. clearing processed entries).
    pub fn replace_inbox(&self, agent: &str, envelopes: Vec<Envelope>) -> Result<()> {
        crate::atomic::write_json_atomic(&self.inbox_path(agent), &envelopes)
    }

    pub fn clear_inbox(&self, agent: &str) -> Result<()> {
        self.replace_inbox(agent, Vec::new())
    }

    /// Append an envelope to the HUMAN inbox, carrying an optional
    /// escalation block.
    pub fn append_to_human_inbox(&self, envelope: Envelope) -> Result<()> {
        self.append_to_inbox(HUMAN_AGENT, envelope)
    }

    /// Look for a reply in `agent`'s outbox matching `trace_id`, without
    /// blocking. Used as the single poll step that an async caller wraps
    /// in a timeout loop.
    pub fn find_reply(&self, agent: &str, trace_id: &str) -> Result<Option<Envelope>> {
        let outbox = self.read_outbox(agent)?;
        Ok(outbox
            .into_iter()
            .find(|e| e.trace_id.as_deref() == Some(trace_id)))
    }
}
