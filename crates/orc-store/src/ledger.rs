//! Append-only ledgers: per-agent evaluation scores (`logs/agent_scores.json`)
//! and triggered alerts (`logs/alerts_triggered.json`).
//!
//! Both are purely reflective: nothing here feeds back into scheduling.

use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use crate::atomic::{append_json_array, read_json_array};
use crate::models::{AlertLedgerEntry, EvaluationRecord, RollingSummary};

#[derive(Debug, Clone)]
pub struct EvaluationLedger {
    path: PathBuf,
}

impl EvaluationLedger {
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        EvaluationLedger {
            path: logs_root.into().join("agent_scores.json"),
        }
    }

    pub fn append(&self, record: EvaluationRecord) -> Result<()> {
        append_json_array(&self.path, record).inspect_err(|e| {
            warn!(path = %self.path.display(), error = %e, "failed to append evaluation ledger record");
        })
    }

    pub fn all(&self) -> Result<Vec<EvaluationRecord>> {
        read_json_array(&self.path)
    }

    /// Most recent `n` records for `agent_id`, newest first.
    pub fn last_n(&self, agent_id: &str, n: usize) -> Result<Vec<EvaluationRecord>> {
        let mut matching: Vec<EvaluationRecord> = self
            .all()?
            .into_iter()
            .filter(|r| r.agent_id == agent_id)
            .collect();
        matching.reverse();
        matching.truncate(n);
        Ok(matching)
    }

    /// Rolling summary over the most recent `n` records for `agent_id`.
    /// `avg_score` averages whatever records carry a score; `success_rate`
    /// is the fraction of records whose `success` field is `true`.
    pub fn rolling_summary(&self, agent_id: &str, n: usize) -> Result<RollingSummary> {
        let recent = self.last_n(agent_id, n)?;
        let count = recent.len();

        let scores: Vec<f64> = recent.iter().filter_map(|r| r.score).collect();
        let avg_score = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };

        let success_rate = if count == 0 {
            None
        } else {
            let successes = recent.iter().filter(|r| r.success == Some(true)).count();
            Some(successes as f64 / count as f64)
        };

        Ok(RollingSummary {
            agent_id: agent_id.to_string(),
            count,
            avg_score,
            success_rate,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AlertLedger {
    path: PathBuf,
}

impl AlertLedger {
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        AlertLedger {
            path: logs_root.into().join("alerts_triggered.json"),
        }
    }

    pub fn append(&self, entry: AlertLedgerEntry) -> Result<()> {
        append_json_array(&self.path, entry).inspect_err(|e| {
            warn!(path = %self.path.display(), error = %e, "failed to append alert ledger entry");
        })
    }

    pub fn all(&self) -> Result<Vec<AlertLedgerEntry>> {
        read_json_array(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(agent: &str, score: Option<f64>, success: Option<bool>) -> EvaluationRecord {
        EvaluationRecord {
            timestamp: "2026-01-01T00:00:00Z".into(),
            agent_id: agent.into(),
            task_id: "T1".into(),
            plan_id: Some("plan-1".into()),
            success,
            score,
            duration_sec: Some(1.0),
            notes: None,
        }
    }

    #[test]
    fn rolling_summary_averages_scores_and_success_rate() {
        let dir = tempdir().unwrap();
        let ledger = EvaluationLedger::new(dir.path());
        ledger.append(record("AGENT_A", Some(0.8), Some(true))).unwrap();
        ledger.append(record("AGENT_A", Some(0.4), Some(false))).unwrap();
        ledger.append(record("AGENT_B", Some(1.0), Some(true))).unwrap();

        let summary = ledger.rolling_summary("AGENT_A", 10).unwrap();
        assert_eq!(summary.count, 2);
        assert!((summary.avg_score.unwrap() - 0.6).abs() < 1e-9);
        assert!((summary.success_rate.unwrap() - 0.5).abs() < 1e-9);
        assert!(summary.avg_score.unwrap() >= 0.0 && summary.avg_score.unwrap() <= 1.0);
    }

    #[test]
    fn last_n_respects_window_and_newest_first_order() {
        let dir = tempdir().unwrap();
        let ledger = EvaluationLedger::new(dir.path());
        for i in 0..5 {
            ledger
                .append(record("AGENT_A", Some(i as f64 / 10.0), Some(true)))
                .unwrap();
        }
        let last_two = ledger.last_n("AGENT_A", 2).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].score, Some(0.4));
        assert_eq!(last_two[1].score, Some(0.3));
    }

    #[test]
    fn alert_ledger_append_then_read() {
        let dir = tempdir().unwrap();
        let ledger = AlertLedger::new(dir.path());
        ledger
            .append(AlertLedgerEntry {
                timestamp: "2026-01-01T00:00:00Z".into(),
                rule_name: "low_score".into(),
                task_id: Some("T1".into()),
                agent_id: Some("AGENT_A".into()),
                action: serde_json::json!({"notify": "webhook"}),
                context: serde_json::json!({}),
            })
            .unwrap();
        assert_eq!(ledger.all().unwrap().len(), 1);
    }
}
