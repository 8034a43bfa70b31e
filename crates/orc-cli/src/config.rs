//! Runtime configuration: the resolution chain CLI flag > env var >
//! default. No config file — there is no secret material here worth
//! persisting to disk, so env vars and flags are the whole story.

use std::path::PathBuf;
use std::time::Duration;

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Fully resolved paths and timing knobs for a single `orc` invocation.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub postbox_root: PathBuf,
    pub logs_root: PathBuf,
    pub plans_dir: PathBuf,
    pub phase_policy_path: PathBuf,
    pub alert_policy_path: PathBuf,
    pub poll_interval: Duration,
    pub default_timeout: Duration,
    pub default_retry_delay: Duration,
}

impl RuntimeConfig {
    /// Resolve configuration: `cli_*` overrides (from global flags) win
    /// over `ORC_*` env vars, which win over the hardcoded defaults
    /// below (all relative to the current working directory).
    pub fn resolve(cli_root: Option<&str>) -> Self {
        let root = cli_root
            .map(PathBuf::from)
            .or_else(|| env_path("ORC_ROOT"))
            .unwrap_or_else(|| PathBuf::from("."));

        let postbox_root = env_path("ORC_POSTBOX_ROOT").unwrap_or_else(|| root.join("postbox"));
        let logs_root = env_path("ORC_LOGS_ROOT").unwrap_or_else(|| root.join("logs"));
        let plans_dir = env_path("ORC_PLANS_DIR").unwrap_or_else(|| root.join("plans"));
        let phase_policy_path =
            env_path("ORC_PHASE_POLICY").unwrap_or_else(|| root.join("phase_policy.yaml"));
        let alert_policy_path =
            env_path("ORC_ALERT_POLICY").unwrap_or_else(|| root.join("alert_policy.yaml"));

        RuntimeConfig {
            postbox_root,
            logs_root,
            plans_dir,
            phase_policy_path,
            alert_policy_path,
            poll_interval: Duration::from_secs(env_secs("ORC_POLL_INTERVAL_SECS").unwrap_or(2)),
            default_timeout: Duration::from_secs(env_secs("ORC_TASK_TIMEOUT_SECS").unwrap_or(60)),
            default_retry_delay: Duration::from_secs(
                env_secs("ORC_RETRY_DELAY_SECS").unwrap_or(5),
            ),
        }
    }
}
