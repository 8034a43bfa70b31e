//! `trace_id` generation: `<plan_id>-<task_index>-<random 4-byte suffix>`,
//! unique enough to disambiguate retries and re-runs of the same task
//! without needing a shared counter across processes.

use rand::Rng;

/// Generate a trace id for the `index`-th dispatch of `task_id` within
/// `plan_id`. `rand` gives us the random bytes; there is no `hex` crate in
/// this workspace, so the suffix is formatted by hand.
pub fn generate(plan_id: &str, task_id: &str, index: u32) -> String {
    let mut bytes = [0u8; 4];
    rand::rng().fill(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{plan_id}-{task_id}-{index}-{suffix}")
}
