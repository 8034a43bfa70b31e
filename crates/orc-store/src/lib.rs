//! Synchronous, filesystem-backed persistence for the orchestration
//! runtime: postboxes, task logs, execution traces, evaluation ledgers,
//! and policy documents.
//!
//! Every mutation is a read-modify-write-atomic-replace over a JSON file;
//! nothing here talks to a database or blocks on network I/O, so the crate
//! has no async runtime dependency. Components that need to poll or sleep
//! (the plan runner, the inbox watcher) live in `orc-core` and build on
//! these primitives.

pub mod atomic;
pub mod ledger;
pub mod models;
pub mod policy;
pub mod postbox;
pub mod task_log;
pub mod execution_trace;

pub use models::*;
pub use postbox::Postbox;
