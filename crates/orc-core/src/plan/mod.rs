//! Plan loading and DAG construction (C3): parse a plan document, validate
//! its structure, and build the dependency graph the runner drives.

pub mod dag;
pub mod loader;

pub use dag::{build_dag, Dag, DagError};
pub use loader::{load_and_validate, validate_integrity, IntegrityReport, PlanLoadError};
