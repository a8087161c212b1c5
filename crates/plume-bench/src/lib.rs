//! # plume-bench
//!
//! Benchmark suite and numeric self-checks for the Plume kernels.
//!
//! Provides 3 procedural scenarios run through the rollout dispatcher,
//! metric collection with CSV export, and finite-difference checks of the
//! render and advection adjoints.

pub mod gradcheck;
pub mod metrics;
pub mod runner;
pub mod scenarios;

pub use gradcheck::{GradCheck, GradCheckReport};
pub use metrics::BenchmarkMetrics;
pub use runner::BenchmarkRunner;
pub use scenarios::{Scenario, ScenarioKind};
