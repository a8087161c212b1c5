//! Benchmark metrics collected during a scenario run.

use serde::{Deserialize, Serialize};

/// Metrics collected from a benchmark scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    /// Scenario name.
    pub scenario: String,
    /// Cells per field.
    pub cells: usize,
    /// Advection steps.
    pub steps: usize,
    /// Pixels rendered over all frames.
    pub pixels: usize,
    /// Wall-clock time of the forward rollout (seconds).
    pub forward_time: f64,
    /// Wall-clock time of the reverse pass (seconds).
    pub backward_time: f64,
    /// Time spent inside forward kernels, from telemetry.
    pub forward_kernel_time: f64,
    /// Time spent inside adjoint kernels, from telemetry.
    pub backward_kernel_time: f64,
    /// Peak device memory (bytes).
    pub peak_memory_bytes: usize,
    /// Total density of the last frame.
    pub final_mass: f64,
    /// L2 norm of the gradient reaching the initial density.
    pub density_grad_norm: f64,
    /// Scenario correctness measure; see `Scenario::check_error`.
    pub check_error: f64,
}

impl BenchmarkMetrics {
    pub fn to_csv_header() -> String {
        "scenario,cells,steps,pixels,forward_ms,backward_ms,forward_kernel_ms,backward_kernel_ms,peak_memory_bytes,final_mass,density_grad_norm,check_error".to_string()
    }

    /// Format this metrics instance as a CSV data row.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{:.4},{:.4},{:.4},{:.4},{},{:.6},{:.6e},{:.3e}",
            self.scenario,
            self.cells,
            self.steps,
            self.pixels,
            self.forward_time * 1000.0,
            self.backward_time * 1000.0,
            self.forward_kernel_time * 1000.0,
            self.backward_kernel_time * 1000.0,
            self.peak_memory_bytes,
            self.final_mass,
            self.density_grad_norm,
            self.check_error,
        )
    }

    /// Header plus one row per entry.
    pub fn to_csv(metrics: &[BenchmarkMetrics]) -> String {
        let mut csv = Self::to_csv_header();
        for m in metrics {
            csv.push('\n');
            csv.push_str(&m.to_csv_row());
        }
        csv
    }
}
