//! Benchmark runner: drives a scenario through the rollout dispatcher and
//! collects metrics.

use std::time::Instant;

use tracing::info;

use plume_core::{DeviceContext, RolloutDispatcher};
use plume_grid::FieldKind;
use plume_render::ImageGradient;
use plume_telemetry::VecSink;
use plume_types::PlumeResult;

use crate::metrics::BenchmarkMetrics;
use crate::scenarios::{Scenario, ScenarioKind};

/// Runs benchmark scenarios and collects metrics.
pub struct BenchmarkRunner;

impl BenchmarkRunner {
    /// Runs one forward rollout and one reverse pass seeded with unit alpha
    /// gradients on every image.
    pub fn run(scenario: &Scenario) -> PlumeResult<BenchmarkMetrics> {
        let mut ctx = DeviceContext::new(scenario.config.clone())?;
        let sink = VecSink::new();
        ctx.add_sink(Box::new(sink.clone()));

        let frame0 = ctx.create_field(FieldKind::Density, &scenario.density)?;
        let kind = FieldKind::Velocity(scenario.layout);
        let velocities = scenario
            .velocities
            .iter()
            .map(|v| ctx.create_field(kind, v))
            .collect::<PlumeResult<Vec<_>>>()?;
        let dispatcher = RolloutDispatcher::new();

        let start = Instant::now();
        let rollout = dispatcher.forward(&mut ctx, frame0, &velocities, &scenario.cameras)?;
        let forward_time = start.elapsed().as_secs_f64();

        let seeds = scenario
            .cameras
            .iter()
            .map(|c| ImageGradient::from_alpha(c.width(), c.height(), vec![1.0; c.pixel_count()]))
            .collect::<PlumeResult<Vec<_>>>()?;
        let start = Instant::now();
        let gradients = dispatcher.backward(&mut ctx, &rollout, &seeds)?;
        let backward_time = start.elapsed().as_secs_f64();

        let final_density = ctx.read_field(rollout.final_density())?;
        let last_alpha = match rollout.images().last() {
            Some(&image) => ctx.read_image(image)?.alpha_channel(),
            None => Vec::new(),
        };
        let check_error = scenario.check_error(&final_density, &last_alpha);
        let (forward_kernel_time, backward_kernel_time) = sink.kernel_seconds();
        let peak_memory_bytes = ctx.memory().peak;
        rollout.release(&mut ctx)?;

        let metrics = BenchmarkMetrics {
            scenario: scenario.kind.name().to_string(),
            cells: scenario.config.grid.cell_count(),
            steps: scenario.steps(),
            pixels: scenario.cameras.iter().map(|c| c.pixel_count()).sum(),
            forward_time,
            backward_time,
            forward_kernel_time,
            backward_kernel_time,
            peak_memory_bytes,
            final_mass: final_density.iter().map(|&d| d as f64).sum(),
            density_grad_norm: gradients
                .density
                .iter()
                .map(|&g| g as f64 * g as f64)
                .sum::<f64>()
                .sqrt(),
            check_error,
        };
        info!(
            scenario = %metrics.scenario,
            forward_ms = forward_time * 1000.0,
            backward_ms = backward_time * 1000.0,
            check_error,
            "benchmark finished"
        );
        Ok(metrics)
    }

    /// Runs every scenario kind.
    pub fn run_all() -> PlumeResult<Vec<BenchmarkMetrics>> {
        ScenarioKind::all()
            .iter()
            .map(|&kind| Self::run(&Scenario::from_kind(kind)?))
            .collect()
    }
}
