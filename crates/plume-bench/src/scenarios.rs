//! Benchmark scenarios: initial density, per-step velocities, cameras and
//! engine config for each case.
//!
//! Three canonical scenarios for regression testing:
//! 1. **Uniform cube**: density 1 on a 4³ grid seen by an orthographic
//!    camera; every pixel has alpha `1 - exp(-σ·4)`
//! 2. **Voxel shift**: one nonzero voxel advected one cell along +x
//! 3. **Smoke rollout**: a rising, swirling blob rendered from an orbit

use glam::Vec3;
use serde::{Deserialize, Serialize};

use plume_core::EngineConfig;
use plume_grid::{FieldKind, GridShape, VelocityLayout};
use plume_render::{Camera, RenderConfig};
use plume_types::PlumeResult;

/// Which benchmark scenario to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Uniform density seen through an orthographic camera.
    UniformCube,
    /// Single voxel carried by a uniform velocity.
    VoxelShift,
    /// Multi-step rollout of a smoke blob.
    SmokeRollout,
}

impl ScenarioKind {
    pub fn all() -> &'static [ScenarioKind] {
        &[
            ScenarioKind::UniformCube,
            ScenarioKind::VoxelShift,
            ScenarioKind::SmokeRollout,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::UniformCube => "uniform_cube",
            ScenarioKind::VoxelShift => "voxel_shift",
            ScenarioKind::SmokeRollout => "smoke_rollout",
        }
    }

    /// Parses a name produced by [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.name() == name)
    }
}

/// A fully specified benchmark scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub kind: ScenarioKind,
    /// Grid, time step and kernel parameters.
    pub config: EngineConfig,
    /// Velocity layout of every entry in `velocities`.
    pub layout: VelocityLayout,
    /// Density at frame 0, host layout.
    pub density: Vec<f32>,
    /// One velocity per advection step, host layout.
    pub velocities: Vec<Vec<f32>>,
    /// One camera per frame `0..=N`, or per frame `1..=N`.
    pub cameras: Vec<Camera>,
}

impl Scenario {
    /// Uniform density 1 on a 4×4×4 grid with unit voxels, no advection.
    ///
    /// The orthographic camera looks along +z and its 8×8 pixel rays all
    /// cross the full depth of the grid.
    pub fn uniform_cube() -> PlumeResult<Self> {
        let grid = GridShape::cubic(4, 1.0)?;
        let config = EngineConfig {
            dt: 1.0,
            render: RenderConfig {
                absorption: 0.5,
                ..RenderConfig::default()
            },
            ..EngineConfig::default()
        }
        .with_grid(grid);
        let camera = Camera::orthographic(
            Vec3::new(2.0, 2.0, -2.0),
            Vec3::new(2.0, 2.0, 2.0),
            [4.0, 4.0],
            [8, 8],
        );
        Ok(Self {
            kind: ScenarioKind::UniformCube,
            config,
            layout: VelocityLayout::Centered,
            density: vec![1.0; grid.cell_count()],
            velocities: Vec::new(),
            cameras: vec![camera],
        })
    }

    /// Density 1 at voxel (1,1,1) of a 4³ unit grid, velocity (1,0,0),
    /// `dt = 1`, one step.
    pub fn voxel_shift() -> PlumeResult<Self> {
        let grid = GridShape::cubic(4, 1.0)?;
        let config = EngineConfig {
            dt: 1.0,
            ..EngineConfig::default()
        }
        .with_grid(grid);
        let mut density = vec![0.0; grid.cell_count()];
        density[grid.index(1, 1, 1)] = 1.0;
        let layout = VelocityLayout::Centered;
        let n = grid.cell_count();
        let mut velocity = vec![0.0; FieldKind::Velocity(layout).element_count(&grid)];
        velocity[..n].fill(1.0);
        let camera = Camera::orthographic(
            Vec3::new(2.0, 2.0, -2.0),
            Vec3::new(2.0, 2.0, 2.0),
            [4.0, 4.0],
            [8, 8],
        );
        Ok(Self {
            kind: ScenarioKind::VoxelShift,
            config,
            layout,
            density,
            velocities: vec![velocity],
            cameras: vec![camera],
        })
    }

    /// A Gaussian blob near the floor of a 24³ unit box, carried upward by
    /// a swirling velocity for 6 steps and rendered from 7 orbiting cameras.
    pub fn smoke_rollout() -> PlumeResult<Self> {
        let n = 24;
        let steps = 6;
        let grid = GridShape::cubic(n, 1.0 / n as f32)?;
        let config = EngineConfig {
            dt: 0.05,
            render: RenderConfig {
                absorption: 8.0,
                light_color: [1.0, 0.95, 0.9],
                background: [0.05, 0.05, 0.08],
                ..RenderConfig::default()
            },
            ..EngineConfig::default()
        }
        .with_grid(grid);

        let center = Vec3::new(0.5, 0.3, 0.5);
        let radius = 0.15_f32;
        let density: Vec<f32> = (0..grid.cell_count())
            .map(|idx| {
                let [i, j, k] = grid.coords(idx);
                let d2 = grid.cell_center(i, j, k).distance_squared(center);
                (-d2 / (2.0 * radius * radius)).exp()
            })
            .collect();

        let layout = VelocityLayout::Centered;
        let cells = grid.cell_count();
        let velocities = (0..steps)
            .map(|t| {
                let swirl = 1.0 + 0.1 * t as f32;
                let mut v = vec![0.0; 3 * cells];
                for idx in 0..cells {
                    let [i, j, k] = grid.coords(idx);
                    let p = grid.cell_center(i, j, k) - Vec3::splat(0.5);
                    v[idx] = -p.z * swirl;
                    v[cells + idx] = 0.5;
                    v[2 * cells + idx] = p.x * swirl;
                }
                v
            })
            .collect();

        let cameras = (0..=steps)
            .map(|t| {
                let angle = t as f32 * 0.3;
                let eye = Vec3::new(0.5 + 1.8 * angle.sin(), 0.8, 0.5 - 1.8 * angle.cos());
                Camera::perspective(eye, Vec3::splat(0.5), 1.0, [0.8, 0.8], [24, 24])
            })
            .collect();

        Ok(Self {
            kind: ScenarioKind::SmokeRollout,
            config,
            layout,
            density,
            velocities,
            cameras,
        })
    }

    pub fn from_kind(kind: ScenarioKind) -> PlumeResult<Self> {
        match kind {
            ScenarioKind::UniformCube => Self::uniform_cube(),
            ScenarioKind::VoxelShift => Self::voxel_shift(),
            ScenarioKind::SmokeRollout => Self::smoke_rollout(),
        }
    }

    /// Number of advection steps.
    pub fn steps(&self) -> usize {
        self.velocities.len()
    }

    /// Scenario-specific correctness measure, zero for an exact result.
    ///
    /// - uniform cube: largest alpha deviation from `1 - exp(-σ·depth)`
    /// - voxel shift: error of the target voxel plus what is left behind
    /// - smoke rollout: relative change of total mass
    pub fn check_error(&self, final_density: &[f32], last_alpha: &[f32]) -> f64 {
        let grid = &self.config.grid;
        match self.kind {
            ScenarioKind::UniformCube => {
                let depth = grid.nz as f64 * grid.voxel_size as f64;
                let sigma = self.config.render.absorption as f64;
                let expected = 1.0 - (-sigma * depth).exp();
                last_alpha
                    .iter()
                    .map(|&a| (a as f64 - expected).abs())
                    .fold(0.0, f64::max)
            }
            ScenarioKind::VoxelShift => {
                let moved = final_density[grid.index(2, 1, 1)] as f64;
                let left = final_density[grid.index(1, 1, 1)] as f64;
                (moved - 1.0).abs() + left.abs()
            }
            ScenarioKind::SmokeRollout => {
                let before: f64 = self.density.iter().map(|&d| d as f64).sum();
                let after: f64 = final_density.iter().map(|&d| d as f64).sum();
                if before > 0.0 {
                    (after - before).abs() / before
                } else {
                    after.abs()
                }
            }
        }
    }
}
