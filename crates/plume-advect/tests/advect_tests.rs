//! Integration tests for plume-advect.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use plume_advect::{AdvectionConfig, IntegrationOrder, SemiLagrangian};
use plume_gpu::CpuDevice;
use plume_grid::{
    BoundaryPolicy, DensityField, FieldKind, GradientBuffer, GridShape, VelocityField,
    VelocityLayout,
};
use plume_types::PlumeError;

// ─── Helpers ──────────────────────────────────────────────────

fn random_vec(rng: &mut StdRng, len: usize, lo: f32, hi: f32) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(lo..hi)).collect()
}

fn weighted_sum(values: &[f32], weights: &[f32]) -> f64 {
    values
        .iter()
        .zip(weights)
        .map(|(&v, &w)| v as f64 * w as f64)
        .sum()
}

struct Problem {
    shape: GridShape,
    layout: VelocityLayout,
    density: Vec<f32>,
    velocity: Vec<f32>,
    weights: Vec<f32>,
    dt: f32,
}

impl Problem {
    fn random(seed: u64, layout: VelocityLayout) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let shape = GridShape::cubic(6, 1.0).unwrap();
        let n = shape.cell_count();
        let vel_len = FieldKind::Velocity(layout).element_count(&shape);
        Self {
            shape,
            layout,
            density: random_vec(&mut rng, n, 0.5, 1.5),
            velocity: random_vec(&mut rng, vel_len, -1.5, 1.5),
            weights: random_vec(&mut rng, n, -1.0, 1.0),
            dt: 0.8,
        }
    }

    fn loss(&self, solver: &SemiLagrangian, density: &[f32], velocity: &[f32]) -> f64 {
        let device = CpuDevice::new();
        let d = DensityField::from_host(&device, self.shape, density).unwrap();
        let v = VelocityField::from_host(&device, self.shape, self.layout, velocity).unwrap();
        let out = solver.advect(&device, &d, &v, self.dt).unwrap();
        weighted_sum(out.as_slice(), &self.weights)
    }

    fn analytic(&self, solver: &SemiLagrangian) -> (Vec<f32>, Vec<f32>) {
        let device = CpuDevice::new();
        let d = DensityField::from_host(&device, self.shape, &self.density).unwrap();
        let v = VelocityField::from_host(&device, self.shape, self.layout, &self.velocity).unwrap();
        let g = GradientBuffer::from_host(&device, self.shape, FieldKind::Density, &self.weights)
            .unwrap();
        let grads = solver.advect_backward(&device, &d, &v, self.dt, &g).unwrap();
        (grads.density.to_host(), grads.velocity.to_host())
    }
}

/// Central, forward and backward differences.
fn differences(eps: f32, f: impl Fn(f32) -> f64) -> [f64; 3] {
    let base = f(0.0);
    let plus = f(eps);
    let minus = f(-eps);
    let e = eps as f64;
    [(plus - minus) / (2.0 * e), (plus - base) / e, (base - minus) / e]
}

/// The analytic value must match one of the difference quotients. One-sided
/// quotients cover perturbations that straddle a cell boundary, where the
/// interpolant is only piecewise smooth.
fn assert_close(label: &str, analytic: f32, fd: [f64; 3], rel: f64, abs: f64) {
    let a = analytic as f64;
    let ok = fd
        .iter()
        .any(|&f| (a - f).abs() <= abs + rel * f.abs().max(a.abs()));
    assert!(ok, "{label}: analytic {a:.6e}, finite differences {fd:?}");
}

fn check_gradients(seed: u64, layout: VelocityLayout, config: AdvectionConfig) {
    let problem = Problem::random(seed, layout);
    let solver = SemiLagrangian::new(config);
    let (d_density, d_velocity) = problem.analytic(&solver);

    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);

    for _ in 0..24 {
        let n = rng.gen_range(0..problem.density.len());
        let fd = differences(0.25, |e| {
            let mut d = problem.density.clone();
            d[n] += e;
            problem.loss(&solver, &d, &problem.velocity)
        });
        assert_close(&format!("density[{n}]"), d_density[n], fd, 1e-3, 1e-4);
    }

    for _ in 0..32 {
        let n = rng.gen_range(0..problem.velocity.len());
        let fd = differences(0.01, |e| {
            let mut v = problem.velocity.clone();
            v[n] += e;
            problem.loss(&solver, &problem.density, &v)
        });
        assert_close(&format!("velocity[{n}]"), d_velocity[n], fd, 1e-2, 2e-3);
    }
}

// ─── Forward Tests ───────────────────────────────────────────

#[test]
fn zero_velocity_is_identity() {
    let device = CpuDevice::new();
    let mut rng = StdRng::seed_from_u64(7);
    let shape = GridShape::new(5, 4, 3, 0.1).unwrap();
    let host = random_vec(&mut rng, shape.cell_count(), 0.0, 2.0);
    let density = DensityField::from_host(&device, shape, &host).unwrap();

    for layout in [VelocityLayout::Centered, VelocityLayout::Staggered] {
        let velocity = VelocityField::zeros(&device, shape, layout).unwrap();
        for policy in [BoundaryPolicy::Clamp, BoundaryPolicy::Periodic, BoundaryPolicy::Zero] {
            for order in [IntegrationOrder::Euler, IntegrationOrder::Midpoint] {
                let solver = SemiLagrangian::new(AdvectionConfig {
                    order,
                    boundary: policy,
                    velocity_boundary: policy,
                });
                for dt in [0.1, 1.0, 7.5] {
                    let out = solver.advect(&device, &density, &velocity, dt).unwrap();
                    for (a, b) in out.as_slice().iter().zip(&host) {
                        assert!((a - b).abs() < 1e-6, "{policy:?} {order:?} dt={dt}");
                    }
                }
            }
        }
    }
}

#[test]
fn single_voxel_shifts_one_cell() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(4, 1.0).unwrap();
    let mut host = vec![0.0; shape.cell_count()];
    host[shape.index(1, 1, 1)] = 1.0;
    let density = DensityField::from_host(&device, shape, &host).unwrap();
    let velocity =
        VelocityField::uniform(&device, shape, VelocityLayout::Centered, Vec3::X).unwrap();

    let out = SemiLagrangian::default()
        .advect(&device, &density, &velocity, 1.0)
        .unwrap();

    assert!((out.at(2, 1, 1) - 1.0).abs() < 1e-6);
    // Vacated voxel samples cell (0, 1, 1), which is empty.
    assert_eq!(out.at(1, 1, 1), 0.0);
    let total: f32 = out.as_slice().iter().sum();
    assert!((total - 1.0).abs() < 1e-6);
}

#[test]
fn clamp_boundary_repeats_edge_value() {
    let device = CpuDevice::new();
    let shape = GridShape::new(4, 1, 1, 1.0).unwrap();
    let density = DensityField::from_host(&device, shape, &[3.0, 1.0, 1.0, 1.0]).unwrap();
    let velocity =
        VelocityField::uniform(&device, shape, VelocityLayout::Centered, Vec3::X).unwrap();
    let out = SemiLagrangian::default()
        .advect(&device, &density, &velocity, 1.0)
        .unwrap();
    // Cell 0 traces to x = -0.5 and reads the clamped edge.
    assert_eq!(out.as_slice(), &[3.0, 3.0, 1.0, 1.0]);
}

#[test]
fn periodic_boundary_wraps_around() {
    let device = CpuDevice::new();
    let shape = GridShape::new(4, 1, 1, 1.0).unwrap();
    let density = DensityField::from_host(&device, shape, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let velocity =
        VelocityField::uniform(&device, shape, VelocityLayout::Centered, Vec3::X).unwrap();
    let out = SemiLagrangian::new(AdvectionConfig::periodic())
        .advect(&device, &density, &velocity, 1.0)
        .unwrap();
    assert_eq!(out.as_slice(), &[4.0, 1.0, 2.0, 3.0]);
}

#[test]
fn zero_boundary_brings_in_nothing() {
    let device = CpuDevice::new();
    let shape = GridShape::new(4, 1, 1, 1.0).unwrap();
    let density = DensityField::from_host(&device, shape, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let velocity =
        VelocityField::uniform(&device, shape, VelocityLayout::Centered, Vec3::X).unwrap();
    let config = AdvectionConfig {
        boundary: BoundaryPolicy::Zero,
        ..Default::default()
    };
    let out = SemiLagrangian::new(config)
        .advect(&device, &density, &velocity, 1.0)
        .unwrap();
    assert_eq!(out.as_slice(), &[0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn midpoint_matches_euler_for_uniform_flow() {
    let device = CpuDevice::new();
    let mut rng = StdRng::seed_from_u64(11);
    let shape = GridShape::cubic(5, 0.5).unwrap();
    let host = random_vec(&mut rng, shape.cell_count(), 0.0, 1.0);
    let density = DensityField::from_host(&device, shape, &host).unwrap();
    let velocity = VelocityField::uniform(
        &device,
        shape,
        VelocityLayout::Staggered,
        Vec3::new(0.3, -0.2, 0.45),
    )
    .unwrap();

    let euler = SemiLagrangian::default()
        .advect(&device, &density, &velocity, 0.7)
        .unwrap();
    let midpoint = SemiLagrangian::new(AdvectionConfig::high_quality())
        .advect(&device, &density, &velocity, 0.7)
        .unwrap();
    for (a, b) in euler.as_slice().iter().zip(midpoint.as_slice()) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn advected_density_stays_non_negative() {
    let problem = Problem::random(3, VelocityLayout::Centered);
    let device = CpuDevice::new();
    let d = DensityField::from_host(&device, problem.shape, &problem.density).unwrap();
    let v = VelocityField::from_host(&device, problem.shape, problem.layout, &problem.velocity)
        .unwrap();
    for config in [AdvectionConfig::default(), AdvectionConfig::high_quality()] {
        let out = SemiLagrangian::new(config).advect(&device, &d, &v, 2.0).unwrap();
        assert!(out.as_slice().iter().all(|&x| x >= 0.0));
    }
}

#[test]
fn mismatched_grids_are_rejected() {
    let device = CpuDevice::new();
    let density = DensityField::zeros(&device, GridShape::cubic(4, 1.0).unwrap()).unwrap();
    let velocity = VelocityField::zeros(
        &device,
        GridShape::cubic(5, 1.0).unwrap(),
        VelocityLayout::Centered,
    )
    .unwrap();
    let err = SemiLagrangian::default()
        .advect(&device, &density, &velocity, 1.0)
        .unwrap_err();
    assert!(matches!(err, PlumeError::ShapeMismatch(_)));
}

#[test]
fn non_finite_dt_is_rejected() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(2, 1.0).unwrap();
    let density = DensityField::zeros(&device, shape).unwrap();
    let velocity = VelocityField::zeros(&device, shape, VelocityLayout::Centered).unwrap();
    assert!(SemiLagrangian::default()
        .advect(&device, &density, &velocity, f32::NAN)
        .is_err());
}

// ─── Adjoint Tests ───────────────────────────────────────────

#[test]
fn zero_velocity_adjoint_is_identity() {
    let device = CpuDevice::new();
    let mut rng = StdRng::seed_from_u64(5);
    let shape = GridShape::cubic(4, 1.0).unwrap();
    let density = DensityField::from_host(
        &device,
        shape,
        &random_vec(&mut rng, shape.cell_count(), 0.0, 1.0),
    )
    .unwrap();
    let velocity = VelocityField::zeros(&device, shape, VelocityLayout::Centered).unwrap();
    let seed = random_vec(&mut rng, shape.cell_count(), -1.0, 1.0);
    let g = GradientBuffer::from_host(&device, shape, FieldKind::Density, &seed).unwrap();

    let grads = SemiLagrangian::default()
        .advect_backward(&device, &density, &velocity, 1.0, &g)
        .unwrap();
    assert_eq!(grads.density.to_host(), seed);
    assert_eq!(grads.velocity.len(), 3 * shape.cell_count());
}

#[test]
fn clamp_adjoint_conserves_gradient_sum() {
    let problem = Problem::random(21, VelocityLayout::Staggered);
    let (d_density, _) = problem.analytic(&SemiLagrangian::default());
    let total: f64 = d_density.iter().map(|&v| v as f64).sum();
    let seeded: f64 = problem.weights.iter().map(|&v| v as f64).sum();
    assert!((total - seeded).abs() < 1e-4);
}

#[test]
fn adjoint_rejects_velocity_shaped_seed() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(2, 1.0).unwrap();
    let density = DensityField::zeros(&device, shape).unwrap();
    let velocity = VelocityField::zeros(&device, shape, VelocityLayout::Centered).unwrap();
    let seed =
        GradientBuffer::zeros(&device, shape, FieldKind::Velocity(VelocityLayout::Centered))
            .unwrap();
    assert!(matches!(
        SemiLagrangian::default().advect_backward(&device, &density, &velocity, 1.0, &seed),
        Err(PlumeError::ShapeMismatch(_))
    ));
}

#[test]
fn gradient_check_euler_centered_clamp() {
    check_gradients(101, VelocityLayout::Centered, AdvectionConfig::default());
}

#[test]
fn gradient_check_euler_staggered_clamp() {
    check_gradients(102, VelocityLayout::Staggered, AdvectionConfig::default());
}

#[test]
fn gradient_check_midpoint_centered_clamp() {
    check_gradients(103, VelocityLayout::Centered, AdvectionConfig::high_quality());
}

#[test]
fn gradient_check_midpoint_staggered_periodic() {
    let config = AdvectionConfig {
        order: IntegrationOrder::Midpoint,
        ..AdvectionConfig::periodic()
    };
    check_gradients(104, VelocityLayout::Staggered, config);
}

#[test]
fn gradient_check_euler_zero_boundary() {
    let config = AdvectionConfig {
        boundary: BoundaryPolicy::Zero,
        ..Default::default()
    };
    check_gradients(105, VelocityLayout::Centered, config);
}

// ─── Config Tests ────────────────────────────────────────────

#[test]
fn config_serialization() {
    let config = AdvectionConfig::high_quality();
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("midpoint"));
    let back: AdvectionConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn config_defaults_fill_missing_fields() {
    let config: AdvectionConfig = serde_json::from_str(r#"{"boundary":"periodic"}"#).unwrap();
    assert_eq!(config.order, IntegrationOrder::Euler);
    assert_eq!(config.boundary, BoundaryPolicy::Periodic);
    assert_eq!(config.velocity_boundary, BoundaryPolicy::Clamp);
}
