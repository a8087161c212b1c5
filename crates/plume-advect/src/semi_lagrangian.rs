//! Semi-Lagrangian advection kernel and adjoint.
//!
//! Every destination cell center is traced backward through the velocity
//! field and the source density is sampled there. All positions inside the
//! kernels are in cell units, so a velocity `u` moves a sample by
//! `u · dt / voxel_size` cells.
//!
//! # Adjoint
//!
//! For a destination value `ρ̃(p)` with loss gradient `g`:
//!
//! ```text
//! ∂L/∂ρ[i]  += g · w_i(p)                  (same stencil as forward)
//! ∂L/∂p      = g · ∇ρ̃(p)                   (weight derivatives)
//! Euler:     p = x - s·u(x)          ∂L/∂u(x) = -s · ∂L/∂p
//! Midpoint:  p = x - s·u(m)          ∂L/∂u(m) = -s · ∂L/∂p
//!            m = x - ½s·u(x)         ∂L/∂m    = J_u(m)ᵀ ∂L/∂u(m)
//!                                    ∂L/∂u(x) = -½s · ∂L/∂m
//! ```
//!
//! Velocity-sample gradients are scattered to the velocity lattice through
//! the sampling stencils. Scatter targets are shared between destination
//! cells, so accumulation is atomic.

use std::time::Instant;

use glam::Vec3;
use rayon::prelude::*;
use tracing::debug;

use plume_gpu::DeviceBackend;
use plume_grid::{
    DensityField, FieldGradients, FieldKind, GradientAccumulator, GradientBuffer, Stencil,
    VelocityField,
};
use plume_types::{PlumeError, PlumeResult};

use crate::config::{AdvectionConfig, IntegrationOrder};

/// Back-trace of one destination cell, kept for the adjoint.
struct Trace {
    /// Velocity stencils at the destination center.
    at_x: [Stencil; 3],
    /// Velocity stencils at the midpoint (midpoint scheme only).
    at_m: Option<[Stencil; 3]>,
    /// Source position.
    p: Vec3,
}

/// Differentiable semi-Lagrangian advection.
#[derive(Debug, Clone, Default)]
pub struct SemiLagrangian {
    config: AdvectionConfig,
}

impl SemiLagrangian {
    pub fn new(config: AdvectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdvectionConfig {
        &self.config
    }

    /// Transports `density` through `velocity` over one step of `dt`.
    pub fn advect(
        &self,
        device: &dyn DeviceBackend,
        density: &DensityField,
        velocity: &VelocityField,
        dt: f32,
    ) -> PlumeResult<DensityField> {
        self.check_inputs(density, velocity, dt)?;
        let start = Instant::now();
        let shape = *density.shape();
        let lattice = density.lattice();
        let src = density.as_slice();

        let mut out = device.allocate(shape.cell_count())?;
        out.as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(n, value)| {
                let [i, j, k] = shape.coords(n);
                let trace = self.trace(velocity, lattice.position(i, j, k), dt);
                *value = density.stencil(trace.p, self.config.boundary).sample(src);
            });

        debug!(
            cells = shape.cell_count(),
            order = self.config.order.name(),
            boundary = self.config.boundary.name(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "advect forward"
        );
        DensityField::from_buffer(shape, out)
    }

    /// Distributes the gradient of the advected density onto the source
    /// density and the velocity.
    ///
    /// `density`, `velocity` and `dt` must be the forward inputs.
    pub fn advect_backward(
        &self,
        device: &dyn DeviceBackend,
        density: &DensityField,
        velocity: &VelocityField,
        dt: f32,
        grad_out: &GradientBuffer,
    ) -> PlumeResult<FieldGradients> {
        self.check_inputs(density, velocity, dt)?;
        if grad_out.kind() != FieldKind::Density {
            return Err(PlumeError::ShapeMismatch(format!(
                "advection output gradient must be a density gradient, got {}",
                grad_out.kind().name()
            )));
        }
        density
            .shape()
            .ensure_matches(grad_out.shape(), "advection output gradient")?;

        let start = Instant::now();
        let shape = *density.shape();
        let lattice = density.lattice();
        let src = density.as_slice();
        let s = dt / shape.voxel_size;
        let vel_kind = FieldKind::Velocity(velocity.layout());

        let d_density = GradientAccumulator::new(device, shape, FieldKind::Density)?;
        let d_velocity = GradientAccumulator::new(device, shape, vel_kind)?;
        let g_out = grad_out.part(0);
        let comps = [0, 1, 2].map(|a| velocity.component(a).as_slice());

        (0..shape.cell_count()).into_par_iter().for_each(|n| {
            let g = g_out[n];
            if g == 0.0 {
                return;
            }
            let [i, j, k] = shape.coords(n);
            let trace = self.trace(velocity, lattice.position(i, j, k), dt);

            let source = density.stencil(trace.p, self.config.boundary);
            source.scatter(d_density.part(0), g);

            let d_p = source.gradient(src) * g;
            if d_p == Vec3::ZERO {
                return;
            }

            match trace.at_m {
                None => {
                    let d_u = -s * d_p;
                    for axis in 0..3 {
                        trace.at_x[axis].scatter(d_velocity.part(axis), d_u[axis]);
                    }
                }
                Some(at_m) => {
                    let d_um = -s * d_p;
                    let mut d_m = Vec3::ZERO;
                    for axis in 0..3 {
                        at_m[axis].scatter(d_velocity.part(axis), d_um[axis]);
                        d_m += at_m[axis].gradient(comps[axis]) * d_um[axis];
                    }
                    let d_ux = -0.5 * s * d_m;
                    for axis in 0..3 {
                        trace.at_x[axis].scatter(d_velocity.part(axis), d_ux[axis]);
                    }
                }
            }
        });

        debug!(
            cells = shape.cell_count(),
            order = self.config.order.name(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "advect backward"
        );
        Ok(FieldGradients {
            density: d_density.finish(),
            velocity: d_velocity.finish(),
        })
    }

    fn trace(&self, velocity: &VelocityField, x: Vec3, dt: f32) -> Trace {
        let s = dt / velocity.shape().voxel_size;
        let policy = self.config.velocity_boundary;
        let at_x = velocity.stencils(x, policy);
        let u_x = sample3(&at_x, velocity);
        match self.config.order {
            IntegrationOrder::Euler => Trace {
                at_x,
                at_m: None,
                p: x - s * u_x,
            },
            IntegrationOrder::Midpoint => {
                let m = x - 0.5 * s * u_x;
                let at_m = velocity.stencils(m, policy);
                let u_m = sample3(&at_m, velocity);
                Trace {
                    at_x,
                    at_m: Some(at_m),
                    p: x - s * u_m,
                }
            }
        }
    }

    fn check_inputs(
        &self,
        density: &DensityField,
        velocity: &VelocityField,
        dt: f32,
    ) -> PlumeResult<()> {
        self.config.validate_dt(dt)?;
        density
            .shape()
            .ensure_matches(velocity.shape(), "density and velocity grids")
    }
}

#[inline]
fn sample3(stencils: &[Stencil; 3], velocity: &VelocityField) -> Vec3 {
    Vec3::new(
        stencils[0].sample(velocity.component(0).as_slice()),
        stencils[1].sample(velocity.component(1).as_slice()),
        stencils[2].sample(velocity.component(2).as_slice()),
    )
}
