//! Trilinear sampling with boundary policies.
//!
//! A [`Stencil`] holds the eight lattice corners around a sample point,
//! their interpolation weights, and the derivative of each weight with
//! respect to the sample position. Forward kernels use the weights to
//! gather, adjoint kernels reuse the same stencil to scatter, and the
//! weight derivatives give the spatial gradient of the interpolant.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use plume_gpu::AtomicBuffer;

use crate::shape::Lattice;

/// How samples outside the lattice are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Clamp the sample position to the outermost lattice points.
    #[default]
    Clamp,
    /// Wrap around the domain.
    Periodic,
    /// Lattice points outside the domain read as zero.
    Zero,
}

impl BoundaryPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            BoundaryPolicy::Clamp => "clamp",
            BoundaryPolicy::Periodic => "periodic",
            BoundaryPolicy::Zero => "zero",
        }
    }
}

/// Two taps along one axis.
#[derive(Debug, Clone, Copy)]
struct AxisTap {
    idx: [usize; 2],
    w: [f32; 2],
    /// d w / d c
    dw: [f32; 2],
}

impl AxisTap {
    fn new(c: f32, n: usize, period: usize, policy: BoundaryPolicy) -> Self {
        match policy {
            BoundaryPolicy::Clamp => {
                if n < 2 {
                    return Self {
                        idx: [0, 0],
                        w: [1.0, 0.0],
                        dw: [0.0, 0.0],
                    };
                }
                let hi = (n - 1) as f32;
                // Outside the lattice the clamped position does not move.
                let d = if c > 0.0 && c < hi { 1.0 } else { 0.0 };
                let cc = c.clamp(0.0, hi);
                let i0 = (cc.floor() as usize).min(n - 2);
                let f = cc - i0 as f32;
                Self {
                    idx: [i0, i0 + 1],
                    w: [1.0 - f, f],
                    dw: [-d, d],
                }
            }
            BoundaryPolicy::Periodic => {
                let cc = c.rem_euclid(period as f32);
                let i0 = (cc.floor() as usize).min(period - 1);
                let f = cc - i0 as f32;
                Self {
                    idx: [i0, (i0 + 1) % period],
                    w: [1.0 - f, f],
                    dw: [-1.0, 1.0],
                }
            }
            BoundaryPolicy::Zero => {
                let fl = c.floor();
                let f = c - fl;
                let i0 = fl as i64;
                let inside = |i: i64| i >= 0 && i < n as i64;
                let (ok0, ok1) = (inside(i0), inside(i0 + 1));
                Self {
                    idx: [
                        if ok0 { i0 as usize } else { 0 },
                        if ok1 { (i0 + 1) as usize } else { 0 },
                    ],
                    w: [if ok0 { 1.0 - f } else { 0.0 }, if ok1 { f } else { 0.0 }],
                    dw: [if ok0 { -1.0 } else { 0.0 }, if ok1 { 1.0 } else { 0.0 }],
                }
            }
        }
    }
}

/// One of the eight lattice points contributing to a sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct Corner {
    /// Linear lattice index.
    pub index: usize,
    /// Interpolation weight.
    pub weight: f32,
    /// Derivative of `weight` with respect to the sample position (cell units).
    pub grad: Vec3,
}

/// Trilinear interpolation stencil for one sample point.
#[derive(Debug, Clone, Copy)]
pub struct Stencil {
    corners: [Corner; 8],
}

impl Stencil {
    /// Builds the stencil for cell-unit position `q` on `lattice`.
    pub fn new(lattice: &Lattice, q: Vec3, policy: BoundaryPolicy) -> Self {
        let ax = AxisTap::new(q.x - lattice.offset[0], lattice.dims[0], lattice.period[0], policy);
        let ay = AxisTap::new(q.y - lattice.offset[1], lattice.dims[1], lattice.period[1], policy);
        let az = AxisTap::new(q.z - lattice.offset[2], lattice.dims[2], lattice.period[2], policy);

        let mut corners = [Corner::default(); 8];
        for (n, corner) in corners.iter_mut().enumerate() {
            let (a, b, c) = (n & 1, (n >> 1) & 1, (n >> 2) & 1);
            *corner = Corner {
                index: lattice.index(ax.idx[a], ay.idx[b], az.idx[c]),
                weight: ax.w[a] * ay.w[b] * az.w[c],
                grad: Vec3::new(
                    ax.dw[a] * ay.w[b] * az.w[c],
                    ax.w[a] * ay.dw[b] * az.w[c],
                    ax.w[a] * ay.w[b] * az.dw[c],
                ),
            };
        }
        Self { corners }
    }

    pub fn corners(&self) -> &[Corner; 8] {
        &self.corners
    }

    /// Interpolated value of `data` at the stencil point.
    #[inline]
    pub fn sample(&self, data: &[f32]) -> f32 {
        self.corners
            .iter()
            .filter(|c| c.weight != 0.0)
            .map(|c| c.weight * data[c.index])
            .sum()
    }

    /// Gradient of the interpolant with respect to position, in cell units.
    #[inline]
    pub fn gradient(&self, data: &[f32]) -> Vec3 {
        self.corners
            .iter()
            .filter(|c| c.grad != Vec3::ZERO)
            .map(|c| c.grad * data[c.index])
            .sum()
    }

    /// Adds `value * weight` to every corner of `acc`.
    #[inline]
    pub fn scatter(&self, acc: &AtomicBuffer, value: f32) {
        if value == 0.0 {
            return;
        }
        for c in self.corners.iter().filter(|c| c.weight != 0.0) {
            acc.add(c.index, value * c.weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::GridShape;

    fn ramp(shape: &GridShape) -> Vec<f32> {
        (0..shape.cell_count())
            .map(|n| {
                let [i, j, k] = shape.coords(n);
                i as f32 + 2.0 * j as f32 + 3.0 * k as f32
            })
            .collect()
    }

    #[test]
    fn weights_sum_to_one_inside() {
        let shape = GridShape::cubic(4, 1.0).unwrap();
        let s = Stencil::new(&shape.centered_lattice(), Vec3::new(1.3, 2.1, 0.9), BoundaryPolicy::Clamp);
        let total: f32 = s.corners().iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn linear_field_is_reproduced() {
        let shape = GridShape::cubic(4, 1.0).unwrap();
        let data = ramp(&shape);
        let q = Vec3::new(1.75, 2.25, 1.6);
        let s = Stencil::new(&shape.centered_lattice(), q, BoundaryPolicy::Clamp);
        let c = q - 0.5;
        assert!((s.sample(&data) - (c.x + 2.0 * c.y + 3.0 * c.z)).abs() < 1e-5);
        assert!((s.gradient(&data) - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn clamp_freezes_outside() {
        let shape = GridShape::cubic(4, 1.0).unwrap();
        let data = ramp(&shape);
        let s = Stencil::new(&shape.centered_lattice(), Vec3::new(-3.0, 1.5, 1.5), BoundaryPolicy::Clamp);
        assert!((s.sample(&data) - (2.0 + 3.0)).abs() < 1e-5);
        assert_eq!(s.gradient(&data).x, 0.0);
    }

    #[test]
    fn zero_policy_fades_out() {
        let shape = GridShape::cubic(2, 1.0).unwrap();
        let data = vec![1.0; shape.cell_count()];
        let s = Stencil::new(&shape.centered_lattice(), Vec3::new(0.25, 1.0, 1.0), BoundaryPolicy::Zero);
        // The ghost point at c = -1 reads zero.
        assert!((s.sample(&data) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn periodic_wraps() {
        let shape = GridShape::new(4, 1, 1, 1.0).unwrap();
        let data = vec![0.0, 0.0, 0.0, 8.0];
        let s = Stencil::new(&shape.centered_lattice(), Vec3::new(0.0, 0.5, 0.5), BoundaryPolicy::Periodic);
        // c = -0.5 wraps to 3.5: halfway between sample 3 and sample 0.
        assert!((s.sample(&data) - 4.0).abs() < 1e-6);
    }
}
