//! Emission-absorption ray marching and its adjoint.
//!
//! Each ray is clipped to the grid box `[0, n·h]` and the segment is cut
//! into steps of fixed length, the last one shortened so the steps tile the
//! segment exactly. Density is sampled at step midpoints. A sample emits
//! `E_k = scattering_ratio · light_in` per unit density, where the light
//! comes from the attached [`LightGrid`] or the configured light color.
//!
//! # Beer-Lambert compositing
//!
//! ```text
//! a_k     = exp(-min(σ ρ_k Δs_k, 80))
//! T_{k+1} = T_k a_k                        T_0 = 1
//! L       = Σ_k T_k (1 - a_k) E_k + T_N B
//! ```
//!
//! `B` is the background. The adjoint sweeps the samples back to front,
//! carrying the radiance `R_k` seen behind sample `k` at unit transmittance
//! and the product `P_k = Π_{j>k} a_j`:
//!
//! ```text
//! R_N     = B                 R_{k-1} = (1 - a_k) E_k + a_k R_k
//! ∂L/∂a_k = T_k (R_k - E_k)   ∂α/∂a_k = -T_k P_k
//! ∂a_k/∂ρ_k = -σ Δs_k a_k
//! ```
//!
//! Nothing is divided by `a_k`, so opaque samples are safe.
//!
//! # Reductions
//!
//! `Max`, `Min` and `Mean` reduce each radiance channel `ρ_k E_k` over the
//! samples, and reduce the density the same way to `r`. Transmittance is
//! `exp(-min(σ r ℓ, 80))` for a segment of length `ℓ`. The adjoints of
//! `Max` and `Min` go to the selected sample only, the first one on ties;
//! `Mean` spreads `1/n` over all samples.

use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use rayon::prelude::*;
use tracing::debug;

use plume_gpu::DeviceBackend;
use plume_grid::{BoundaryPolicy, DensityField, FieldKind, GradientAccumulator, GradientBuffer, Stencil};
use plume_types::constants::MAX_OPTICAL_DEPTH;
use plume_types::PlumeResult;

use crate::camera::{Camera, Ray};
use crate::config::{BlendMode, RenderConfig};
use crate::image::{ImageGradient, RenderedImage};
use crate::light::LightGrid;

/// One density sample along a ray.
struct Sample {
    stencil: Stencil,
    /// Interpolated density.
    rho: f32,
    /// Step length (world units).
    ds: f32,
    /// Emitted radiance per unit density.
    emission: [f32; 3],
    /// Attenuation `a_k` (Beer-Lambert only).
    a: f32,
    /// Transmittance in front of the sample (Beer-Lambert only).
    t_before: f32,
    /// Optical depth hit the clamp; the sample has no density derivative.
    saturated: bool,
}

/// Result of marching one ray.
struct RayRecord {
    samples: Vec<Sample>,
    radiance: [f32; 3],
    transmittance: f32,
    /// Length of the marched segment.
    length: f32,
    /// Additive and reduction modes: total optical depth hit the clamp.
    saturated: bool,
}

impl RayRecord {
    fn miss(background: [f32; 3]) -> Self {
        Self {
            samples: Vec::new(),
            radiance: background,
            transmittance: 1.0,
            length: 0.0,
            saturated: false,
        }
    }
}

/// Index of the largest (`Max`) or smallest (`Min`) value, first on ties.
fn select(
    blend: BlendMode,
    samples: &[Sample],
    value: impl Fn(&Sample) -> f32,
) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (k, s) in samples.iter().enumerate() {
        let v = value(s);
        let better = match best {
            None => true,
            Some((_, b)) if blend == BlendMode::Min => v < b,
            Some((_, b)) => v > b,
        };
        if better {
            best = Some((k, v));
        }
    }
    best.map(|(k, _)| k)
}

/// Max, min or mean of `value` over the samples; zero without samples.
fn reduce(blend: BlendMode, samples: &[Sample], value: impl Fn(&Sample) -> f32) -> f32 {
    if blend == BlendMode::Mean {
        if samples.is_empty() {
            return 0.0;
        }
        return samples.iter().map(&value).sum::<f32>() / samples.len() as f32;
    }
    select(blend, samples, &value).map_or(0.0, |k| value(&samples[k]))
}

/// Differentiable volume renderer.
#[derive(Debug, Clone, Default)]
pub struct RayMarcher {
    config: RenderConfig,
    light: Option<Arc<LightGrid>>,
}

impl RayMarcher {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            light: None,
        }
    }

    /// Takes incoming light from `light` instead of the uniform light color.
    pub fn with_light(mut self, light: Arc<LightGrid>) -> Self {
        self.light = Some(light);
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn light(&self) -> Option<&LightGrid> {
        self.light.as_deref()
    }

    fn check_inputs(&self, density: &DensityField, camera: &Camera) -> PlumeResult<()> {
        self.config.validate()?;
        camera.validate()?;
        if let Some(light) = &self.light {
            light.shape().ensure_matches(density.shape(), "light grid")?;
        }
        Ok(())
    }

    /// Renders `density` as seen by `camera`.
    pub fn render(
        &self,
        device: &dyn DeviceBackend,
        density: &DensityField,
        camera: &Camera,
    ) -> PlumeResult<RenderedImage> {
        self.check_inputs(density, camera)?;
        let start = Instant::now();
        let width = camera.width();
        let (right, up, forward) = camera.basis();

        let mut image = RenderedImage::zeros(device, width, camera.height())?;
        let (radiance, transmittance) = image.channels_mut();
        radiance
            .par_chunks_mut(3)
            .zip(transmittance.par_iter_mut())
            .enumerate()
            .for_each(|(n, (rgb, t))| {
                let ray = camera.ray_with_basis(n % width, n / width, right, up, forward);
                let record = self.march(density, &ray);
                rgb.copy_from_slice(&record.radiance);
                *t = record.transmittance;
            });

        debug!(
            pixels = camera.pixel_count(),
            blend = self.config.blend.name(),
            lit = self.light.is_some(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "render forward"
        );
        Ok(image)
    }

    /// Gradient of a loss with respect to `density`, given the loss gradient
    /// with respect to the image `render(density, camera)`.
    pub fn render_backward(
        &self,
        device: &dyn DeviceBackend,
        density: &DensityField,
        camera: &Camera,
        grad: &ImageGradient,
    ) -> PlumeResult<GradientBuffer> {
        self.check_inputs(density, camera)?;
        grad.ensure_matches(camera)?;
        let start = Instant::now();
        let width = camera.width();
        let (right, up, forward) = camera.basis();
        let acc = GradientAccumulator::new(device, *density.shape(), FieldKind::Density)?;
        let target = acc.part(0);
        let scatter = |s: &Sample, d: f32| s.stencil.scatter(target, d);

        (0..camera.pixel_count()).into_par_iter().for_each(|n| {
            let g_rgb = &grad.radiance()[3 * n..3 * n + 3];
            let g_alpha = grad.alpha()[n];
            if g_alpha == 0.0 && g_rgb.iter().all(|&g| g == 0.0) {
                return;
            }
            let ray = camera.ray_with_basis(n % width, n / width, right, up, forward);
            let record = self.march(density, &ray);
            match self.config.blend {
                BlendMode::BeerLambert => {
                    self.sweep_beer_lambert(&record, g_rgb, g_alpha, scatter)
                }
                BlendMode::Additive => self.sweep_additive(&record, g_rgb, g_alpha, scatter),
                BlendMode::Max | BlendMode::Min | BlendMode::Mean => {
                    self.sweep_reduce(&record, g_rgb, g_alpha, scatter)
                }
            }
        });

        debug!(
            pixels = camera.pixel_count(),
            blend = self.config.blend.name(),
            lit = self.light.is_some(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "render backward"
        );
        Ok(acc.finish())
    }

    /// Emitted radiance per unit density at a sample.
    #[inline]
    fn emission_at(&self, stencil: &Stencil) -> [f32; 3] {
        let light_in = match &self.light {
            Some(grid) => grid.sample(stencil),
            None => self.config.light_color,
        };
        self.config.scatter(light_in)
    }

    fn march(&self, density: &DensityField, ray: &Ray) -> RayRecord {
        let shape = density.shape();
        let background = self.config.background;
        let Some((t0, mut t1)) = ray.intersect_box(Vec3::ZERO, shape.world_extent()) else {
            return RayRecord::miss(background);
        };
        if let Some(max) = self.config.max_distance {
            t1 = t1.min(max);
        }
        if t1 <= t0 {
            return RayRecord::miss(background);
        }

        let blend = self.config.blend;
        let step = self.config.step_for(shape);
        let steps = ((t1 - t0) / step).ceil().max(1.0) as usize;
        let inv_h = 1.0 / shape.voxel_size;
        let sigma = self.config.absorption;
        let data = density.as_slice();

        let mut samples = Vec::with_capacity(steps);
        let mut radiance = [0.0_f32; 3];
        let mut t = 1.0_f32;
        let mut depth = 0.0_f32;

        for k in 0..steps {
            let s0 = t0 + k as f32 * step;
            let s1 = (s0 + step).min(t1);
            let ds = s1 - s0;
            if ds <= 0.0 {
                break;
            }
            let q = ray.at(0.5 * (s0 + s1)) * inv_h;
            let stencil = density.stencil(q, BoundaryPolicy::Clamp);
            let rho = stencil.sample(data);
            let emission = self.emission_at(&stencil);
            let mut sample = Sample {
                stencil,
                rho,
                ds,
                emission,
                a: 1.0,
                t_before: 1.0,
                saturated: false,
            };

            match blend {
                BlendMode::BeerLambert => {
                    let od = sigma * rho * ds;
                    let a = (-od.min(MAX_OPTICAL_DEPTH)).exp();
                    for c in 0..3 {
                        radiance[c] += t * (1.0 - a) * emission[c];
                    }
                    sample.a = a;
                    sample.t_before = t;
                    sample.saturated = od > MAX_OPTICAL_DEPTH;
                    samples.push(sample);
                    t *= a;
                    if t < self.config.transmittance_epsilon {
                        break;
                    }
                }
                BlendMode::Additive => {
                    for c in 0..3 {
                        radiance[c] += rho * ds * emission[c];
                    }
                    depth += rho * ds;
                    samples.push(sample);
                }
                BlendMode::Max | BlendMode::Min | BlendMode::Mean => samples.push(sample),
            }
        }

        let length = t1 - t0;
        let mut saturated = false;
        if blend != BlendMode::BeerLambert {
            if blend.is_reduction() {
                for (c, value) in radiance.iter_mut().enumerate() {
                    *value = reduce(blend, &samples, |s| s.rho * s.emission[c]);
                }
                depth = reduce(blend, &samples, |s| s.rho) * length;
            }
            let od = sigma * depth;
            saturated = od > MAX_OPTICAL_DEPTH;
            t = (-od.min(MAX_OPTICAL_DEPTH)).exp();
        }
        for c in 0..3 {
            radiance[c] += t * background[c];
        }
        RayRecord {
            samples,
            radiance,
            transmittance: t,
            length,
            saturated,
        }
    }

    /// Reverse sweep for Beer-Lambert; `emit` receives `∂loss/∂ρ_k` per sample.
    fn sweep_beer_lambert(
        &self,
        record: &RayRecord,
        g_rgb: &[f32],
        g_alpha: f32,
        mut emit: impl FnMut(&Sample, f32),
    ) {
        let sigma = self.config.absorption;
        let mut behind = self.config.background;
        let mut p = 1.0_f32;

        for s in record.samples.iter().rev() {
            if !s.saturated {
                let mut d_a = -g_alpha * s.t_before * p;
                for c in 0..3 {
                    d_a += g_rgb[c] * s.t_before * (behind[c] - s.emission[c]);
                }
                emit(s, d_a * (-sigma * s.ds * s.a));
            }
            for c in 0..3 {
                behind[c] = (1.0 - s.a) * s.emission[c] + s.a * behind[c];
            }
            p *= s.a;
        }
    }

    /// Gradient of the loss with respect to the optical depth of the ray,
    /// through transmittance only.
    fn depth_adjoint(&self, record: &RayRecord, g_rgb: &[f32], g_alpha: f32) -> f32 {
        if record.saturated {
            return 0.0;
        }
        let t = record.transmittance;
        let background = self.config.background;
        let mut d = g_alpha * t;
        for c in 0..3 {
            d -= g_rgb[c] * background[c] * t;
        }
        d
    }

    fn sweep_additive(
        &self,
        record: &RayRecord,
        g_rgb: &[f32],
        g_alpha: f32,
        mut emit: impl FnMut(&Sample, f32),
    ) {
        let d_depth = self.config.absorption * self.depth_adjoint(record, g_rgb, g_alpha);
        for s in &record.samples {
            // Per unit of ρΔs: emission directly, background and alpha through T.
            let mut per_depth = d_depth;
            for c in 0..3 {
                per_depth += g_rgb[c] * s.emission[c];
            }
            if per_depth != 0.0 {
                emit(s, per_depth * s.ds);
            }
        }
    }

    fn sweep_reduce(
        &self,
        record: &RayRecord,
        g_rgb: &[f32],
        g_alpha: f32,
        mut emit: impl FnMut(&Sample, f32),
    ) {
        let samples = &record.samples;
        if samples.is_empty() {
            return;
        }
        let blend = self.config.blend;
        // ∂loss/∂r for the reduced density r.
        let d_r =
            self.config.absorption * record.length * self.depth_adjoint(record, g_rgb, g_alpha);

        if blend == BlendMode::Mean {
            let w = 1.0 / samples.len() as f32;
            for s in samples {
                let mut d = d_r;
                for c in 0..3 {
                    d += g_rgb[c] * s.emission[c];
                }
                emit(s, d * w);
            }
            return;
        }
        if d_r != 0.0 {
            if let Some(k) = select(blend, samples, |s| s.rho) {
                emit(&samples[k], d_r);
            }
        }
        for c in 0..3 {
            if g_rgb[c] == 0.0 {
                continue;
            }
            if let Some(k) = select(blend, samples, |s| s.rho * s.emission[c]) {
                emit(&samples[k], g_rgb[c] * samples[k].emission[c]);
            }
        }
    }
}
