//! Frame-by-frame rollout and its reverse pass.
//!
//! Forward: `density[t+1] = advect(density[t], velocity[t], dt)`, then
//! `image[t+1] = render(density[t+1], camera[t+1])`. Frame 0 is rendered
//! when a camera is supplied for it.
//!
//! Backward: every image gradient is seeded, then the tape is walked from
//! the last step to the first. The gradient reaching `density[t+1]` is the
//! sum of its render seed and the adjoint of step `t+1` before it is
//! pushed through step `t`.

use std::ops::{Deref, DerefMut};
use std::time::Instant;

use tracing::{info, warn};

use plume_render::{Camera, ImageGradient};
use plume_telemetry::EventKind;
use plume_types::{FieldHandle, ImageHandle, PlumeError, PlumeResult};

use crate::context::DeviceContext;

/// RAII guard over the handles a rollout creates.
///
/// Dropping an armed scope frees every adopted handle and ends the rollout,
/// so an early return leaves nothing behind. [`disarm`](Self::disarm) hands
/// the handles over instead.
pub struct RolloutScope<'a> {
    ctx: &'a mut DeviceContext,
    fields: Vec<FieldHandle>,
    images: Vec<ImageHandle>,
    armed: bool,
}

impl<'a> RolloutScope<'a> {
    pub fn new(ctx: &'a mut DeviceContext) -> Self {
        Self {
            ctx,
            fields: Vec::new(),
            images: Vec::new(),
            armed: true,
        }
    }

    /// Frees `handle` when the scope drops.
    pub fn adopt_field(&mut self, handle: FieldHandle) -> FieldHandle {
        self.fields.push(handle);
        handle
    }

    pub fn adopt_image(&mut self, handle: ImageHandle) -> ImageHandle {
        self.images.push(handle);
        handle
    }

    /// `advect` whose output is adopted, including an output that came
    /// with a numeric-instability report.
    pub fn advect_tracked(
        &mut self,
        density: FieldHandle,
        velocity: FieldHandle,
        dt: f32,
    ) -> PlumeResult<FieldHandle> {
        let result = self.ctx.advect(density, velocity, dt);
        if let Err(e) = &result {
            if e.is_advisory() {
                if let Some(h) = self.ctx.last_field() {
                    self.adopt_field(h);
                }
            }
        }
        result.map(|h| self.adopt_field(h))
    }

    /// `render` whose output is adopted.
    pub fn render_tracked(
        &mut self,
        density: FieldHandle,
        camera: &Camera,
    ) -> PlumeResult<ImageHandle> {
        let result = self.ctx.render(density, camera);
        if let Err(e) = &result {
            if e.is_advisory() {
                if let Some(h) = self.ctx.last_image() {
                    self.adopt_image(h);
                }
            }
        }
        result.map(|h| self.adopt_image(h))
    }

    /// Releases ownership of the adopted handles without freeing them.
    pub fn disarm(mut self) -> (Vec<FieldHandle>, Vec<ImageHandle>) {
        self.armed = false;
        (
            std::mem::take(&mut self.fields),
            std::mem::take(&mut self.images),
        )
    }
}

impl Deref for RolloutScope<'_> {
    type Target = DeviceContext;

    fn deref(&self) -> &DeviceContext {
        self.ctx
    }
}

impl DerefMut for RolloutScope<'_> {
    fn deref_mut(&mut self) -> &mut DeviceContext {
        self.ctx
    }
}

impl Drop for RolloutScope<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for image in self.images.drain(..) {
            let _ = self.ctx.free_image(image);
        }
        for field in self.fields.drain(..) {
            let _ = self.ctx.free_field(field);
        }
        self.ctx.end_rollout();
    }
}

/// Handles produced by [`RolloutDispatcher::forward`].
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    /// `density[0..=N]`. Entry 0 belongs to the caller.
    densities: Vec<FieldHandle>,
    /// `velocity[0..N]`, caller-owned.
    velocities: Vec<FieldHandle>,
    images: Vec<ImageHandle>,
    /// Frame of `images[0]`: 0 or 1.
    first_image_frame: usize,
}

impl Rollout {
    /// Number of advection steps.
    pub fn steps(&self) -> usize {
        self.velocities.len()
    }

    pub fn density(&self, frame: usize) -> Option<FieldHandle> {
        self.densities.get(frame).copied()
    }

    pub fn densities(&self) -> &[FieldHandle] {
        &self.densities
    }

    pub fn final_density(&self) -> FieldHandle {
        self.densities[self.densities.len() - 1]
    }

    pub fn velocities(&self) -> &[FieldHandle] {
        &self.velocities
    }

    /// Rendered images in frame order.
    pub fn images(&self) -> &[ImageHandle] {
        &self.images
    }

    /// Image of `frame`, if one was rendered.
    pub fn image(&self, frame: usize) -> Option<ImageHandle> {
        frame
            .checked_sub(self.first_image_frame)
            .and_then(|i| self.images.get(i).copied())
    }

    pub fn first_image_frame(&self) -> usize {
        self.first_image_frame
    }

    /// Frees the derived densities and the images, then ends the rollout.
    /// Caller-owned inputs stay allocated.
    pub fn release(self, ctx: &mut DeviceContext) -> PlumeResult<()> {
        for image in &self.images {
            ctx.free_image(*image)?;
        }
        for density in &self.densities[1..] {
            ctx.free_field(*density)?;
        }
        ctx.end_rollout();
        Ok(())
    }
}

/// Gradients returned by [`RolloutDispatcher::backward`].
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutGradients {
    /// Gradient with respect to `density[0]`.
    pub density: Vec<f32>,
    /// Gradient with respect to each `velocity[t]`, host layout.
    pub velocities: Vec<Vec<f32>>,
}

/// Drives forward and reverse passes over a frame sequence.
#[derive(Debug, Clone)]
pub struct RolloutDispatcher {
    /// Treat numeric-instability reports as fatal.
    pub abort_on_instability: bool,
}

impl Default for RolloutDispatcher {
    fn default() -> Self {
        Self {
            abort_on_instability: true,
        }
    }
}

impl RolloutDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher that logs numeric instability and keeps going.
    pub fn tolerant() -> Self {
        Self {
            abort_on_instability: false,
        }
    }

    /// Runs `velocities.len()` advection steps from `frame0`.
    ///
    /// `cameras` has one entry per frame `0..=N`, or one per frame `1..=N`
    /// to skip frame 0. On error every handle created so far is freed.
    pub fn forward(
        &self,
        ctx: &mut DeviceContext,
        frame0: FieldHandle,
        velocities: &[FieldHandle],
        cameras: &[Camera],
    ) -> PlumeResult<Rollout> {
        let steps = velocities.len();
        let first_image_frame = if cameras.len() == steps + 1 {
            0
        } else if cameras.len() == steps {
            1
        } else {
            return Err(PlumeError::ShapeMismatch(format!(
                "{steps} steps need {} or {} cameras, got {}",
                steps,
                steps + 1,
                cameras.len()
            )));
        };
        let dt = ctx.config().dt;
        let start = Instant::now();
        ctx.emit(
            0,
            EventKind::RolloutBegin {
                steps: steps as u32,
            },
        );

        let mut scope = RolloutScope::new(ctx);
        let mut densities = Vec::with_capacity(steps + 1);
        let mut images = Vec::with_capacity(cameras.len());
        densities.push(frame0);
        if first_image_frame == 0 {
            let result = scope.render_tracked(frame0, &cameras[0]);
            let fallback = scope.last_image();
            images.push(self.settle(result, fallback)?);
        }
        for (t, &velocity) in velocities.iter().enumerate() {
            let result = scope.advect_tracked(densities[t], velocity, dt);
            let fallback = scope.last_field();
            densities.push(self.settle(result, fallback)?);

            let camera = &cameras[t + 1 - first_image_frame];
            let result = scope.render_tracked(densities[t + 1], camera);
            let fallback = scope.last_image();
            images.push(self.settle(result, fallback)?);
        }
        scope.disarm();

        let wall_time = start.elapsed().as_secs_f64();
        ctx.emit(steps as u32, EventKind::RolloutEnd { wall_time });
        ctx.flush_events();
        info!(steps, images = images.len(), wall_time, "rollout forward");
        Ok(Rollout {
            densities,
            velocities: velocities.to_vec(),
            images,
            first_image_frame,
        })
    }

    /// Pushes one gradient per rendered image back to `density[0]` and
    /// every velocity. Previous gradients in `ctx` are discarded.
    pub fn backward(
        &self,
        ctx: &mut DeviceContext,
        rollout: &Rollout,
        image_grads: &[ImageGradient],
    ) -> PlumeResult<RolloutGradients> {
        if image_grads.len() != rollout.images.len() {
            return Err(PlumeError::ShapeMismatch(format!(
                "rollout rendered {} images, got {} image gradients",
                rollout.images.len(),
                image_grads.len()
            )));
        }
        let start = Instant::now();
        ctx.zero_gradients();
        for (image, grad) in rollout.images.iter().zip(image_grads) {
            let result = ctx.backward_from_image(*image, grad);
            self.settle(result, Some(()))?;
        }
        let density = self.gradient(ctx, rollout.densities[0])?;
        let velocities = rollout
            .velocities
            .iter()
            .map(|&v| self.gradient(ctx, v))
            .collect::<PlumeResult<Vec<_>>>()?;
        info!(
            steps = rollout.steps(),
            wall_time = start.elapsed().as_secs_f64(),
            "rollout backward"
        );
        Ok(RolloutGradients {
            density,
            velocities,
        })
    }

    fn gradient(&self, ctx: &mut DeviceContext, handle: FieldHandle) -> PlumeResult<Vec<f32>> {
        match ctx.get_gradient(handle) {
            // Propagation finished before the report; the stored result is final.
            Err(e) if e.is_advisory() && !self.abort_on_instability => {
                warn!(error = %e, "continuing past numeric instability");
                ctx.get_gradient(handle)
            }
            other => other,
        }
    }

    /// Converts an advisory error into `fallback` unless instability aborts.
    fn settle<T>(&self, result: PlumeResult<T>, fallback: Option<T>) -> PlumeResult<T> {
        match result {
            Err(e) if e.is_advisory() && !self.abort_on_instability => {
                warn!(error = %e, "continuing past numeric instability");
                fallback.ok_or(e)
            }
            other => other,
        }
    }
}
