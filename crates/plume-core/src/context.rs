//! Device context: handle table, gradient tape and kernel dispatch.
//!
//! Every field and image lives in the context and is addressed by a typed
//! handle. Field data is reference counted; the handle table holds one
//! reference and each tape node or rendered image that read the field holds
//! another. Freeing a handle removes it from the table at once, while the
//! memory stays charged to the device until the last tape or image
//! reference is gone (see [`DeviceContext::end_rollout`]).
//!
//! # Gradient flow
//!
//! [`backward_from_image`](DeviceContext::backward_from_image) runs the
//! render adjoint immediately and accumulates into the gradient of the
//! rendered density. [`get_gradient`](DeviceContext::get_gradient) then
//! walks the advection nodes in reverse, so every density gradient is
//! complete before it is pushed one step further back. After that walk the
//! tape is spent: new seeds are rejected until
//! [`zero_gradients`](DeviceContext::zero_gradients) re-arms it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use tracing::{debug, warn};

use plume_advect::SemiLagrangian;
use plume_gpu::{CpuDevice, DeviceBackend, MemoryStats};
use plume_grid::{DensityField, FieldKind, GradientBuffer, GridShape, VelocityField};
use plume_render::{Camera, ImageGradient, LightGrid, RayMarcher, RenderedImage};
use plume_telemetry::{EngineEvent, EventBus, EventKind, EventSink, KernelKind};
use plume_types::{FieldHandle, ImageHandle, PlumeError, PlumeResult};

use crate::config::EngineConfig;
use crate::tape::{AdvectNode, Tape};

/// Field storage shared between the handle table and the tape.
#[derive(Debug)]
pub(crate) enum FieldData {
    Density(DensityField),
    Velocity(VelocityField),
}

impl FieldData {
    fn kind(&self) -> FieldKind {
        match self {
            FieldData::Density(_) => FieldKind::Density,
            FieldData::Velocity(v) => FieldKind::Velocity(v.layout()),
        }
    }

    fn shape(&self) -> &GridShape {
        match self {
            FieldData::Density(d) => d.shape(),
            FieldData::Velocity(v) => v.shape(),
        }
    }

    fn to_host(&self) -> Vec<f32> {
        match self {
            FieldData::Density(d) => d.to_host(),
            FieldData::Velocity(v) => v.to_host(),
        }
    }

    pub(crate) fn density(&self, handle: FieldHandle) -> PlumeResult<&DensityField> {
        match self {
            FieldData::Density(d) => Ok(d),
            FieldData::Velocity(_) => Err(wrong_kind(handle, self.kind(), "density")),
        }
    }

    pub(crate) fn velocity(&self, handle: FieldHandle) -> PlumeResult<&VelocityField> {
        match self {
            FieldData::Velocity(v) => Ok(v),
            FieldData::Density(_) => Err(wrong_kind(handle, self.kind(), "velocity")),
        }
    }
}

fn wrong_kind(handle: FieldHandle, actual: FieldKind, expected: &str) -> PlumeError {
    PlumeError::InvalidHandle(format!(
        "{handle} holds a {} field, expected {expected}",
        actual.name()
    ))
}

#[derive(Debug)]
struct FieldEntry {
    data: Arc<FieldData>,
    /// Frame index: 0 for caller-provided fields, input frame + 1 for
    /// advection outputs.
    frame: u32,
}

/// What an image was rendered from, kept while its rollout is open.
#[derive(Debug)]
struct RenderSource {
    density: FieldHandle,
    data: Arc<FieldData>,
    camera: Camera,
    /// Renderer state at the time, light grid included.
    marcher: RayMarcher,
}

#[derive(Debug)]
struct ImageEntry {
    image: RenderedImage,
    frame: u32,
    source: Option<RenderSource>,
}

/// Owns device memory, handles and the gradient tape for one compute stream.
pub struct DeviceContext {
    config: EngineConfig,
    device: Box<dyn DeviceBackend>,
    solver: SemiLagrangian,
    marcher: RayMarcher,
    fields: HashMap<FieldHandle, FieldEntry>,
    images: HashMap<ImageHandle, ImageEntry>,
    gradients: HashMap<FieldHandle, GradientBuffer>,
    tape: Tape,
    /// Freed fields whose memory is still held by the tape or an image.
    deferred: Vec<Weak<FieldData>>,
    bus: EventBus,
    next_id: u64,
    last_field: Option<FieldHandle>,
    last_image: Option<ImageHandle>,
}

impl DeviceContext {
    /// Creates a context on the CPU device with the configured budget.
    pub fn new(config: EngineConfig) -> PlumeResult<Self> {
        let device = CpuDevice::with_budget(config.memory_budget_bytes);
        Self::with_device(config, Box::new(device))
    }

    /// Creates a context on an explicit device.
    pub fn with_device(config: EngineConfig, device: Box<dyn DeviceBackend>) -> PlumeResult<Self> {
        config.validate()?;
        debug!(
            device = device.name(),
            budget = config.memory_budget_bytes,
            "device context created"
        );
        Ok(Self {
            solver: SemiLagrangian::new(config.advection),
            marcher: RayMarcher::new(config.render.clone()),
            config,
            device,
            fields: HashMap::new(),
            images: HashMap::new(),
            gradients: HashMap::new(),
            tape: Tape::default(),
            deferred: Vec::new(),
            bus: EventBus::new(),
            next_id: 1,
            last_field: None,
            last_image: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn memory(&self) -> MemoryStats {
        self.device.memory()
    }

    /// Registers a telemetry sink.
    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.bus.add_sink(sink);
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of advection steps recorded since the last `end_rollout`.
    pub fn tape_len(&self) -> usize {
        self.tape.len()
    }

    /// Freed fields whose memory is still held by the tape or an image.
    pub fn deferred_count(&self) -> usize {
        self.deferred.iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Handle produced by the most recent `advect`, including one that
    /// reported [`PlumeError::NumericInstability`].
    pub fn last_field(&self) -> Option<FieldHandle> {
        self.last_field
    }

    /// Handle produced by the most recent `render`.
    pub fn last_image(&self) -> Option<ImageHandle> {
        self.last_image
    }

    pub fn field_kind(&self, handle: FieldHandle) -> PlumeResult<FieldKind> {
        Ok(self.entry(handle)?.data.kind())
    }

    pub fn field_frame(&self, handle: FieldHandle) -> PlumeResult<u32> {
        Ok(self.entry(handle)?.frame)
    }

    // ─── Fields ──────────────────────────────────────────────

    /// Allocates a zero field of `kind`. `shape` must equal the configured grid.
    pub fn allocate_field(&mut self, shape: GridShape, kind: FieldKind) -> PlumeResult<FieldHandle> {
        shape.ensure_matches(&self.config.grid, "field allocation")?;
        let data = match kind {
            FieldKind::Density => FieldData::Density(DensityField::zeros(&*self.device, shape)?),
            FieldKind::Velocity(layout) => {
                FieldData::Velocity(VelocityField::zeros(&*self.device, shape, layout)?)
            }
        };
        let handle = self.next_field();
        self.fields.insert(
            handle,
            FieldEntry {
                data: Arc::new(data),
                frame: 0,
            },
        );
        debug!(%handle, kind = kind.name(), "field allocated");
        Ok(handle)
    }

    /// Allocates a field on the configured grid and uploads `host` into it.
    pub fn create_field(&mut self, kind: FieldKind, host: &[f32]) -> PlumeResult<FieldHandle> {
        let handle = self.allocate_field(self.config.grid, kind)?;
        if let Err(e) = self.set_field(handle, host) {
            self.fields.remove(&handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Replaces the contents of a field.
    ///
    /// Fields are immutable once a kernel has read them; writing to one that
    /// the tape or an image still references fails with `InvalidState`.
    /// Advection outputs are never writable.
    pub fn set_field(&mut self, handle: FieldHandle, host: &[f32]) -> PlumeResult<()> {
        let produced = self.tape.is_output(handle);
        let entry = self
            .fields
            .get_mut(&handle)
            .ok_or_else(|| unknown_field(handle))?;
        if produced || entry.frame > 0 {
            return Err(PlumeError::InvalidState(format!(
                "{handle} is the output of frame {} and is immutable",
                entry.frame
            )));
        }
        if Arc::strong_count(&entry.data) > 1 {
            return Err(PlumeError::InvalidState(format!(
                "{handle} was already consumed by a kernel and is immutable"
            )));
        }
        let shape = *entry.data.shape();
        let data = match entry.data.kind() {
            FieldKind::Density => {
                FieldData::Density(DensityField::from_host(&*self.device, shape, host)?)
            }
            FieldKind::Velocity(layout) => FieldData::Velocity(VelocityField::from_host(
                &*self.device,
                shape,
                layout,
                host,
            )?),
        };
        entry.data = Arc::new(data);
        Ok(())
    }

    /// Host copy of a field in its upload layout.
    pub fn read_field(&self, handle: FieldHandle) -> PlumeResult<Vec<f32>> {
        Ok(self.entry(handle)?.data.to_host())
    }

    /// Releases a field handle.
    ///
    /// The memory is returned immediately unless the tape or a rendered
    /// image still references the field, in which case it is returned once
    /// those references are dropped.
    pub fn free_field(&mut self, handle: FieldHandle) -> PlumeResult<()> {
        let entry = self
            .fields
            .remove(&handle)
            .ok_or_else(|| unknown_field(handle))?;
        if !self.tape.references(handle) {
            self.gradients.remove(&handle);
        }
        if Arc::strong_count(&entry.data) > 1 {
            debug!(%handle, "field free deferred");
            self.deferred.push(Arc::downgrade(&entry.data));
        }
        Ok(())
    }

    // ─── Kernels ─────────────────────────────────────────────

    /// Advects `density` through `velocity` and records the step on the tape.
    pub fn advect(
        &mut self,
        density: FieldHandle,
        velocity: FieldHandle,
        dt: f32,
    ) -> PlumeResult<FieldHandle> {
        if self.tape.is_propagated() {
            return Err(PlumeError::InvalidState(
                "gradient tape was already propagated; call zero_gradients() or end_rollout() first"
                    .into(),
            ));
        }
        let (density_data, frame) = self.shared(density)?;
        let (velocity_data, _) = self.shared(velocity)?;
        let d = density_data.density(density)?;
        let v = velocity_data.velocity(velocity)?;
        let cells = d.shape().cell_count();

        let start = Instant::now();
        let out = self.solver.advect(&*self.device, d, v, dt)?;
        let wall_time = start.elapsed().as_secs_f64();
        let bad = if self.config.check_numerics {
            out.data().count_non_finite()
        } else {
            0
        };

        let frame = frame + 1;
        let handle = self.next_field();
        self.fields.insert(
            handle,
            FieldEntry {
                data: Arc::new(FieldData::Density(out)),
                frame,
            },
        );
        self.tape.record(AdvectNode {
            density,
            velocity,
            output: handle,
            density_data,
            velocity_data,
            dt,
            frame,
        });
        self.last_field = Some(handle);
        self.emit(frame, kernel_event(KernelKind::AdvectForward, cells, wall_time));
        self.bus.flush();
        self.screen(frame, || format!("advected density {handle}"), bad)?;
        Ok(handle)
    }

    /// Renders `density` through `camera`.
    pub fn render(&mut self, density: FieldHandle, camera: &Camera) -> PlumeResult<ImageHandle> {
        let (data, frame) = self.shared(density)?;
        let d = data.density(density)?;

        let start = Instant::now();
        let image = self.marcher.render(&*self.device, d, camera)?;
        let wall_time = start.elapsed().as_secs_f64();
        let bad = if self.config.check_numerics {
            image.count_non_finite()
        } else {
            0
        };

        let handle = self.next_image();
        self.images.insert(
            handle,
            ImageEntry {
                image,
                frame,
                source: Some(RenderSource {
                    density,
                    data,
                    camera: camera.clone(),
                    marcher: self.marcher.clone(),
                }),
            },
        );
        self.last_image = Some(handle);
        self.emit(
            frame,
            kernel_event(KernelKind::RenderForward, camera.pixel_count(), wall_time),
        );
        self.bus.flush();
        self.screen(frame, || format!("rendered image {handle}"), bad)?;
        Ok(handle)
    }

    /// Attaches a per-voxel light grid on the configured grid, or detaches
    /// it with `None`. `host` holds one grey value per cell or the red,
    /// green and blue arrays back to back.
    ///
    /// Images rendered earlier keep the light they were rendered with.
    pub fn set_light(&mut self, host: Option<&[f32]>) -> PlumeResult<()> {
        let marcher = RayMarcher::new(self.config.render.clone());
        self.marcher = match host {
            Some(host) => {
                let light = LightGrid::from_host(&*self.device, self.config.grid, host)?;
                debug!(monochrome = light.is_monochrome(), "light grid attached");
                marcher.with_light(Arc::new(light))
            }
            None => marcher,
        };
        Ok(())
    }

    /// Host copy of a rendered image.
    pub fn read_image(&self, image: ImageHandle) -> PlumeResult<RenderedImage> {
        self.images
            .get(&image)
            .map(|e| e.image.to_host())
            .ok_or_else(|| unknown_image(image))
    }

    pub fn free_image(&mut self, image: ImageHandle) -> PlumeResult<()> {
        self.images
            .remove(&image)
            .map(|_| ())
            .ok_or_else(|| unknown_image(image))
    }

    // ─── Gradients ───────────────────────────────────────────

    /// Seeds the reverse pass with the loss gradient of a rendered image.
    ///
    /// Seeds from several images accumulate.
    pub fn backward_from_image(
        &mut self,
        image: ImageHandle,
        grad: &ImageGradient,
    ) -> PlumeResult<()> {
        if self.tape.is_propagated() {
            return Err(PlumeError::InvalidState(
                "gradients were already propagated; call zero_gradients() before seeding again"
                    .into(),
            ));
        }
        let entry = self.images.get(&image).ok_or_else(|| unknown_image(image))?;
        let source = entry.source.as_ref().ok_or_else(|| {
            PlumeError::InvalidState(format!(
                "{image} belongs to an ended rollout and has no gradient path"
            ))
        })?;
        let d = source.data.density(source.density)?;

        let start = Instant::now();
        let g = source
            .marcher
            .render_backward(&*self.device, d, &source.camera, grad)?;
        let wall_time = start.elapsed().as_secs_f64();
        let (target, frame, pixels) = (source.density, entry.frame, source.camera.pixel_count());

        let bad = if self.config.check_numerics {
            g.count_non_finite()
        } else {
            0
        };
        self.add_gradient(target, g)?;
        self.emit(frame, kernel_event(KernelKind::RenderBackward, pixels, wall_time));
        self.bus.flush();
        self.screen(frame, || format!("render gradient of {image}"), bad)
    }

    /// Gradient of the seeded loss with respect to a field, in the field's
    /// host layout. Pending propagation through the tape runs first.
    pub fn get_gradient(&mut self, handle: FieldHandle) -> PlumeResult<Vec<f32>> {
        let entry = self.entry(handle)?;
        let kind = entry.data.kind();
        let shape = *entry.data.shape();
        if !self.tape.is_propagated() {
            self.propagate()?;
        }
        Ok(match self.gradients.get(&handle) {
            Some(g) => g.to_host(),
            None => vec![0.0; kind.element_count(&shape)],
        })
    }

    /// Drops all gradients and re-arms the tape for another reverse pass.
    pub fn zero_gradients(&mut self) {
        self.gradients.clear();
        self.tape.reset();
    }

    /// Ends the current rollout.
    ///
    /// Drops the tape, all gradients and the render provenance of every
    /// image, which returns the memory of every deferred free. Handles that
    /// are still live stay valid; images can still be read but no longer
    /// seed gradients.
    pub fn end_rollout(&mut self) {
        let nodes = self.tape.len();
        self.tape.clear();
        self.gradients.clear();
        for entry in self.images.values_mut() {
            entry.source = None;
        }
        self.deferred.retain(|w| w.strong_count() > 0);
        let stats = self.device.memory();
        debug!(nodes, in_use = stats.in_use, "rollout ended");
        self.emit(
            0,
            EventKind::Memory {
                in_use: stats.in_use,
                peak: stats.peak,
                live_allocations: stats.live_allocations,
            },
        );
        self.bus.flush();
    }

    pub(crate) fn emit(&self, frame: u32, kind: EventKind) {
        self.bus.emit(EngineEvent::new(frame, kind));
    }

    pub(crate) fn flush_events(&mut self) {
        self.bus.flush();
    }

    /// Runs the advection adjoints in reverse tape order.
    ///
    /// Adjoint contributions are staged and only merged into the stored
    /// gradients once every node has run, so a failed walk can be retried
    /// without counting anything twice.
    fn propagate(&mut self) -> PlumeResult<()> {
        let start = Instant::now();
        let mut bad = 0;
        let mut ran = 0;
        // Contributions not yet combined with a seeded gradient.
        let mut staged: HashMap<FieldHandle, GradientBuffer> = HashMap::new();
        // Complete gradients of node outputs, seeds included.
        let mut totals: HashMap<FieldHandle, GradientBuffer> = HashMap::new();
        for node in self.tape.nodes().iter().rev() {
            let seeded = self.gradients.get(&node.output);
            let g_out = match (staged.remove(&node.output), seeded) {
                (Some(mut g), seeded) => {
                    if let Some(seed) = seeded {
                        g.accumulate(&*self.device, seed)?;
                    }
                    &*totals.entry(node.output).or_insert(g)
                }
                (None, Some(seed)) => seed,
                (None, None) => continue,
            };
            let d = node.density_data.density(node.density)?;
            let v = node.velocity_data.velocity(node.velocity)?;

            let t0 = Instant::now();
            let grads = self
                .solver
                .advect_backward(&*self.device, d, v, node.dt, g_out)?;
            let wall_time = t0.elapsed().as_secs_f64();

            if self.config.check_numerics {
                bad += grads.density.count_non_finite() + grads.velocity.count_non_finite();
            }
            stage(&*self.device, &mut staged, node.density, grads.density)?;
            stage(&*self.device, &mut staged, node.velocity, grads.velocity)?;
            self.emit(
                node.frame,
                kernel_event(KernelKind::AdvectBackward, d.shape().cell_count(), wall_time),
            );
            ran += 1;
        }
        for (handle, g) in staged.iter_mut() {
            if let Some(seed) = self.gradients.get(handle) {
                g.accumulate(&*self.device, seed)?;
            }
        }

        self.gradients.extend(totals);
        self.gradients.extend(staged);
        self.tape.mark_propagated();
        self.emit(
            0,
            EventKind::BackwardComplete {
                nodes: ran,
                wall_time: start.elapsed().as_secs_f64(),
            },
        );
        self.bus.flush();
        self.screen(0, || "advection gradients".to_string(), bad)
    }

    fn add_gradient(&mut self, handle: FieldHandle, g: GradientBuffer) -> PlumeResult<()> {
        match self.gradients.get_mut(&handle) {
            Some(existing) => existing.accumulate(&*self.device, &g),
            None => {
                self.gradients.insert(handle, g);
                Ok(())
            }
        }
    }

    /// Reports non-finite output values as an advisory error.
    fn screen(
        &mut self,
        frame: u32,
        what: impl FnOnce() -> String,
        count: usize,
    ) -> PlumeResult<()> {
        if count == 0 {
            return Ok(());
        }
        let what = what();
        warn!(what = %what, count, "non-finite values in kernel output");
        self.emit(
            frame,
            EventKind::NumericWarning {
                what: what.clone(),
                count,
            },
        );
        self.bus.flush();
        Err(PlumeError::NumericInstability { what, count })
    }

    fn entry(&self, handle: FieldHandle) -> PlumeResult<&FieldEntry> {
        self.fields.get(&handle).ok_or_else(|| unknown_field(handle))
    }

    fn shared(&self, handle: FieldHandle) -> PlumeResult<(Arc<FieldData>, u32)> {
        let entry = self.entry(handle)?;
        Ok((Arc::clone(&entry.data), entry.frame))
    }

    fn next_field(&mut self) -> FieldHandle {
        let id = self.next_id;
        self.next_id += 1;
        FieldHandle(id)
    }

    fn next_image(&mut self) -> ImageHandle {
        let id = self.next_id;
        self.next_id += 1;
        ImageHandle(id)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.bus.finalize();
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.device.name())
            .field("fields", &self.fields.len())
            .field("images", &self.images.len())
            .field("tape", &self.tape.len())
            .field("memory", &self.device.memory())
            .finish()
    }
}

/// Adds `g` into the staged gradient of `handle`.
fn stage(
    device: &dyn DeviceBackend,
    staged: &mut HashMap<FieldHandle, GradientBuffer>,
    handle: FieldHandle,
    g: GradientBuffer,
) -> PlumeResult<()> {
    match staged.get_mut(&handle) {
        Some(existing) => existing.accumulate(device, &g),
        None => {
            staged.insert(handle, g);
            Ok(())
        }
    }
}

fn kernel_event(kernel: KernelKind, elements: usize, wall_time: f64) -> EventKind {
    EventKind::Kernel {
        kernel,
        elements,
        wall_time,
    }
}

fn unknown_field(handle: FieldHandle) -> PlumeError {
    PlumeError::InvalidHandle(format!("{handle} is unknown or was freed"))
}

fn unknown_image(image: ImageHandle) -> PlumeError {
    PlumeError::InvalidHandle(format!("{image} is unknown or was freed"))
}
