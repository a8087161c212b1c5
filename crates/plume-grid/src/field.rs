//! Density and velocity field storage.
//!
//! Fields own device buffers allocated through a [`DeviceBackend`]. They
//! are immutable once built: kernels read them and produce new fields.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use plume_gpu::{ComputeBuffer, DeviceBackend};
use plume_types::{PlumeError, PlumeResult};

use crate::sampling::{BoundaryPolicy, Stencil};
use crate::shape::{GridShape, Lattice};

/// Where velocity components are stored relative to density cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityLayout {
    /// All three components at cell centers.
    #[default]
    Centered,
    /// MAC layout: each component on the faces normal to its axis.
    Staggered,
}

impl VelocityLayout {
    /// Sampling lattice of component `axis`.
    pub fn lattice(&self, shape: &GridShape, axis: usize) -> Lattice {
        match self {
            VelocityLayout::Centered => shape.centered_lattice(),
            VelocityLayout::Staggered => shape.face_lattice(axis),
        }
    }
}

/// What a field handle stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Density,
    Velocity(VelocityLayout),
}

impl FieldKind {
    /// Sampling lattices of each stored component.
    pub fn lattices(&self, shape: &GridShape) -> Vec<Lattice> {
        match self {
            FieldKind::Density => vec![shape.centered_lattice()],
            FieldKind::Velocity(layout) => (0..3).map(|a| layout.lattice(shape, a)).collect(),
        }
    }

    /// Total number of stored scalars.
    pub fn element_count(&self, shape: &GridShape) -> usize {
        self.lattices(shape).iter().map(Lattice::len).sum()
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Density => "density",
            FieldKind::Velocity(VelocityLayout::Centered) => "velocity",
            FieldKind::Velocity(VelocityLayout::Staggered) => "staggered velocity",
        }
    }
}

/// Scalar smoke density, one non-negative value per cell.
#[derive(Debug)]
pub struct DensityField {
    shape: GridShape,
    data: ComputeBuffer,
}

impl DensityField {
    /// All-zero density.
    pub fn zeros(device: &dyn DeviceBackend, shape: GridShape) -> PlumeResult<Self> {
        shape.validate()?;
        Ok(Self {
            shape,
            data: device.allocate(shape.cell_count())?,
        })
    }

    /// Uploads host data, rejecting negative or non-finite values.
    pub fn from_host(
        device: &dyn DeviceBackend,
        shape: GridShape,
        host: &[f32],
    ) -> PlumeResult<Self> {
        shape.validate()?;
        check_len(host.len(), shape.cell_count(), "density")?;
        if let Some((n, v)) = host
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(PlumeError::InvalidField(format!(
                "density must be finite and non-negative, got {v} at cell {n}"
            )));
        }
        Ok(Self {
            shape,
            data: device.upload(host)?,
        })
    }

    /// Wraps a kernel output buffer.
    pub fn from_buffer(shape: GridShape, data: ComputeBuffer) -> PlumeResult<Self> {
        check_len(data.len(), shape.cell_count(), "density")?;
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    pub fn lattice(&self) -> Lattice {
        self.shape.centered_lattice()
    }

    pub fn data(&self) -> &ComputeBuffer {
        &self.data
    }

    pub fn as_slice(&self) -> &[f32] {
        self.data.as_slice()
    }

    pub fn to_host(&self) -> Vec<f32> {
        self.data.to_vec()
    }

    /// Value of cell `(i, j, k)`.
    pub fn at(&self, i: usize, j: usize, k: usize) -> f32 {
        self.data.as_slice()[self.shape.index(i, j, k)]
    }

    /// Stencil at cell-unit position `q`.
    #[inline]
    pub fn stencil(&self, q: Vec3, policy: BoundaryPolicy) -> Stencil {
        Stencil::new(&self.lattice(), q, policy)
    }

    /// Trilinearly interpolated density at cell-unit position `q`.
    pub fn sample(&self, q: Vec3, policy: BoundaryPolicy) -> f32 {
        self.stencil(q, policy).sample(self.as_slice())
    }

    /// Integrated density (sum × cell volume).
    pub fn total_mass(&self) -> f64 {
        let h = self.shape.voxel_size as f64;
        self.as_slice().iter().map(|&v| v as f64).sum::<f64>() * h * h * h
    }
}

/// Fluid velocity in world units per unit time.
#[derive(Debug)]
pub struct VelocityField {
    shape: GridShape,
    layout: VelocityLayout,
    components: [ComputeBuffer; 3],
}

impl VelocityField {
    /// All-zero velocity.
    pub fn zeros(
        device: &dyn DeviceBackend,
        shape: GridShape,
        layout: VelocityLayout,
    ) -> PlumeResult<Self> {
        shape.validate()?;
        let alloc = |axis: usize| device.allocate(layout.lattice(&shape, axis).len());
        Ok(Self {
            shape,
            layout,
            components: [alloc(0)?, alloc(1)?, alloc(2)?],
        })
    }

    /// Constant velocity `v` everywhere.
    pub fn uniform(
        device: &dyn DeviceBackend,
        shape: GridShape,
        layout: VelocityLayout,
        v: Vec3,
    ) -> PlumeResult<Self> {
        let mut field = Self::zeros(device, shape, layout)?;
        for axis in 0..3 {
            device.fill(&mut field.components[axis], v[axis]);
        }
        Ok(field)
    }

    /// Uploads host data laid out as the `u`, `v`, `w` component arrays back to back.
    pub fn from_host(
        device: &dyn DeviceBackend,
        shape: GridShape,
        layout: VelocityLayout,
        host: &[f32],
    ) -> PlumeResult<Self> {
        shape.validate()?;
        let kind = FieldKind::Velocity(layout);
        check_len(host.len(), kind.element_count(&shape), kind.name())?;
        let bad = host.iter().filter(|v| !v.is_finite()).count();
        if bad > 0 {
            return Err(PlumeError::InvalidField(format!(
                "velocity contains {bad} non-finite values"
            )));
        }
        let mut rest = host;
        let mut upload = |axis: usize| {
            let (head, tail) = rest.split_at(layout.lattice(&shape, axis).len());
            rest = tail;
            device.upload(head)
        };
        let components = [upload(0)?, upload(1)?, upload(2)?];
        Ok(Self {
            shape,
            layout,
            components,
        })
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    pub fn layout(&self) -> VelocityLayout {
        self.layout
    }

    pub fn component(&self, axis: usize) -> &ComputeBuffer {
        &self.components[axis]
    }

    pub fn lattice(&self, axis: usize) -> Lattice {
        self.layout.lattice(&self.shape, axis)
    }

    /// Concatenated component arrays.
    pub fn to_host(&self) -> Vec<f32> {
        self.components
            .iter()
            .flat_map(|c| c.as_slice().iter().copied())
            .collect()
    }

    /// Per-component stencils at cell-unit position `q`.
    #[inline]
    pub fn stencils(&self, q: Vec3, policy: BoundaryPolicy) -> [Stencil; 3] {
        [0, 1, 2].map(|axis| Stencil::new(&self.lattice(axis), q, policy))
    }

    /// Velocity at cell-unit position `q`.
    pub fn sample(&self, q: Vec3, policy: BoundaryPolicy) -> Vec3 {
        let s = self.stencils(q, policy);
        Vec3::new(
            s[0].sample(self.components[0].as_slice()),
            s[1].sample(self.components[1].as_slice()),
            s[2].sample(self.components[2].as_slice()),
        )
    }

    /// Number of non-finite values across all components.
    pub fn count_non_finite(&self) -> usize {
        self.components.iter().map(ComputeBuffer::count_non_finite).sum()
    }
}

fn check_len(got: usize, expected: usize, what: &str) -> PlumeResult<()> {
    if got == expected {
        Ok(())
    } else {
        Err(PlumeError::ShapeMismatch(format!(
            "{what} buffer has {got} elements, grid needs {expected}"
        )))
    }
}
