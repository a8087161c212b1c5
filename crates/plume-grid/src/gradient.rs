//! Gradient storage.
//!
//! A [`GradientBuffer`] always has exactly the shape of the field it
//! belongs to. Adjoint kernels write through a [`GradientAccumulator`]
//! (atomic scatter-add) and freeze it when they finish.

use plume_gpu::{AtomicBuffer, ComputeBuffer, DeviceBackend};
use plume_types::{PlumeError, PlumeResult};

use crate::field::FieldKind;
use crate::shape::GridShape;

/// Gradient of a scalar loss with respect to one field.
#[derive(Debug)]
pub struct GradientBuffer {
    shape: GridShape,
    kind: FieldKind,
    parts: Vec<ComputeBuffer>,
}

impl GradientBuffer {
    /// Zero gradient for a field of `kind` on `shape`.
    pub fn zeros(
        device: &dyn DeviceBackend,
        shape: GridShape,
        kind: FieldKind,
    ) -> PlumeResult<Self> {
        let parts = kind
            .lattices(&shape)
            .iter()
            .map(|l| device.allocate(l.len()))
            .collect::<PlumeResult<Vec<_>>>()?;
        Ok(Self { shape, kind, parts })
    }

    /// Uploads a host gradient laid out like the field's host buffer.
    pub fn from_host(
        device: &dyn DeviceBackend,
        shape: GridShape,
        kind: FieldKind,
        host: &[f32],
    ) -> PlumeResult<Self> {
        let lattices = kind.lattices(&shape);
        let expected: usize = lattices.iter().map(|l| l.len()).sum();
        if host.len() != expected {
            return Err(PlumeError::ShapeMismatch(format!(
                "{} gradient has {} elements, grid needs {expected}",
                kind.name(),
                host.len()
            )));
        }
        let mut rest = host;
        let mut parts = Vec::with_capacity(lattices.len());
        for lattice in &lattices {
            let (head, tail) = rest.split_at(lattice.len());
            parts.push(device.upload(head)?);
            rest = tail;
        }
        Ok(Self { shape, kind, parts })
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Component `i` (always 0 for density).
    pub fn part(&self, i: usize) -> &[f32] {
        self.parts[i].as_slice()
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Total number of scalars.
    pub fn len(&self) -> usize {
        self.parts.iter().map(ComputeBuffer::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenated host copy, same layout as the field's host buffer.
    pub fn to_host(&self) -> Vec<f32> {
        self.parts
            .iter()
            .flat_map(|p| p.as_slice().iter().copied())
            .collect()
    }

    /// `self += other`. Kinds and shapes must match exactly. On error `self`
    /// is left untouched.
    pub fn accumulate(
        &mut self,
        device: &dyn DeviceBackend,
        other: &GradientBuffer,
    ) -> PlumeResult<()> {
        if self.kind != other.kind {
            return Err(PlumeError::ShapeMismatch(format!(
                "cannot add {} gradient into {} gradient",
                other.kind.name(),
                self.kind.name()
            )));
        }
        self.shape.ensure_matches(&other.shape, "gradient accumulation")?;
        let sums = self
            .parts
            .iter()
            .zip(&other.parts)
            .map(|(mine, theirs)| {
                let mut sum = device.allocate(mine.len())?;
                device.axpy(mine, theirs, 1.0, &mut sum)?;
                Ok(sum)
            })
            .collect::<PlumeResult<Vec<_>>>()?;
        self.parts = sums;
        Ok(())
    }

    /// Number of NaN or infinite entries.
    pub fn count_non_finite(&self) -> usize {
        self.parts.iter().map(ComputeBuffer::count_non_finite).sum()
    }
}

/// Scatter-add target used while an adjoint kernel runs.
#[derive(Debug)]
pub struct GradientAccumulator {
    shape: GridShape,
    kind: FieldKind,
    parts: Vec<AtomicBuffer>,
}

impl GradientAccumulator {
    pub fn new(
        device: &dyn DeviceBackend,
        shape: GridShape,
        kind: FieldKind,
    ) -> PlumeResult<Self> {
        let parts = kind
            .lattices(&shape)
            .iter()
            .map(|l| device.allocate_atomic(l.len()))
            .collect::<PlumeResult<Vec<_>>>()?;
        Ok(Self { shape, kind, parts })
    }

    #[inline]
    pub fn part(&self, i: usize) -> &AtomicBuffer {
        &self.parts[i]
    }

    /// Freezes the accumulated values.
    pub fn finish(self) -> GradientBuffer {
        GradientBuffer {
            shape: self.shape,
            kind: self.kind,
            parts: self.parts.into_iter().map(AtomicBuffer::into_buffer).collect(),
        }
    }
}

/// Result of an advection adjoint.
#[derive(Debug)]
pub struct FieldGradients {
    /// Gradient with respect to the source density.
    pub density: GradientBuffer,
    /// Gradient with respect to the velocity.
    pub velocity: GradientBuffer,
}
