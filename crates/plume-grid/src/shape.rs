//! Grid resolution and sampling lattices.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use plume_types::{PlumeError, PlumeResult};

/// Resolution and spacing of a cell grid.
///
/// Cells are indexed x-fastest: `i + nx * (j + ny * k)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridShape {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Edge length of one cell in world units.
    pub voxel_size: f32,
}

impl GridShape {
    /// Creates a validated grid shape.
    pub fn new(nx: usize, ny: usize, nz: usize, voxel_size: f32) -> PlumeResult<Self> {
        let shape = Self {
            nx,
            ny,
            nz,
            voxel_size,
        };
        shape.validate()?;
        Ok(shape)
    }

    /// Cubic grid with `n` cells per side.
    pub fn cubic(n: usize, voxel_size: f32) -> PlumeResult<Self> {
        Self::new(n, n, n, voxel_size)
    }

    /// Checks that every dimension is non-zero and the voxel size is positive.
    pub fn validate(&self) -> PlumeResult<()> {
        if self.nx == 0 || self.ny == 0 || self.nz == 0 {
            return Err(PlumeError::InvalidConfig(format!(
                "grid dimensions must be non-zero, got {}x{}x{}",
                self.nx, self.ny, self.nz
            )));
        }
        if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
            return Err(PlumeError::InvalidConfig(format!(
                "voxel size must be positive, got {}",
                self.voxel_size
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Linear index of cell `(i, j, k)`.
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.nx * (j + self.ny * k)
    }

    /// Inverse of [`index`](Self::index).
    #[inline]
    pub fn coords(&self, index: usize) -> [usize; 3] {
        let i = index % self.nx;
        let j = (index / self.nx) % self.ny;
        let k = index / (self.nx * self.ny);
        [i, j, k]
    }

    /// World-space size of the grid box. The box starts at the origin.
    pub fn world_extent(&self) -> Vec3 {
        Vec3::new(self.nx as f32, self.ny as f32, self.nz as f32) * self.voxel_size
    }

    /// World-space center of cell `(i, j, k)`.
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        (Vec3::new(i as f32, j as f32, k as f32) + 0.5) * self.voxel_size
    }

    /// Lattice of cell-centered samples.
    pub fn centered_lattice(&self) -> Lattice {
        Lattice {
            dims: self.dims(),
            period: self.dims(),
            offset: [0.5; 3],
        }
    }

    /// Lattice of face samples normal to `axis` (MAC layout).
    pub fn face_lattice(&self, axis: usize) -> Lattice {
        let mut dims = self.dims();
        let period = self.dims();
        let mut offset = [0.5; 3];
        dims[axis] += 1;
        offset[axis] = 0.0;
        Lattice {
            dims,
            period,
            offset,
        }
    }

    /// Fails with `ShapeMismatch` unless `other` has the same resolution and spacing.
    pub fn ensure_matches(&self, other: &GridShape, what: &str) -> PlumeResult<()> {
        let same_dims = self.dims() == other.dims();
        let same_spacing = (self.voxel_size - other.voxel_size).abs()
            <= f32::EPSILON * self.voxel_size.max(other.voxel_size);
        if same_dims && same_spacing {
            Ok(())
        } else {
            Err(PlumeError::ShapeMismatch(format!(
                "{what}: {}x{}x{} @ {} vs {}x{}x{} @ {}",
                self.nx,
                self.ny,
                self.nz,
                self.voxel_size,
                other.nx,
                other.ny,
                other.nz,
                other.voxel_size
            )))
        }
    }
}

/// A regular set of sample points inside a grid.
///
/// Sample `(i, j, k)` sits at cell-unit position `(i, j, k) + offset`.
/// `period` is the number of distinct samples per axis under periodic
/// wrapping; a staggered axis stores one more sample than its period
/// because the last face coincides with the first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lattice {
    pub dims: [usize; 3],
    pub period: [usize; 3],
    pub offset: [f32; 3],
}

impl Lattice {
    #[inline]
    pub fn len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    /// Cell-unit position of sample `(i, j, k)`.
    #[inline]
    pub fn position(&self, i: usize, j: usize, k: usize) -> Vec3 {
        Vec3::new(
            i as f32 + self.offset[0],
            j as f32 + self.offset[1],
            k as f32 + self.offset[2],
        )
    }
}
