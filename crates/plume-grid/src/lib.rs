//! # plume-grid
//!
//! Dense 3D grids for smoke reconstruction.
//!
//! ## Key Types
//!
//! - [`GridShape`]: resolution and voxel size shared by a frame sequence
//! - [`DensityField`]: non-negative scalar per cell
//! - [`VelocityField`]: cell-centered or staggered (MAC) vector field
//! - [`GradientBuffer`]: shape-matched gradient storage
//! - [`Stencil`]: trilinear sample weights and their position derivatives
//!
//! Positions passed to sampling code are in *cell units*: world position
//! divided by voxel size. Cell `(i, j, k)` has its center at
//! `(i + 0.5, j + 0.5, k + 0.5)`.

pub mod field;
pub mod gradient;
pub mod sampling;
pub mod shape;

pub use field::{DensityField, FieldKind, VelocityField, VelocityLayout};
pub use gradient::{FieldGradients, GradientAccumulator, GradientBuffer};
pub use sampling::{BoundaryPolicy, Stencil};
pub use shape::{GridShape, Lattice};
