//! Numeric constants and engine defaults.

/// Default absorption coefficient σ (per world unit per unit density).
pub const DEFAULT_ABSORPTION: f32 = 1.0;

/// Default frame time step.
pub const DEFAULT_DT: f32 = 1.0;

/// Default ray-march step length, as a fraction of the voxel size.
pub const DEFAULT_STEP_SCALE: f32 = 0.5;

/// Transmittance below which ray marching terminates early.
pub const TRANSMITTANCE_EPSILON: f32 = 1.0e-6;

/// Optical depths above this are treated as fully opaque.
///
/// `exp(-80)` is far below any transmittance cutoff.
pub const MAX_OPTICAL_DEPTH: f32 = 80.0;

/// Default device memory budget in bytes (1 GiB).
pub const DEFAULT_MEMORY_BUDGET: usize = 1 << 30;
