//! Error types for the Plume core.
//!
//! All crates return `PlumeResult<T>` from fallible operations.

use thiserror::Error;

/// Unified error type for the Plume core.
#[derive(Debug, Error)]
pub enum PlumeError {
    /// Camera, grid, velocity, or gradient dimensions are inconsistent.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The device could not satisfy an allocation.
    #[error("Device allocation failed: requested {requested} bytes, {available} bytes available")]
    DeviceAllocation {
        requested: usize,
        available: usize,
    },

    /// NaN or Inf values were found in a field, image, or gradient.
    ///
    /// Advisory: the offending output is still stored.
    #[error("Numeric instability: {count} non-finite values in {what}")]
    NumericInstability {
        what: String,
        count: usize,
    },

    /// Unknown, freed, or wrongly-typed handle.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Host data rejected (negative density, non-finite value, wrong length).
    #[error("Invalid field data: {0}")]
    InvalidField(String),

    /// Configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation called out of order (e.g. seeding a consumed gradient tape).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PlumeError {
    /// Returns true for errors that leave the rollout usable.
    ///
    /// Only numeric instability is advisory; everything else aborts the
    /// current operation.
    pub fn is_advisory(&self) -> bool {
        matches!(self, PlumeError::NumericInstability { .. })
    }
}

/// Convenience alias for `Result<T, PlumeError>`.
pub type PlumeResult<T> = Result<T, PlumeError>;
