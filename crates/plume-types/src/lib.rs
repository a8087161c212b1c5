//! # plume-types
//!
//! Shared types, handles, error types, and numeric constants
//! for the Plume differentiable smoke reconstruction core.
//!
//! This crate has zero numerical logic. It defines the vocabulary
//! that all other Plume crates share.

pub mod constants;
pub mod error;
pub mod ids;

pub use error::{PlumeError, PlumeResult};
pub use ids::{FieldHandle, ImageHandle};
