//! # plume-advect
//!
//! Semi-Lagrangian transport of a density grid through a velocity field,
//! with a hand-written adjoint.
//!
//! ## Key Types
//!
//! - [`AdvectionConfig`]: integration order and boundary policies
//! - [`SemiLagrangian`]: forward kernel and its adjoint
//! - [`IntegrationOrder`]: back-trace scheme (Euler or midpoint)

pub mod config;
pub mod semi_lagrangian;

pub use config::{AdvectionConfig, IntegrationOrder};
pub use semi_lagrangian::SemiLagrangian;
