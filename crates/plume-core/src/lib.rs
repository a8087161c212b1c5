//! # plume-core
//!
//! Operation table and rollout orchestration for the Plume kernels.
//!
//! A [`DeviceContext`] owns every field and image a caller creates and
//! hands out typed handles for them. Forward kernels launched through the
//! context are recorded on a gradient tape, so image-space gradients can be
//! pushed back through any chain of advection steps. The
//! [`RolloutDispatcher`] drives the frame-by-frame advect/render loop and
//! its reverse pass.
//!
//! ```text
//! density[0] ──advect──▶ density[1] ──advect──▶ … ──▶ density[N]
//!     │                      │                          │
//!   render                 render                     render
//!     ▼                      ▼                          ▼
//!  image[0]               image[1]                   image[N]
//! ```

pub mod config;
pub mod context;
pub mod rollout;
mod tape;

pub use config::EngineConfig;
pub use context::DeviceContext;
pub use rollout::{Rollout, RolloutDispatcher, RolloutGradients, RolloutScope};
