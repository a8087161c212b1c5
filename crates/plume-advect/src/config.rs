//! Advection configuration.
//!
//! Parameters that control the back-trace: integration order and how
//! samples that leave the domain are resolved.

use serde::{Deserialize, Serialize};

use plume_grid::BoundaryPolicy;
use plume_types::{PlumeError, PlumeResult};

/// Back-trace integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationOrder {
    /// `p = x - dt·u(x)`.
    #[default]
    Euler,
    /// Explicit midpoint: `m = x - ½dt·u(x)`, `p = x - dt·u(m)`.
    Midpoint,
}

impl IntegrationOrder {
    pub fn name(&self) -> &'static str {
        match self {
            IntegrationOrder::Euler => "euler",
            IntegrationOrder::Midpoint => "midpoint",
        }
    }
}

/// Configuration for the advection solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvectionConfig {
    /// Back-trace scheme.
    pub order: IntegrationOrder,

    /// How density samples outside the grid resolve.
    pub boundary: BoundaryPolicy,

    /// How velocity samples outside the grid resolve.
    pub velocity_boundary: BoundaryPolicy,
}

impl Default for AdvectionConfig {
    fn default() -> Self {
        Self {
            order: IntegrationOrder::Euler,
            boundary: BoundaryPolicy::Clamp,
            velocity_boundary: BoundaryPolicy::Clamp,
        }
    }
}

impl AdvectionConfig {
    /// Creates a config with the second-order back-trace.
    pub fn high_quality() -> Self {
        Self {
            order: IntegrationOrder::Midpoint,
            ..Default::default()
        }
    }

    /// Creates a periodic-domain config.
    pub fn periodic() -> Self {
        Self {
            boundary: BoundaryPolicy::Periodic,
            velocity_boundary: BoundaryPolicy::Periodic,
            ..Default::default()
        }
    }

    /// Validates the time step used with this config.
    pub fn validate_dt(&self, dt: f32) -> PlumeResult<()> {
        if dt.is_finite() {
            Ok(())
        } else {
            Err(PlumeError::InvalidConfig(format!(
                "advection time step must be finite, got {dt}"
            )))
        }
    }
}
